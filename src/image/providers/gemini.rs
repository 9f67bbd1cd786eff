//! Gemini (Google) merge provider.

use crate::error::{sanitize_error_message, MergeError, Result, API_KEY_ENV_VARS};
use crate::image::provider::{MergeProvider, MergeProviderKind};
use crate::image::types::EncodedImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Default API endpoint.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Environment variable overriding the model id.
pub const MODEL_ENV_VAR: &str = "PHOTOMERGE_MODEL";

/// Environment variable overriding the API endpoint.
pub const API_BASE_ENV_VAR: &str = "PHOTOMERGE_API_BASE";

/// Instruction sent alongside the two images.
///
/// Asks the model to lift the main person out of the second image (the
/// portrait) and place them into the first (the background), matching
/// lighting, scale and position, and to return only the composite.
pub const MERGE_INSTRUCTION: &str = "두 번째 이미지(인물 사진)에서 주요 인물을 추출하여 첫 번째 이미지(배경)에 사실적으로 배치해 주세요. 조명, 스케일, 위치가 자연스럽고 매끄럽게 어우러지도록 해주세요. 최종 결과물은 합성된 이미지만 포함해야 합니다.";

/// Gemini image model variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GeminiModel {
    /// Nano Banana - Gemini 2.5 Flash Image (fast, economical).
    #[default]
    NanoBanana,
    /// Nano Banana Pro - Gemini 3 Pro Image (highest quality).
    NanoBananaPro,
    /// Any other model id accepted by `generateContent`.
    Custom(String),
}

impl GeminiModel {
    /// Returns the API model identifier.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NanoBanana => "gemini-2.5-flash-image",
            Self::NanoBananaPro => "gemini-3-pro-image-preview",
            Self::Custom(id) => id,
        }
    }

    /// Maps a model id to a variant, keeping unknown ids as [`GeminiModel::Custom`].
    pub fn from_id(id: &str) -> Self {
        match id.trim() {
            "gemini-2.5-flash-image" => Self::NanoBanana,
            "gemini-3-pro-image-preview" => Self::NanoBananaPro,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Builder for GeminiProvider.
#[derive(Debug, Clone, Default)]
pub struct GeminiProviderBuilder {
    api_key: Option<String>,
    model: Option<GeminiModel>,
    base_url: Option<String>,
}

impl GeminiProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `GEMINI_API_KEY`, then `GOOGLE_API_KEY`.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the Gemini model variant. Falls back to `PHOTOMERGE_MODEL`.
    pub fn model(mut self, model: GeminiModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Sets the API endpoint. Falls back to `PHOTOMERGE_API_BASE`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Builds the provider, resolving settings from the process environment.
    pub fn build(self) -> Result<GeminiProvider> {
        self.build_with_env(|name| std::env::var(name).ok())
    }

    fn build_with_env(self, env: impl Fn(&str) -> Option<String>) -> Result<GeminiProvider> {
        let lookup = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| API_KEY_ENV_VARS.iter().find_map(|name| lookup(*name)))
            .ok_or_else(MergeError::missing_credential)?;

        let model = self
            .model
            .or_else(|| lookup(MODEL_ENV_VAR).map(|id| GeminiModel::from_id(&id)))
            .unwrap_or_default();

        let base_url = self
            .base_url
            .or_else(|| lookup(API_BASE_ENV_VAR))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(GeminiProvider {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url,
        })
    }
}

/// Gemini merge provider.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: GeminiModel,
    base_url: String,
}

impl GeminiProvider {
    /// Creates a new `GeminiProviderBuilder`.
    pub fn builder() -> GeminiProviderBuilder {
        GeminiProviderBuilder::new()
    }

    /// Returns the model this provider calls.
    pub fn model(&self) -> &GeminiModel {
        &self.model
    }

    async fn merge_impl(
        &self,
        background: &EncodedImage,
        portrait: &EncodedImage,
    ) -> Result<EncodedImage> {
        background.validate()?;
        portrait.validate()?;

        let start = Instant::now();
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            self.model.as_str(),
        );

        let body = GeminiRequest::merge(background, portrait);

        tracing::debug!(model = %self.model.as_str(), "submitted merge request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = parse_error(status.as_u16(), &text);
            tracing::warn!(status = status.as_u16(), "Gemini merge request failed: {err}");
            return Err(err);
        }

        let gemini_response: GeminiResponse = response.json().await?;
        let image = gemini_response.into_image()?;

        tracing::debug!(
            model = %self.model.as_str(),
            media_type = %image.media_type,
            duration_ms = start.elapsed().as_millis() as u64,
            "merge complete"
        );

        Ok(image)
    }
}

/// Maps a non-success response to the error taxonomy.
fn parse_error(status: u16, text: &str) -> MergeError {
    let body: Option<GoogleErrorBody> = serde_json::from_str(text).ok();
    let detail = body.as_ref().and_then(|b| b.error.as_ref());

    let exhausted = detail
        .and_then(|d| d.status.as_deref())
        .is_some_and(|s| s == "RESOURCE_EXHAUSTED");
    if status == 429 || exhausted || text.contains("RESOURCE_EXHAUSTED") {
        return MergeError::QuotaExceeded;
    }

    let message = detail
        .and_then(|d| d.message.as_deref())
        .filter(|m| !m.is_empty())
        .map(sanitize_error_message)
        .unwrap_or_else(|| sanitize_error_message(text));
    if message.is_empty() {
        return MergeError::Service(format!("HTTP {status}"));
    }
    MergeError::Service(format!("{status} - {message}"))
}

#[async_trait]
impl MergeProvider for GeminiProvider {
    async fn merge(
        &self,
        background: &EncodedImage,
        portrait: &EncodedImage,
    ) -> Result<EncodedImage> {
        self.merge_impl(background, portrait).await
    }

    fn kind(&self) -> MergeProviderKind {
        MergeProviderKind::Gemini
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/v1beta/models/{}", self.base_url, self.model.as_str());

        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;

        match response.status().as_u16() {
            401 | 403 => Err(MergeError::Auth("Invalid API key".into())),
            404 => Err(MergeError::Service(format!(
                "404 - model {} not found; verify the model name",
                self.model.as_str()
            ))),
            s if !(200..300).contains(&s) => {
                let text = response.text().await.unwrap_or_default();
                Err(parse_error(s, &text))
            }
            _ => Ok(()),
        }
    }
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - can be text or inline image data.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    Text { text: String },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

impl GeminiRequestPart {
    fn image(image: &EncodedImage) -> Self {
        Self::InlineData {
            inline_data: GeminiInlineData {
                mime_type: image.media_type.clone(),
                data: image.data.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    response_modalities: Vec<String>,
}

impl GeminiRequest {
    /// Background first, portrait second, then the instruction.
    fn merge(background: &EncodedImage, portrait: &EncodedImage) -> Self {
        let parts = vec![
            GeminiRequestPart::image(background),
            GeminiRequestPart::image(portrait),
            GeminiRequestPart::Text {
                text: MERGE_INSTRUCTION.to_string(),
            },
        ];

        Self {
            contents: vec![GeminiContent { parts }],
            generation_config: GeminiConfig {
                response_modalities: vec!["IMAGE".to_string()],
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(default)]
    inline_data: Option<InlineData>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    #[serde(default)]
    error: Option<GoogleErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl GeminiResponse {
    /// Takes the first inline image across the response's parts.
    fn into_image(self) -> Result<EncodedImage> {
        // Blocked prompts come back as HTTP 200
        if let Some(feedback) = self.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                let msg = feedback
                    .block_reason_message
                    .unwrap_or_else(|| format!("prompt blocked: {reason}"));
                return Err(MergeError::Service(msg));
            }
        }

        let mut blocked = None;
        let mut texts = Vec::new();

        for candidate in self.candidates {
            if let Some(reason) = candidate.finish_reason.as_deref() {
                if is_safety_block(reason) && blocked.is_none() {
                    blocked = Some(reason.to_string());
                }
            }

            let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
            for part in parts {
                if let Some(inline) = part
                    .inline_data
                    .filter(|d| !d.data.is_empty() && !d.mime_type.trim().is_empty())
                {
                    return Ok(EncodedImage::new(inline.mime_type, inline.data));
                }
                if let Some(text) = part.text {
                    texts.push(text);
                }
            }
        }

        if let Some(reason) = blocked {
            return Err(MergeError::Service(format!(
                "content blocked by Gemini safety filter: {reason}"
            )));
        }

        if !texts.is_empty() {
            tracing::warn!(text = %texts.join(" "), "Gemini answered with text instead of an image");
        }
        Err(MergeError::NoImageReturned)
    }
}

fn is_safety_block(finish_reason: &str) -> bool {
    matches!(
        finish_reason,
        "SAFETY"
            | "IMAGE_SAFETY"
            | "IMAGE_PROHIBITED_CONTENT"
            | "IMAGE_RECITATION"
            | "RECITATION"
            | "PROHIBITED_CONTENT"
            | "BLOCKLIST"
    )
}
