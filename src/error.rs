//! Error types for the merge workflow.

use std::path::PathBuf;

/// Environment variables consulted for the Gemini API key, in order.
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Errors that can occur while preparing images or merging them.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// The source image could not be read.
    #[error("failed to read image {path}: {source}")]
    Read {
        /// Path (or display name) of the unreadable file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The source did not yield a recognizable image media type.
    #[error("unsupported image format: {0}")]
    Format(String),

    /// The remote service reported resource exhaustion.
    #[error("API quota exceeded: wait a moment and try again, or use a different API key")]
    QuotaExceeded,

    /// Any other failure reported by the remote service.
    #[error("API error: {0}")]
    Service(String),

    /// The call succeeded but the response held no inline image.
    #[error("the API did not return an image; try again with different photos")]
    NoImageReturned,

    /// No API key was configured.
    #[error("API key missing: set {} in the environment", .env_vars.join(" or "))]
    MissingCredential {
        /// Variables that were checked.
        env_vars: Vec<&'static str>,
    },

    /// API key rejected by the remote service.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Invalid request parameters, detected before any network I/O.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network or HTTP transport error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// I/O error (e.g., saving the result).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MergeError {
    /// Builds the missing-credential error for the standard key variables.
    pub fn missing_credential() -> Self {
        Self::MissingCredential {
            env_vars: API_KEY_ENV_VARS.to_vec(),
        }
    }

    /// Returns true if this error blocks the whole session rather than one attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingCredential { .. })
    }

    /// Returns instructions for fixing the error, if there are any to give.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::MissingCredential { env_vars } => Some(format!(
                "photomerge needs a Gemini API key to talk to Google AI.\n\
                 \n\
                 How to fix:\n\
                 - Local shell: export {first}=<your Gemini API key>, or add it to a .env file\n\
                 - Hosted deployment: add the environment variable {first} in your hosting\n\
                 \x20 provider's dashboard (value: your Gemini API key)\n\
                 \n\
                 Accepted variable names: {all}.\n\
                 After setting the variable, restart the process or re-deploy the service\n\
                 so the change takes effect.",
                first = env_vars.first().copied().unwrap_or("GEMINI_API_KEY"),
                all = env_vars.join(", "),
            )),
            Self::QuotaExceeded => Some(
                "Check your plan and usage at https://aistudio.google.com before retrying.".into(),
            ),
            Self::Auth(_) => Some("Verify that the configured API key is valid.".into()),
            _ => None,
        }
    }
}

/// Result type alias for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;

/// Maximum length of remote error text carried into messages.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Strips credentials from remote error text and caps its length.
///
/// Google echoes request URLs in some errors, and `key=` query parameters
/// would otherwise leak into logs and user-facing messages.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let mut out = String::with_capacity(text.len().min(MAX_ERROR_MESSAGE_LEN));
    let mut rest = text.trim();

    while let Some(pos) = rest.find("key=") {
        out.push_str(&rest[..pos + 4]);
        out.push_str("[REDACTED]");
        let tail = &rest[pos + 4..];
        let end = tail
            .find(|c: char| c == '&' || c == '"' || c.is_whitespace())
            .unwrap_or(tail.len());
        rest = &tail[end..];
    }
    out.push_str(rest);

    if out.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let truncated: String = out.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        return format!("{truncated}...");
    }
    out
}
