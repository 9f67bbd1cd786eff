//! Merge provider trait.

use crate::error::Result;
use crate::image::types::EncodedImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Merge provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeProviderKind {
    /// Google Gemini image models.
    Gemini,
}

impl std::fmt::Display for MergeProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// A remote service that composites a portrait into a background.
#[async_trait]
pub trait MergeProvider: Send + Sync {
    /// Extracts the main subject of `portrait` and places it into `background`.
    ///
    /// Argument order is part of the contract: the background is sent first.
    async fn merge(
        &self,
        background: &EncodedImage,
        portrait: &EncodedImage,
    ) -> Result<EncodedImage>;

    /// Returns the kind of this provider.
    fn kind(&self) -> MergeProviderKind;

    /// Returns the name of this provider for display.
    fn name(&self) -> &str {
        match self.kind() {
            MergeProviderKind::Gemini => "Gemini (Google)",
        }
    }

    /// Checks if the provider is reachable and authenticated.
    async fn health_check(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_display() {
        assert_eq!(MergeProviderKind::Gemini.to_string(), "gemini");
    }
}
