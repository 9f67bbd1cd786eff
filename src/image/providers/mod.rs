//! Merge providers.

#[cfg(feature = "gemini")]
mod gemini;

#[cfg(feature = "gemini")]
pub use gemini::{
    GeminiModel, GeminiProvider, GeminiProviderBuilder, API_BASE_ENV_VAR, DEFAULT_API_BASE,
    MERGE_INSTRUCTION, MODEL_ENV_VAR,
};
