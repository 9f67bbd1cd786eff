#![warn(missing_docs)]
//! photomerge - place a person from one photo into another scene.
//!
//! Two images go in (a portrait and a background), Gemini composites them,
//! and one image comes back.
//!
//! # Quick Start
//!
//! ```no_run
//! use photomerge::{GeminiProvider, ImageFile, MergeAttempt, SessionController, SlotKind};
//!
//! #[tokio::main]
//! async fn main() -> photomerge::Result<()> {
//!     let provider = GeminiProvider::builder().build()?;
//!     let session = SessionController::new(provider);
//!
//!     session.select_image(SlotKind::Portrait, Some(ImageFile::from_path("me.jpg")));
//!     session.select_image(SlotKind::Background, Some(ImageFile::from_path("campus.jpg")));
//!
//!     if let MergeAttempt::Failed(message) = session.request_merge().await {
//!         eprintln!("{message}");
//!     }
//!     session.download_result(".").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! - `GEMINI_API_KEY` (or `GOOGLE_API_KEY`): required API key
//! - `PHOTOMERGE_MODEL`: model id override
//! - `PHOTOMERGE_API_BASE`: endpoint override
//!
//! # Features
//!
//! - `gemini`: Gemini (Google) merge provider
//! - `cli`: Command-line interface

mod error;
pub mod image;
pub mod session;

// Re-export error types at crate root
pub use error::{MergeError, Result, API_KEY_ENV_VARS};

pub use image::{EncodedImage, ImageFile, ImageFormat, MergeProvider, MergeProviderKind};
pub use session::{
    MergeAttempt, RejectReason, RequestState, SessionController, SlotKind, UploadSlot,
    DEFAULT_DOWNLOAD_NAME,
};

#[cfg(feature = "gemini")]
pub use image::providers::{GeminiModel, GeminiProvider, GeminiProviderBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{MergeError, Result};
    pub use crate::image::{EncodedImage, ImageFile, MergeProvider};
    pub use crate::session::{MergeAttempt, RequestState, SessionController, SlotKind};

    #[cfg(feature = "gemini")]
    pub use crate::image::providers::GeminiProvider;
}
