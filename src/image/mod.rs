//! Image preparation and the remote merge call.

pub mod encoder;
mod provider;
#[cfg(feature = "gemini")]
pub mod providers;
mod types;

pub use encoder::encode;
pub use provider::{MergeProvider, MergeProviderKind};
pub use types::{EncodedImage, ImageFile, ImageFormat, ImageSource};
