//! Turns a selected [`ImageFile`] into an [`EncodedImage`].

use crate::error::{MergeError, Result};
use crate::image::types::{EncodedImage, ImageFile, ImageFormat, ImageSource};

/// Reads the file and encodes it for the remote service.
///
/// The media type comes from the declared content type when it names an
/// image type; otherwise it is sniffed from the file's leading bytes.
pub async fn encode(file: &ImageFile) -> Result<EncodedImage> {
    let bytes = match file.source() {
        ImageSource::Path(path) => {
            tokio::fs::read(path)
                .await
                .map_err(|source| MergeError::Read {
                    path: path.clone(),
                    source,
                })?
        }
        ImageSource::Memory(bytes) => bytes.clone(),
    };

    if bytes.is_empty() {
        return Err(MergeError::Format(format!("{} is empty", file.name())));
    }

    let media_type = resolve_media_type(file, &bytes)?;

    tracing::debug!(
        name = %file.name(),
        media_type = %media_type,
        size_bytes = bytes.len(),
        "encoded image"
    );

    Ok(EncodedImage::from_bytes(media_type, &bytes))
}

fn resolve_media_type(file: &ImageFile, bytes: &[u8]) -> Result<String> {
    if let Some(declared) = file.content_type().map(str::trim).filter(|t| !t.is_empty()) {
        let declared = declared.to_lowercase();
        return match declared.split_once('/') {
            Some(("image", subtype)) if !subtype.is_empty() => Ok(declared),
            _ => Err(MergeError::Format(format!(
                "{} is declared as {declared}, which is not an image type",
                file.name()
            ))),
        };
    }

    ImageFormat::from_magic_bytes(bytes)
        .map(|f| f.mime_type().to_string())
        .ok_or_else(|| {
            MergeError::Format(format!(
                "cannot determine the media type of {}",
                file.name()
            ))
        })
}
