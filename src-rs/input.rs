//! Local image input: manual selection or drag-and-drop.
//!
//! Manual selection accepts any file. A drop of something that is not an image
//! is ignored without an error.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::ImageFormat;
use log::{debug, info};

use crate::error::InputError;

/// Used when the bytes do not identify a known image format.
pub const FALLBACK_MIME: &str = "image/jpeg";

#[derive(Debug, Clone)]
pub struct SelectedImage {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, InputError> {
    if !path.exists() {
        return Err(InputError::NotFound(path.display().to_string()));
    }
    fs::read(path).map_err(|source| InputError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// MIME type from content first, extension second.
pub fn sniff_image_mime(path: &Path, bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .or_else(|| ImageFormat::from_path(path).ok())
        .map(|format| format.to_mime_type())
        .filter(|mime| mime.starts_with("image/"))
}

impl SelectedImage {
    pub fn from_selection(path: &Path) -> Result<Self, InputError> {
        let bytes = read_bytes(path)?;
        let mime_type = sniff_image_mime(path, &bytes)
            .unwrap_or(FALLBACK_MIME)
            .to_string();
        info!("selected {} ({mime_type}, {} bytes)", path.display(), bytes.len());
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            mime_type,
        })
    }

    /// `Ok(None)` when the dropped file is not an image.
    pub fn from_drop(path: &Path) -> Result<Option<Self>, InputError> {
        let bytes = read_bytes(path)?;
        let Some(mime) = sniff_image_mime(path, &bytes) else {
            debug!("ignoring non-image drop: {}", path.display());
            return Ok(None);
        };
        Ok(Some(Self {
            path: path.to_path_buf(),
            bytes,
            mime_type: mime.to_string(),
        }))
    }

    pub fn base64_data(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}
