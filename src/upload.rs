//! The file upload boundary.
//!
//! Uploaded bytes are checked against a size limit, an extension allow-list and, for images,
//! the leading magic bytes before anything reaches a collaborator.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};
use crate::observability::UPLOADS_REJECTED;

/// Default maximum image size: 10 MiB.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
/// Default maximum audio size: 25 MiB.
pub const DEFAULT_MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];
const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "ogg", "m4a", "webm"];

/// Raw bytes as received from a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upload {
    /// The client-supplied file name.
    pub filename: String,
    /// The file contents.
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Creates an upload.
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Creates an upload from base64 data, with or without a `data:` URL prefix.
    pub fn from_base64(filename: impl Into<String>, data: &str) -> Result<Self> {
        Ok(Self::new(filename, decode_base64(data)?))
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

/// A validated image ready to forward to the assistant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImagePayload {
    /// MIME type determined from the content.
    pub mime_type: String,
    /// The image bytes.
    pub data: Vec<u8>,
}

impl ImagePayload {
    /// Base64 of the image bytes.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// A `data:` URL suitable for inline display.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

/// A validated audio file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioPayload {
    /// MIME type guessed from the extension.
    pub mime_type: String,
    /// The audio bytes.
    pub data: Vec<u8>,
}

/// Limits applied to uploads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Largest accepted image, in bytes.
    pub max_image_bytes: usize,
    /// Largest accepted audio file, in bytes.
    pub max_audio_bytes: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_audio_bytes: DEFAULT_MAX_AUDIO_BYTES,
        }
    }
}

impl UploadPolicy {
    /// Creates a policy with explicit limits.
    pub fn new(max_image_bytes: usize, max_audio_bytes: usize) -> Self {
        Self {
            max_image_bytes,
            max_audio_bytes,
        }
    }

    /// Validates an image upload.
    pub fn validate_image(&self, upload: &Upload) -> Result<ImagePayload> {
        self.check_image(upload).inspect_err(|err| {
            UPLOADS_REJECTED.click();
            tracing::debug!(filename = %upload.filename, error = %err, "image upload rejected");
        })
    }

    /// Validates an audio upload.
    pub fn validate_audio(&self, upload: &Upload) -> Result<AudioPayload> {
        self.check_audio(upload).inspect_err(|err| {
            UPLOADS_REJECTED.click();
            tracing::debug!(filename = %upload.filename, error = %err, "audio upload rejected");
        })
    }

    fn check_image(&self, upload: &Upload) -> Result<ImagePayload> {
        check_common(upload, self.max_image_bytes, IMAGE_EXTENSIONS, "Image")?;
        let mime_type = sniff_image(&upload.bytes).ok_or_else(|| {
            Error::validation(
                "Invalid image file: contents are not a supported image",
                Some("image".to_string()),
            )
        })?;
        Ok(ImagePayload {
            mime_type: mime_type.to_string(),
            data: upload.bytes.clone(),
        })
    }

    fn check_audio(&self, upload: &Upload) -> Result<AudioPayload> {
        let extension = check_common(upload, self.max_audio_bytes, AUDIO_EXTENSIONS, "Audio")?;
        Ok(AudioPayload {
            mime_type: audio_mime_type(&extension).to_string(),
            data: upload.bytes.clone(),
        })
    }
}

fn check_common(
    upload: &Upload,
    max_bytes: usize,
    extensions: &[&str],
    what: &str,
) -> Result<String> {
    let param = Some(what.to_ascii_lowercase());
    if upload.bytes.is_empty() {
        return Err(Error::validation("No file uploaded", param));
    }
    if upload.bytes.len() > max_bytes {
        return Err(Error::validation(
            format!(
                "{what} file too large. Maximum size is {}MB",
                max_bytes / (1024 * 1024)
            ),
            param,
        ));
    }
    match upload.extension() {
        Some(ext) if extensions.contains(&ext.as_str()) => Ok(ext),
        _ => Err(Error::validation(
            format!(
                "Unsupported {} format. Supported formats: {}",
                what.to_ascii_lowercase(),
                extensions
                    .iter()
                    .map(|ext| format!(".{ext}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            param,
        )),
    }
}

/// Identifies an image by its magic bytes.
pub fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"BM") && bytes.len() >= 14 {
        Some("image/bmp")
    } else {
        None
    }
}

fn audio_mime_type(extension: &str) -> &'static str {
    match extension {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// Decodes base64, stripping a `data:...;base64,` prefix if present.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let data = data.trim();
    let payload = if data.starts_with("data:") {
        data.split_once(',').map(|(_, rest)| rest).unwrap_or("")
    } else {
        data
    };
    STANDARD.decode(payload).map_err(|err| {
        Error::validation(format!("invalid base64 data: {err}"), Some("data".to_string()))
    })
}
