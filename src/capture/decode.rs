use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageMime {
    Png,
    Jpeg,
}

impl ImageMime {
    const ALL: [ImageMime; 2] = [ImageMime::Png, ImageMime::Jpeg];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageMime::Png => "image/png",
            ImageMime::Jpeg => "image/jpeg",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            ImageMime::Png => "data:image/png;base64,",
            ImageMime::Jpeg => "data:image/jpeg;base64,",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            ImageMime::Png => ImageFormat::Png,
            ImageMime::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// Payload handed over by the capture provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenCapture {
    /// Base64 image behind a `data:image/<png|jpeg>;base64,` prefix.
    pub data: String,
    pub width: u32,
    pub height: u32,
}

pub fn encode_data_uri(mime: ImageMime, bytes: &[u8]) -> String {
    format!("{}{}", mime.prefix(), BASE64.encode(bytes))
}

/// Strips the data-URI prefix, decodes the base64 body and checks that the
/// bytes really are the declared image type.
pub fn decode_payload(data: &str) -> Result<(ImageMime, Vec<u8>), CaptureError> {
    let (mime, body) = ImageMime::ALL
        .iter()
        .find_map(|mime| data.strip_prefix(mime.prefix()).map(|body| (*mime, body)))
        .ok_or_else(|| {
            let shown: String = data.chars().take(32).collect();
            CaptureError::UnsupportedFormat(shown)
        })?;

    let bytes = BASE64.decode(body.trim())?;

    match image::guess_format(&bytes) {
        Ok(found) if found == mime.image_format() => Ok((mime, bytes)),
        Ok(found) => Err(CaptureError::FormatMismatch {
            declared: mime.as_str().into(),
            found: format!("{found:?}"),
        }),
        Err(_) => Err(CaptureError::FormatMismatch {
            declared: mime.as_str().into(),
            found: "unrecognized bytes".into(),
        }),
    }
}
