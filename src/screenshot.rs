//! Screenshot intake: data-URL decoding and PNG validation.
//!
//! The editor submits its canvas as `data:image/png;base64,...`. Only the
//! header is decoded here; the bytes are stored verbatim.

use base64::{Engine as _, engine::general_purpose};
use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

pub const DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Error, Debug)]
pub enum ScreenshotError {
    #[error("Invalid screenshot, expected data:image/png;base64,...")]
    NotPngDataUrl,
    #[error("Failed to decode screenshot: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid screenshot: {0}")]
    Image(#[from] image::ImageError),
}

/// Strip the PNG data-URL prefix and decode the payload.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, ScreenshotError> {
    let payload = url
        .strip_prefix(DATA_URL_PREFIX)
        .ok_or(ScreenshotError::NotPngDataUrl)?;
    Ok(general_purpose::STANDARD.decode(payload)?)
}

/// Check that `bytes` is a PNG and return its `(width, height)`.
pub fn validate_png(bytes: &[u8]) -> Result<(u32, u32), ScreenshotError> {
    let reader = ImageReader::with_format(Cursor::new(bytes), ImageFormat::Png);
    Ok(reader.into_dimensions()?)
}
