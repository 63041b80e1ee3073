//! Transport-encoded image decoding.
//!
//! Roster images travel as base64 text inside JSON. Any container format the
//! `image` crate recognises (JPEG, PNG, ...) is accepted and converted to RGB.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unrecognised image data: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode base64 image text into an in-memory RGB image.
///
/// Tolerates embedded whitespace and a leading `data:<mime>;base64,` prefix.
pub fn decode_image(encoded: &str) -> Result<RgbImage, DecodeError> {
    let bytes = decode_base64(encoded)?;
    decode_image_bytes(&bytes)
}

/// Decode raw container bytes (already un-base64'd) into an RGB image.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };

    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(STANDARD.decode(compact)?)
}
