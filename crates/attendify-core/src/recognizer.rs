//! ArcFace signature extraction via ONNX Runtime.
//!
//! Crops the detected face, resizes it to 112x112 and runs the w600k_r50
//! model. Output signatures are L2-normalised.

use crate::types::{BoundingBox, Signature};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_SIGNATURE_DIM: usize = 512;
/// Extra context around the detector box, as a fraction of its size.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the image")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based signature extractor.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(path = model_path, "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Compute the signature of the face inside `face`.
    pub fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Signature, RecognizerError> {
        let crop = crop_face(image, face).ok_or(RecognizerError::EmptyCrop)?;
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("signature extraction: {e}")))?;

        if raw.len() != ARCFACE_SIGNATURE_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_SIGNATURE_DIM}-dim signature, got {}",
                raw.len()
            )));
        }

        Ok(Signature::new(l2_normalize(raw)))
    }
}

/// Cut the (slightly enlarged) face box out of the image, resized for ArcFace.
fn crop_face(image: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let mx = face.width * CROP_MARGIN;
    let my = face.height * CROP_MARGIN;

    let x0 = (face.x - mx).clamp(0.0, w);
    let y0 = (face.y - my).clamp(0.0, h);
    let x1 = (face.x + face.width + mx).clamp(0.0, w);
    let y1 = (face.y + face.height + my).clamp(0.0, h);

    let (cw, ch) = ((x1 - x0) as u32, (y1 - y0) as u32);
    if cw == 0 || ch == 0 {
        return None;
    }

    let crop = imageops::crop_imm(image, x0 as u32, y0 as u32, cw, ch).to_image();
    Some(imageops::resize(&crop, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle))
}

fn preprocess(face: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_crop_face_resizes_to_input() {
        let image = RgbImage::from_pixel(200, 100, Rgb([50, 60, 70]));
        let crop = crop_face(&image, &face(20.0, 10.0, 60.0, 60.0)).unwrap();
        assert_eq!(crop.dimensions(), (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE));
        assert_eq!(crop.get_pixel(56, 56), &Rgb([50, 60, 70]));
    }

    #[test]
    fn test_crop_face_outside_image() {
        let image = RgbImage::new(100, 100);
        assert!(crop_face(&image, &face(500.0, 500.0, 20.0, 20.0)).is_none());
    }

    #[test]
    fn test_preprocess_channel_order() {
        let crop = RgbImage::from_pixel(ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, Rgb([255, 127, 0]));
        let tensor = preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 3, 3]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 3, 3]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
