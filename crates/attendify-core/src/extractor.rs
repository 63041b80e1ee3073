//! Face signature extraction capability.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::FaceSignature;
use image::RgbImage;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("extractor unavailable: {0}")]
    Unavailable(String),
}

/// Turns a color image into one signature per detected face.
///
/// Faces are returned in detection order. An image with no faces yields an
/// empty vector, not an error.
pub trait SignatureExtractor: Send + Sync {
    fn extract(&self, image: &RgbImage) -> Result<Vec<FaceSignature>, ExtractError>;
}

/// SCRFD detection followed by ArcFace signatures, both on ONNX Runtime.
///
/// Inference sessions need exclusive access, so concurrent callers are
/// serialised on the internal locks.
pub struct OnnxExtractor {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxExtractor {
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }
}

impl SignatureExtractor for OnnxExtractor {
    fn extract(&self, image: &RgbImage) -> Result<Vec<FaceSignature>, ExtractError> {
        // A panic mid-inference leaves the session itself intact.
        let boxes = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect(image)?;
        if boxes.is_empty() {
            return Ok(Vec::new());
        }

        let mut recognizer = self.recognizer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            match recognizer.extract(image, &bbox) {
                Ok(signature) => faces.push(FaceSignature { bbox, signature }),
                Err(RecognizerError::EmptyCrop) => {
                    tracing::debug!(?bbox, "face box outside image, skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(faces)
    }
}
