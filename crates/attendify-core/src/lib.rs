//! attendify-core — roster building and live face matching.
//!
//! Student images are turned into signatures with SCRFD detection and
//! ArcFace recognition on ONNX Runtime; live signatures are matched against
//! the roster under a distance tolerance.

pub mod decode;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod presence;
pub mod recognizer;
pub mod roster;
pub mod types;

pub use decode::{decode_image, DecodeError};
pub use extractor::{ExtractError, OnnxExtractor, SignatureExtractor};
pub use matcher::{FirstMatch, Matcher, DEFAULT_TOLERANCE};
pub use presence::PresenceTracker;
pub use roster::{RosterBuild, RosterBuilder, RosterError, SkipReason};
pub use types::{BoundingBox, FaceSignature, Roster, RosterEntry, Signature, StudentId, StudentRecord};

/// Default directory containing ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/attendify/models")
}
