use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque student identifier.
///
/// Database-backed callers send integer primary keys, hand-written rosters
/// send strings. The original JSON form is preserved when echoed back.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StudentId {
    Number(i64),
    Text(String),
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StudentId::Number(n) => write!(f, "{n}"),
            StudentId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for StudentId {
    fn from(n: i64) -> Self {
        StudentId::Number(n)
    }
}

impl From<&str> for StudentId {
    fn from(s: &str) -> Self {
        StudentId::Text(s.to_string())
    }
}

impl From<String> for StudentId {
    fn from(s: String) -> Self {
        StudentId::Text(s)
    }
}

/// Bounding box for a detected face, in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Fixed-length face signature (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub values: Vec<f32>,
}

impl Signature {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Signature) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Cosine distance, `1 - similarity`, in [0, 2].
    ///
    /// Signatures of different lengths come from different models and are
    /// infinitely far apart.
    pub fn distance(&self, other: &Signature) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        1.0 - self.similarity(other)
    }
}

/// One face found in an image: where it is and who it looks like.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceSignature {
    pub bbox: BoundingBox,
    pub signature: Signature,
}

/// A student as submitted by the caller, image still transport-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: StudentId,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub regno: String,
    /// Base64 image bytes. The one-shot scan payload names this `image_bytes`.
    #[serde(default, rename = "image_bytea", alias = "image_bytes")]
    pub image: String,
}

/// A matchable student. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub student_id: StudentId,
    pub full_name: String,
    pub registration_number: String,
    pub signature: Signature,
}

impl RosterEntry {
    /// Overlay label, e.g. `Ada Lovelace (REG-001)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.full_name, self.registration_number)
    }
}

/// Ordered sequence of matchable students for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RosterEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical() {
        let a = Signature::new(vec![0.25, 0.5, 0.75]);
        assert!(a.distance(&a.clone()).abs() < 1e-6);
    }

    #[test]
    fn test_distance_is_cosine() {
        let a = Signature::new(vec![1.0, 0.0]);
        assert!((a.distance(&Signature::new(vec![0.6, 0.8])) - 0.4).abs() < 1e-6);
        assert!((a.distance(&Signature::new(vec![0.0, 3.0])) - 1.0).abs() < 1e-6);
        assert!((a.distance(&Signature::new(vec![-2.0, 0.0])) - 2.0).abs() < 1e-6);
        // Scale does not matter, only direction.
        assert!(a.distance(&Signature::new(vec![5.0, 0.0])).abs() < 1e-6);
    }

    #[test]
    fn test_distance_zero_vector() {
        let a = Signature::new(vec![1.0, 0.0]);
        assert_eq!(a.distance(&Signature::new(vec![0.0, 0.0])), 1.0);
    }

    #[test]
    fn test_distance_length_mismatch() {
        let a = Signature::new(vec![1.0, 0.0]);
        let b = Signature::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.distance(&b), f32::INFINITY);
    }

    #[test]
    fn test_student_id_keeps_json_form() {
        let ids: Vec<StudentId> = serde_json::from_str(r#"[17, "s1"]"#).unwrap();
        assert_eq!(ids, vec![StudentId::Number(17), StudentId::from("s1")]);
        assert_eq!(serde_json::to_string(&ids).unwrap(), r#"[17,"s1"]"#);
    }

    #[test]
    fn test_student_record_accepts_both_image_field_names() {
        let a: StudentRecord =
            serde_json::from_str(r#"{"id": 1, "full_name": "A", "regno": "R1", "image_bytea": "aGk="}"#)
                .unwrap();
        let b: StudentRecord = serde_json::from_str(r#"{"id": 2, "image_bytes": "aGk="}"#).unwrap();
        assert_eq!(a.image, "aGk=");
        assert_eq!(b.image, "aGk=");
        assert_eq!(b.full_name, "");
        assert_eq!(b.regno, "");
    }

    #[test]
    fn test_roster_entry_label() {
        let entry = RosterEntry {
            student_id: StudentId::from("s1"),
            full_name: "Ada Lovelace".into(),
            registration_number: "REG-001".into(),
            signature: Signature::new(vec![1.0]),
        };
        assert_eq!(entry.label(), "Ada Lovelace (REG-001)");
    }
}
