//! Roster construction from submitted student records.

use crate::decode::decode_image;
use crate::extractor::SignatureExtractor;
use crate::types::{Roster, RosterEntry, Signature, StudentId, StudentRecord};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("no students data provided")]
    NoStudents,
}

/// Why a student was left out of the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The image could not be decoded.
    Undecodable(String),
    /// The extractor failed on this image.
    ExtractionFailed(String),
    NoFace,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Undecodable(e) => write!(f, "image not decodable: {e}"),
            SkipReason::ExtractionFailed(e) => write!(f, "extraction failed: {e}"),
            SkipReason::NoFace => f.write_str("no face found"),
        }
    }
}

/// Roster plus the students that did not make it in.
#[derive(Debug, Clone)]
pub struct RosterBuild {
    pub roster: Roster,
    pub skipped: Vec<(StudentId, SkipReason)>,
}

/// Builds a [`Roster`] by extracting one signature per student image.
pub struct RosterBuilder<'a> {
    extractor: &'a dyn SignatureExtractor,
}

impl<'a> RosterBuilder<'a> {
    pub fn new(extractor: &'a dyn SignatureExtractor) -> Self {
        Self { extractor }
    }

    /// Build a roster, silently dropping students without a usable face.
    ///
    /// Fails only when `students` is empty.
    pub fn build(&self, students: &[StudentRecord]) -> Result<Roster, RosterError> {
        self.build_report(students).map(|build| build.roster)
    }

    /// Like [`build`](Self::build), also reporting who was skipped and why.
    pub fn build_report(&self, students: &[StudentRecord]) -> Result<RosterBuild, RosterError> {
        if students.is_empty() {
            return Err(RosterError::NoStudents);
        }

        let mut entries = Vec::with_capacity(students.len());
        let mut skipped = Vec::new();

        for student in students {
            match self.signature_for(student) {
                Ok(signature) => entries.push(RosterEntry {
                    student_id: student.id.clone(),
                    full_name: student.full_name.clone(),
                    registration_number: student.regno.clone(),
                    signature,
                }),
                Err(reason) => {
                    tracing::warn!(student = %student.id, %reason, "student excluded from roster");
                    skipped.push((student.id.clone(), reason));
                }
            }
        }

        tracing::info!(
            submitted = students.len(),
            enrolled = entries.len(),
            skipped = skipped.len(),
            "roster built"
        );

        Ok(RosterBuild {
            roster: Roster::new(entries),
            skipped,
        })
    }

    fn signature_for(&self, student: &StudentRecord) -> Result<Signature, SkipReason> {
        let image = decode_image(&student.image).map_err(|e| SkipReason::Undecodable(e.to_string()))?;
        let faces = self
            .extractor
            .extract(&image)
            .map_err(|e| SkipReason::ExtractionFailed(e.to_string()))?;

        // One signature per student: the first detected face.
        faces
            .into_iter()
            .next()
            .map(|face| face.signature)
            .ok_or(SkipReason::NoFace)
    }
}
