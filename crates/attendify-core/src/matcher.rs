use crate::types::{Roster, RosterEntry, Signature};

/// Default maximum cosine distance for a positive match.
///
/// Accepts ArcFace pairs with similarity of at least 0.6, to keep false
/// positives down in a classroom.
pub const DEFAULT_TOLERANCE: f32 = 0.4;

/// Strategy for finding a roster entry that matches a live signature.
pub trait Matcher {
    fn find<'r>(&self, roster: &'r Roster, live: &Signature, tolerance: f32) -> Option<&'r RosterEntry>;
}

/// First roster entry within tolerance wins, in roster order.
///
/// A nearer entry later in the roster is never considered once an earlier
/// one qualifies.
pub struct FirstMatch;

impl Matcher for FirstMatch {
    fn find<'r>(&self, roster: &'r Roster, live: &Signature, tolerance: f32) -> Option<&'r RosterEntry> {
        roster
            .iter()
            .find(|entry| entry.signature.distance(live) <= tolerance)
    }
}
