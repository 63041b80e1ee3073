use crate::types::StudentId;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Set of students recognised in the current session.
///
/// Safe to share between the capture loop and request handlers. Snapshots
/// list ids in first-recognition order.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    inner: Mutex<Seen>,
}

#[derive(Debug, Default)]
struct Seen {
    ids: HashSet<StudentId>,
    order: Vec<StudentId>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as present. Returns `false` if it was already recorded.
    pub fn add(&self, id: StudentId) -> bool {
        let mut seen = self.lock();
        if !seen.ids.insert(id.clone()) {
            return false;
        }
        seen.order.push(id);
        true
    }

    pub fn clear(&self) {
        let mut seen = self.lock();
        seen.ids.clear();
        seen.order.clear();
    }

    pub fn snapshot(&self) -> Vec<StudentId> {
        self.lock().order.clone()
    }

    /// Snapshot and clear in one step.
    pub fn drain(&self) -> Vec<StudentId> {
        let mut seen = self.lock();
        seen.ids.clear();
        std::mem::take(&mut seen.order)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &StudentId) -> bool {
        self.lock().ids.contains(id)
    }

    // Every mutation leaves both fields consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Seen> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
