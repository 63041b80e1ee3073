//! Camera session lifecycle and the live matching loop.
//!
//! One session at a time owns the capture device. The loop runs on a
//! dedicated OS thread and talks to request handlers only through the
//! state word, the stop flag and the presence set.

use crate::observer::{FrameObserver, LoopControl, Overlay, MATCHED_COLOR, UNKNOWN_COLOR};
use attendify_core::{
    FirstMatch, Matcher, PresenceTracker, Roster, RosterBuilder, RosterError, SignatureExtractor, StudentId,
    StudentRecord,
};
use attendify_hw::{CameraError, CaptureDevice, DeviceOpener, Frame};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] RosterError),
    #[error("no valid student faces detected")]
    NoValidFaces,
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(#[source] CameraError),
    #[error("camera already running")]
    Busy,
    #[error("failed to spawn camera thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::Stopping,
            _ => SessionState::Stopped,
        }
    }
}

/// Capture loop tuning.
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Maximum signature distance for a positive match.
    pub tolerance: f32,
    /// Pause after a failed frame read.
    pub retry_delay: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tolerance: attendify_core::DEFAULT_TOLERANCE,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Exit conditions for a one-shot scan. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanLimits {
    pub max_frames: Option<usize>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub roster_size: usize,
}

impl SessionInfo {
    fn new(roster_size: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            roster_size,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StartOutcome {
    Started(SessionInfo),
    AlreadyRunning,
}

#[derive(Debug, Clone)]
pub struct StopOutcome {
    /// Students recognised up to the stop call.
    pub detected: Vec<StudentId>,
    /// False when there was nothing to stop.
    pub was_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: SessionState,
    pub session: Option<SessionInfo>,
    pub detected_count: usize,
    pub tolerance: f32,
    pub device: String,
}

/// Why the capture loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Signaled,
    Aborted,
    FrameLimit,
    Deadline,
}

/// State shared between request handlers and the capture thread.
struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
    presence: PresenceTracker,
    info: Mutex<Option<SessionInfo>>,
    /// Serialises start claims against stop signals.
    control: Mutex<()>,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn control(&self) -> MutexGuard<'_, ()> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn info(&self) -> Option<SessionInfo> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_info(&self, info: Option<SessionInfo>) {
        *self.info.lock().unwrap_or_else(PoisonError::into_inner) = info;
    }

    fn finish(&self) {
        self.set_info(None);
        self.set_state(SessionState::Stopped);
    }
}

/// Ownership of the Stopped → Starting transition. Falls back to Stopped
/// on drop unless handed over to a running worker.
struct Claim<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl<'a> Claim<'a> {
    fn acquire(shared: &'a Shared) -> Option<Self> {
        let _control = shared.control();
        if !shared.transition(SessionState::Stopped, SessionState::Starting) {
            return None;
        }
        shared.stop.store(false, Ordering::Release);
        Some(Self { shared, armed: true })
    }

    fn hand_over(mut self) {
        self.armed = false;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.finish();
        }
    }
}

/// Marks the session Stopped when the capture thread exits, panics included.
struct WorkerExit<'a>(&'a Shared);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Live attendance session: owns the device while Running.
pub struct CameraSession {
    shared: Arc<Shared>,
    opener: Arc<dyn DeviceOpener>,
    extractor: Arc<dyn SignatureExtractor>,
    observer: Arc<dyn FrameObserver>,
    settings: LoopSettings,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CameraSession {
    pub fn new(
        opener: Arc<dyn DeviceOpener>,
        extractor: Arc<dyn SignatureExtractor>,
        observer: Arc<dyn FrameObserver>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(SessionState::Stopped as u8),
                stop: AtomicBool::new(false),
                presence: PresenceTracker::new(),
                info: Mutex::new(None),
                control: Mutex::new(()),
            }),
            opener,
            extractor,
            observer,
            settings,
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Build the roster, open the device and spawn the capture thread.
    ///
    /// Blocks for roster extraction and device open; call from a blocking
    /// context. A second start while a session is active is a no-op.
    pub fn start(&self, students: &[StudentRecord]) -> Result<StartOutcome, SessionError> {
        if students.is_empty() {
            return Err(RosterError::NoStudents.into());
        }
        let Some(claim) = Claim::acquire(&self.shared) else {
            tracing::info!("camera already running");
            return Ok(StartOutcome::AlreadyRunning);
        };
        self.reap_worker();

        let roster = self.build_roster(students)?;
        let device = self.open_device()?;

        self.shared.presence.clear();
        let info = SessionInfo::new(roster.len());
        self.shared.set_info(Some(info.clone()));
        self.shared.set_state(SessionState::Running);

        let capture = self.capture_loop(roster);
        let shared = Arc::clone(&self.shared);
        let session_id = info.id;
        // Held until the handle is stored, so a later start reaps this worker
        // even if it exits before `spawn` returns.
        let mut slot = self.worker_slot();
        let handle = std::thread::Builder::new()
            .name("attendify-camera".into())
            .spawn(move || {
                let _exit = WorkerExit(&shared);
                let exit = capture.run(device, &shared.stop, &shared.presence, ScanLimits::default());
                tracing::info!(
                    session = %session_id,
                    ?exit,
                    detected = shared.presence.len(),
                    "camera session ended"
                );
            })
            .map_err(SessionError::Spawn)?;

        claim.hand_over();
        *slot = Some(handle);
        drop(slot);

        tracing::info!(
            session = %info.id,
            roster = info.roster_size,
            device = %self.opener.describe(),
            "camera session started"
        );
        Ok(StartOutcome::Started(info))
    }

    /// Signal the running session to stop and hand back (and clear) the
    /// students recognised so far. Idempotent.
    ///
    /// Returns without waiting for the device to be released.
    pub fn stop(&self) -> StopOutcome {
        let was_active = {
            let _control = self.shared.control();
            let state = self.shared.state();
            if state != SessionState::Stopped {
                self.shared.stop.store(true, Ordering::Release);
                self.shared.transition(SessionState::Running, SessionState::Stopping);
            }
            state != SessionState::Stopped
        };

        let detected = self.shared.presence.drain();
        tracing::info!(was_active, detected = detected.len(), "stop requested");
        StopOutcome { detected, was_active }
    }

    /// Run a single bounded scan on the calling thread and return the
    /// students recognised, in recognition order.
    ///
    /// Shares the device claim with [`start`](Self::start): fails with
    /// [`SessionError::Busy`] while a session is active.
    pub fn scan_once(&self, students: &[StudentRecord], limits: ScanLimits) -> Result<Vec<StudentId>, SessionError> {
        if students.is_empty() {
            return Err(RosterError::NoStudents.into());
        }
        let claim = Claim::acquire(&self.shared).ok_or(SessionError::Busy)?;
        self.reap_worker();

        let roster = match self.build_roster(students) {
            Ok(roster) => roster,
            Err(SessionError::NoValidFaces) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let device = self.open_device()?;

        self.shared.set_info(Some(SessionInfo::new(roster.len())));
        self.shared.set_state(SessionState::Running);

        let found = PresenceTracker::new();
        let exit = self.capture_loop(roster).run(device, &self.shared.stop, &found, limits);
        drop(claim);

        let matched = found.drain();
        tracing::info!(?exit, matched = matched.len(), "scan finished");
        Ok(matched)
    }

    /// Students recognised so far, without clearing.
    pub fn presence_snapshot(&self) -> Vec<StudentId> {
        self.shared.presence.snapshot()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            state: self.shared.state(),
            session: self.shared.info(),
            detected_count: self.shared.presence.len(),
            tolerance: self.settings.tolerance,
            device: self.opener.describe(),
        }
    }

    /// Block until the capture thread, if any, has exited.
    pub fn join(&self) {
        self.reap_worker();
    }

    /// Stop any session and wait for the device to be released.
    pub fn shutdown(&self) {
        self.stop();
        self.join();
    }

    fn build_roster(&self, students: &[StudentRecord]) -> Result<Roster, SessionError> {
        let roster = RosterBuilder::new(self.extractor.as_ref()).build(students)?;
        if roster.is_empty() {
            tracing::error!(submitted = students.len(), "no valid student faces detected");
            return Err(SessionError::NoValidFaces);
        }
        Ok(roster)
    }

    fn open_device(&self) -> Result<Box<dyn CaptureDevice>, SessionError> {
        self.opener.open().map_err(|e| {
            tracing::error!(device = %self.opener.describe(), error = %e, "could not open camera");
            SessionError::DeviceUnavailable(e)
        })
    }

    fn capture_loop(&self, roster: Roster) -> CaptureLoop {
        CaptureLoop {
            roster,
            extractor: Arc::clone(&self.extractor),
            observer: Arc::clone(&self.observer),
            settings: self.settings,
        }
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reap_worker(&self) {
        let handle = self.worker_slot().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("camera thread panicked");
            }
        }
    }
}

/// Everything one run of the capture loop needs, owned by that run.
struct CaptureLoop {
    roster: Roster,
    extractor: Arc<dyn SignatureExtractor>,
    observer: Arc<dyn FrameObserver>,
    settings: LoopSettings,
}

impl CaptureLoop {
    /// Pull, match and record frames until a stop condition holds. The
    /// device is released before returning.
    fn run(
        &self,
        mut device: Box<dyn CaptureDevice>,
        stop: &AtomicBool,
        presence: &PresenceTracker,
        limits: ScanLimits,
    ) -> LoopExit {
        let deadline = limits.timeout.map(|t| Instant::now() + t);
        let mut processed = 0usize;
        let mut read_failures = 0u64;

        let exit = loop {
            if stop.load(Ordering::Acquire) {
                break LoopExit::Signaled;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break LoopExit::Deadline;
            }
            if limits.max_frames.is_some_and(|max| processed >= max) {
                break LoopExit::FrameLimit;
            }

            let frame = match device.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    read_failures += 1;
                    tracing::warn!(error = %e, "failed to read frame from camera");
                    std::thread::sleep(self.settings.retry_delay);
                    continue;
                }
            };
            processed += 1;

            let overlays = self.process_frame(&frame, presence);
            if self.observer.on_frame(&frame, &overlays) == LoopControl::Abort {
                tracing::info!("operator abort");
                break LoopExit::Aborted;
            }
        };

        drop(device);
        tracing::debug!(frames = processed, read_failures, ?exit, "capture loop exited");
        exit
    }

    /// Match every face in detection order and record recognised students.
    fn process_frame(&self, frame: &Frame, presence: &PresenceTracker) -> Vec<Overlay> {
        let faces = match self.extractor.extract(&frame.image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "face extraction failed, frame skipped");
                return Vec::new();
            }
        };

        faces
            .into_iter()
            .map(|face| match FirstMatch.find(&self.roster, &face.signature, self.settings.tolerance) {
                Some(entry) => {
                    if presence.add(entry.student_id.clone()) {
                        tracing::info!(
                            student = %entry.student_id,
                            name = %entry.full_name,
                            regno = %entry.registration_number,
                            "student recognized"
                        );
                    }
                    Overlay {
                        bbox: face.bbox,
                        label: entry.label(),
                        color: MATCHED_COLOR,
                        student_id: Some(entry.student_id.clone()),
                    }
                }
                None => Overlay {
                    bbox: face.bbox,
                    label: "Unknown".to_string(),
                    color: UNKNOWN_COLOR,
                    student_id: None,
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;
    use attendify_core::{ExtractError, FaceSignature};
    use image::RgbImage;
    use std::sync::atomic::AtomicUsize;

    struct NoFaces;

    impl SignatureExtractor for NoFaces {
        fn extract(&self, _image: &RgbImage) -> Result<Vec<FaceSignature>, ExtractError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct CountingOpener {
        opens: AtomicUsize,
    }

    impl DeviceOpener for CountingOpener {
        fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(CameraError::DeviceNotFound("/dev/null-camera".into()))
        }

        fn describe(&self) -> String {
            "/dev/null-camera".into()
        }
    }

    fn session(opener: Arc<CountingOpener>) -> CameraSession {
        CameraSession::new(opener, Arc::new(NoFaces), Arc::new(NullObserver), LoopSettings::default())
    }

    fn student(id: &str) -> StudentRecord {
        StudentRecord {
            id: StudentId::from(id),
            full_name: String::new(),
            regno: String::new(),
            image: String::new(),
        }
    }

    #[test]
    fn test_state_roundtrip() {
        for s in [
            SessionState::Stopped,
            SessionState::Starting,
            SessionState::Running,
            SessionState::Stopping,
        ] {
            assert_eq!(SessionState::from_u8(s as u8), s);
        }
    }

    #[test]
    fn test_start_without_students() {
        let opener = Arc::new(CountingOpener::default());
        let session = session(Arc::clone(&opener));
        assert!(matches!(session.start(&[]), Err(SessionError::InvalidInput(_))));
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_start_without_faces_never_opens_device() {
        let opener = Arc::new(CountingOpener::default());
        let session = session(Arc::clone(&opener));
        assert!(matches!(session.start(&[student("a")]), Err(SessionError::NoValidFaces)));
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let session = session(Arc::new(CountingOpener::default()));
        let outcome = session.stop();
        assert!(!outcome.was_active);
        assert!(outcome.detected.is_empty());
        assert_eq!(session.state(), SessionState::Stopped);
        // A stray stop does not poison the next claim.
        assert!(Claim::acquire(&session.shared).is_some());
    }

    #[test]
    fn test_claim_is_exclusive_and_reverts() {
        let session = session(Arc::new(CountingOpener::default()));
        let claim = Claim::acquire(&session.shared).unwrap();
        assert_eq!(session.state(), SessionState::Starting);
        assert!(Claim::acquire(&session.shared).is_none());
        drop(claim);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_scan_with_faceless_roster_returns_empty() {
        let opener = Arc::new(CountingOpener::default());
        let session = session(Arc::clone(&opener));
        let matched = session.scan_once(&[student("a")], ScanLimits::default()).unwrap();
        assert!(matched.is_empty());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), SessionState::Stopped);
    }
}
