//! Per-frame render hook.

use attendify_core::{BoundingBox, StudentId};
use attendify_hw::Frame;

pub const MATCHED_COLOR: [u8; 3] = [0, 255, 0];
pub const UNKNOWN_COLOR: [u8; 3] = [255, 0, 0];

/// What the capture loop should do after a frame is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    /// Operator asked to stop the session.
    Abort,
}

/// Box and caption for one face in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub bbox: BoundingBox,
    pub label: String,
    pub color: [u8; 3],
    pub student_id: Option<StudentId>,
}

/// Receives every processed frame with its overlays.
pub trait FrameObserver: Send + Sync {
    fn on_frame(&self, frame: &Frame, overlays: &[Overlay]) -> LoopControl;
}

/// Headless: renders nothing, never aborts.
pub struct NullObserver;

impl FrameObserver for NullObserver {
    fn on_frame(&self, _frame: &Frame, _overlays: &[Overlay]) -> LoopControl {
        LoopControl::Continue
    }
}

/// Writes overlays to the log instead of a display.
pub struct LogObserver;

impl FrameObserver for LogObserver {
    fn on_frame(&self, frame: &Frame, overlays: &[Overlay]) -> LoopControl {
        for overlay in overlays {
            tracing::debug!(
                seq = frame.sequence,
                x = overlay.bbox.x,
                y = overlay.bbox.y,
                w = overlay.bbox.width,
                h = overlay.bbox.height,
                label = %overlay.label,
                "face"
            );
        }
        LoopControl::Continue
    }
}
