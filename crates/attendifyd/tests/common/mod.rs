//! Fakes for the extraction and capture capabilities.
//!
//! Faces are encoded in pixel (0,0): a red value of 0 means no face, any
//! other value `v` is one face whose unit signature points `v` degrees round
//! the circle. Codes 90 or more degrees apart never match at 0.4.

#![allow(dead_code)]

use attendify_core::{BoundingBox, ExtractError, FaceSignature, Signature, SignatureExtractor, StudentId, StudentRecord};
use attendify_hw::{CameraError, CaptureDevice, DeviceOpener, Frame};
use attendifyd::{FrameObserver, LoopControl, Overlay};
use base64::Engine;
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const BLANK: u8 = 0;
pub const FACE_A: u8 = 10;
pub const FACE_B: u8 = 100;
pub const STRANGER: u8 = 200;

pub fn coded_image(code: u8) -> RgbImage {
    RgbImage::from_pixel(4, 4, Rgb([code, 0, 0]))
}

pub fn encoded_image(code: u8) -> String {
    let mut png = Vec::new();
    coded_image(code)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    base64::engine::general_purpose::STANDARD.encode(png)
}

pub fn student(id: &str, code: u8) -> StudentRecord {
    StudentRecord {
        id: StudentId::from(id),
        full_name: format!("Student {id}"),
        regno: format!("REG-{id}"),
        image: encoded_image(code),
    }
}

pub fn ids(list: &[&str]) -> Vec<StudentId> {
    list.iter().map(|s| StudentId::from(*s)).collect()
}

pub struct CodedExtractor;

impl SignatureExtractor for CodedExtractor {
    fn extract(&self, image: &RgbImage) -> Result<Vec<FaceSignature>, ExtractError> {
        let code = image.get_pixel(0, 0)[0];
        if code == BLANK {
            return Ok(Vec::new());
        }
        let angle = f32::from(code).to_radians();
        Ok(vec![FaceSignature {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 4.0,
                height: 4.0,
                confidence: 0.99,
            },
            signature: Signature::new(vec![angle.cos(), angle.sin()]),
        }])
    }
}

/// One scripted read: a frame with the given face code, or a read failure.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Face(u8),
    Fail,
}

/// Counters shared by every device a [`FakeOpener`] hands out.
#[derive(Default)]
pub struct DeviceStats {
    pub opens: AtomicUsize,
    pub releases: AtomicUsize,
    pub reads: AtomicUsize,
    pub exhausted: AtomicBool,
}

impl DeviceStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }
}

struct FakeDevice {
    script: VecDeque<Step>,
    /// Served once the script runs out; `None` fails every read.
    idle: Option<u8>,
    sequence: u32,
    stats: Arc<DeviceStats>,
}

impl CaptureDevice for FakeDevice {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        let step = match self.script.pop_front() {
            Some(step) => step,
            None => {
                self.stats.exhausted.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2));
                self.idle.map_or(Step::Fail, Step::Face)
            }
        };
        self.sequence += 1;
        match step {
            Step::Face(code) => Ok(Frame::new(coded_image(code), self.sequence)),
            Step::Fail => Err(CameraError::CaptureFailed("scripted failure".into())),
        }
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeOpener {
    script: Mutex<Vec<Step>>,
    idle: Option<u8>,
    /// Time `open` takes before handing out a device.
    open_delay: Duration,
    pub fail: AtomicBool,
    pub stats: Arc<DeviceStats>,
}

impl FakeOpener {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Self::with_idle(script, None)
    }

    pub fn with_idle(script: Vec<Step>, idle: Option<u8>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            idle,
            open_delay: Duration::ZERO,
            fail: AtomicBool::new(false),
            stats: Arc::new(DeviceStats::default()),
        })
    }

    pub fn slow(idle: Option<u8>, open_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Vec::new()),
            idle,
            open_delay,
            fail: AtomicBool::new(false),
            stats: Arc::new(DeviceStats::default()),
        })
    }

    pub fn failing() -> Arc<Self> {
        let opener = Self::new(Vec::new());
        opener.fail.store(true, Ordering::SeqCst);
        opener
    }

    pub fn set_script(&self, script: Vec<Step>) {
        *self.script.lock().unwrap() = script;
        self.stats.exhausted.store(false, Ordering::SeqCst);
    }
}

impl DeviceOpener for FakeOpener {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
        std::thread::sleep(self.open_delay);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CameraError::DeviceNotFound("/dev/fake".into()));
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDevice {
            script: self.script.lock().unwrap().clone().into(),
            idle: self.idle,
            sequence: 0,
            stats: Arc::clone(&self.stats),
        }))
    }

    fn describe(&self) -> String {
        "/dev/fake".into()
    }
}

/// Counts frames and optionally aborts after `abort_after` of them.
#[derive(Default)]
pub struct CountingObserver {
    pub frames: AtomicUsize,
    pub overlays: Mutex<Vec<Overlay>>,
    pub abort_after: Option<usize>,
}

impl FrameObserver for CountingObserver {
    fn on_frame(&self, _frame: &Frame, overlays: &[Overlay]) -> LoopControl {
        let seen = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
        self.overlays.lock().unwrap().extend_from_slice(overlays);
        match self.abort_after {
            Some(limit) if seen >= limit => LoopControl::Abort,
            _ => LoopControl::Continue,
        }
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
