//! attendifyd — live attendance daemon.
//!
//! Holds a single camera session, matches detected faces against the
//! roster submitted on start and exposes the lifecycle over HTTP.

pub mod api;
pub mod config;
pub mod observer;
pub mod session;

pub use api::{router, AppState};
pub use config::{Config, ConfigError};
pub use observer::{FrameObserver, LogObserver, LoopControl, NullObserver, Overlay};
pub use session::{
    CameraSession, LoopExit, LoopSettings, ScanLimits, SessionError, SessionInfo, SessionState, StartOutcome,
    StatusReport, StopOutcome,
};
