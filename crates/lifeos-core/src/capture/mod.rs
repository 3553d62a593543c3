//! Remote capture session lifecycle.
//!
//! This module provides:
//! - `SessionPhase`: Stopped / Starting / Running / Error and its legal transitions
//! - `CaptureService`: The start/end seam, implemented by the authenticated client
//! - `CaptureSessionController`: Exactly-once start and stop per authenticated period

pub mod controller;
pub mod phase;
pub mod service;

pub use controller::{
    CaptureSessionController, CaptureSnapshot, ControllerHandle, ControllerOptions,
};
pub use phase::SessionPhase;
pub use service::CaptureService;
