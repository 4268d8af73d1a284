//! NeuroSky Mindset capture
//!
//! Decodes the ThinkGear serial protocol spoken by the Mindset headset into
//! typed samples, accumulates them behind a session lifecycle, and can host
//! a session in a separate process.

pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod protocol;
pub mod serial;
pub mod service;

pub use capture::{CaptureFilter, CaptureSession};
pub use config::SessionConfig;
pub use device::{DeviceSession, ReplaySession, Session, SessionState, StatsSnapshot};
pub use error::{Error, Result};
pub use protocol::{EegBands, Sample, SampleKind};
