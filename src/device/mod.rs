//! Headset sessions
//!
//! A session owns one sample source (a live headset or a recorded capture)
//! and exposes the same lifecycle and read operations whichever it is, in
//! this process or behind the hosted service.

mod buffer;
mod replay;
mod session;
mod state;

pub use buffer::SampleBuffer;
pub use replay::{ReplaySession, AGGREGATE_EVERY, WAVE_BATCH};
pub use session::DeviceSession;
pub use state::{FrameStats, SessionState, StatsSnapshot};

use crate::error::Result;
use crate::protocol::Sample;

/// Session contract shared by live, replayed and proxied sessions
pub trait Session: Send + Sync {
    fn state(&self) -> Result<SessionState>;

    /// Open the sample source; `None` selects the configured default address
    fn connect(&self, address: Option<&str>) -> Result<()>;

    /// Begin background accumulation
    fn start(&self) -> Result<()>;

    /// Stop background accumulation; the source stays open
    fn stop(&self) -> Result<()>;

    /// Stop if running and release the source
    fn disconnect(&self) -> Result<()>;

    /// Everything accumulated since the previous call, without blocking
    fn read_batch(&self) -> Result<Vec<Sample>>;

    /// Read and decode a single frame, bypassing the background loop
    fn read_frame(&self) -> Result<Vec<Sample>>;

    fn stats(&self) -> Result<StatsSnapshot>;
}
