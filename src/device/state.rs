//! Session lifecycle state and per-session frame statistics

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Running,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Frame statistics for a single session
#[derive(Debug, Default)]
pub struct FrameStats {
    pub frames_decoded: AtomicU64,
    pub samples_decoded: AtomicU64,
    pub checksum_errors: AtomicU64,
    pub invalid_lengths: AtomicU64,
    pub sync_timeouts: AtomicU64,
    pub truncated_frames: AtomicU64,
    pub bytes_skipped: AtomicU64,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_samples(&self, count: usize) {
        self.samples_decoded.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_checksum_error(&self) {
        self.checksum_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_length(&self) {
        self.invalid_lengths.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_timeout(&self) {
        self.sync_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_truncated(&self) {
        self.truncated_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, bytes: usize) {
        self.bytes_skipped.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            samples_decoded: self.samples_decoded.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            invalid_lengths: self.invalid_lengths.load(Ordering::Relaxed),
            sync_timeouts: self.sync_timeouts.load(Ordering::Relaxed),
            truncated_frames: self.truncated_frames.load(Ordering::Relaxed),
            bytes_skipped: self.bytes_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`FrameStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_decoded: u64,
    pub samples_decoded: u64,
    pub checksum_errors: u64,
    pub invalid_lengths: u64,
    pub sync_timeouts: u64,
    pub truncated_frames: u64,
    pub bytes_skipped: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frames: {} | Samples: {} | Checksum errors: {} | Bad lengths: {} | Sync timeouts: {} | Truncated: {} | Skipped: {} bytes",
            self.frames_decoded,
            self.samples_decoded,
            self.checksum_errors,
            self.invalid_lengths,
            self.sync_timeouts,
            self.truncated_frames,
            self.bytes_skipped
        )
    }
}
