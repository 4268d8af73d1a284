//! Configuration loaded from environment variables

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::capture::CaptureFilter;
use crate::error::Result;
use crate::serial::{DEFAULT_DEVICE, DEFAULT_SYNC_RETRIES};
use crate::service::DEFAULT_LISTEN;

/// Per-session settings, passed explicitly to each session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Serial device used when `connect` is given no address
    pub device: String,

    /// Periodic statistics from the read loop
    pub verbose: bool,

    /// Bytes discarded while hunting for sync before a read gives up
    pub sync_retries: usize,

    /// Serial read timeout; bounds how long `stop` can wait on the loop
    pub read_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            verbose: false,
            sync_retries: DEFAULT_SYNC_RETRIES,
            read_timeout: Duration::from_millis(500),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,

    /// Address the hosted service binds
    pub listen: SocketAddr,

    /// Serve this capture file instead of the headset
    pub replay_file: Option<PathBuf>,

    /// Stop capturing after this many seconds
    pub capture_seconds: Option<u64>,

    /// Stop capturing after this many samples
    pub capture_count: Option<usize>,

    /// Sample kinds kept by a capture
    pub capture_kinds: CaptureFilter,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unparsable numbers fall back to their defaults; an unknown capture
    /// selector is an error.
    pub fn from_env() -> Result<Self> {
        let defaults = SessionConfig::default();

        let capture_kinds = std::env::var("MINDSET_CAPTURE_KINDS")
            .ok()
            .map(|s| s.parse::<CaptureFilter>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            session: SessionConfig {
                device: std::env::var("MINDSET_DEVICE").unwrap_or(defaults.device),

                verbose: std::env::var("MINDSET_VERBOSE")
                    .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                    .unwrap_or(false),

                sync_retries: std::env::var("MINDSET_SYNC_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.sync_retries),

                read_timeout: std::env::var("MINDSET_READ_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.read_timeout),
            },

            listen: std::env::var("MINDSET_LISTEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_LISTEN),

            replay_file: std::env::var("MINDSET_REPLAY_FILE").ok().map(PathBuf::from),

            capture_seconds: std::env::var("MINDSET_CAPTURE_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok()),

            capture_count: std::env::var("MINDSET_CAPTURE_COUNT")
                .ok()
                .and_then(|s| s.parse().ok()),

            capture_kinds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Sample;

    #[test]
    fn test_capture_kinds_from_env() {
        std::env::set_var("MINDSET_CAPTURE_KINDS", "alpha");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("'alpha'"), "{}", err);

        std::env::set_var("MINDSET_CAPTURE_KINDS", "raw,esense");
        let config = Config::from_env().unwrap();
        assert!(config.capture_kinds.accepts(&Sample::RawWave(1)));
        assert!(config.capture_kinds.accepts(&Sample::Blink(3)));
        assert!(config.capture_kinds.accepts(&Sample::Attention(5)));
        assert!(!config.capture_kinds.accepts(&Sample::SignalQuality(0)));

        std::env::remove_var("MINDSET_CAPTURE_KINDS");
        let config = Config::from_env().unwrap();
        assert_eq!(config.capture_kinds, CaptureFilter::default());
    }
}
