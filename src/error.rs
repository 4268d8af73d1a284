//! Crate error type

use std::io;

use thiserror::Error;

use crate::device::SessionState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Device could not be opened, or a hosted service never became ready
    #[error("cannot connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    /// Byte source closed or failed underneath a session
    #[error("byte stream closed: {0}")]
    StreamClosed(#[source] io::Error),

    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: SessionState },

    /// Error reported by a session in another process
    #[error("remote session error: {0}")]
    Remote(String),

    /// Malformed message on the service connection
    #[error("service protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}
