//! Service wire messages - one JSON object per line

use serde::{Deserialize, Serialize};

use crate::device::{SessionState, StatsSnapshot};
use crate::error::Error;
use crate::protocol::Sample;

/// Client to service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    State,
    Connect {
        #[serde(default)]
        address: Option<String>,
    },
    Start,
    Stop,
    Disconnect,
    ReadBatch,
    ReadFrame,
    Stats,
    /// Drop every connection and rebind the listening address
    Reload,
    Shutdown,
}

/// Service to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Ok,
    State { state: SessionState },
    Samples { samples: Vec<Sample> },
    Stats { stats: StatsSnapshot },
    Error { kind: ErrorKind, message: String },
}

/// Error category carried across the process boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connect,
    StreamClosed,
    InvalidState,
    Protocol,
    Other,
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}

impl From<Error> for Response {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::Connect { .. } => ErrorKind::Connect,
            Error::StreamClosed(_) => ErrorKind::StreamClosed,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::Protocol(_) | Error::Json(_) => ErrorKind::Protocol,
            Error::Remote(_) | Error::Io(_) => ErrorKind::Other,
        };
        Self::error(kind, e.to_string())
    }
}

/// First line a hosted service writes on its stdout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    pub address: String,
    pub pid: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        assert_eq!(serde_json::to_string(&Request::ReadBatch).unwrap(), r#"{"op":"read_batch"}"#);
        assert_eq!(
            serde_json::to_string(&Request::Connect {
                address: Some("/dev/rfcomm1".to_string())
            })
            .unwrap(),
            r#"{"op":"connect","address":"/dev/rfcomm1"}"#
        );

        let parsed: Request = serde_json::from_str(r#"{"op":"connect"}"#).unwrap();
        assert_eq!(parsed, Request::Connect { address: None });
    }

    #[test]
    fn test_response_carries_samples() {
        let response = Response::Samples {
            samples: vec![Sample::RawWave(-2), Sample::Attention(50)],
        };
        let line = serde_json::to_string(&response).unwrap();
        assert_eq!(
            line,
            r#"{"status":"samples","samples":[{"raw_wave":-2},{"attention":50}]}"#
        );
        assert_eq!(serde_json::from_str::<Response>(&line).unwrap(), response);
    }

    #[test]
    fn test_error_kinds_from_session_errors() {
        let response = Response::from(Error::InvalidState {
            op: "start",
            state: SessionState::Disconnected,
        });
        match response {
            Response::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::InvalidState);
                assert_eq!(message, "cannot start while disconnected");
            }
            other => panic!("unexpected response {:?}", other),
        }

        let response = Response::from(Error::Connect {
            target: "/dev/rfcomm0".to_string(),
            reason: "busy".to_string(),
        });
        assert!(matches!(
            response,
            Response::Error {
                kind: ErrorKind::Connect,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_op_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"format_disk"}"#).is_err());
    }
}
