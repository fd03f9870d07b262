//! # Error Types
//!
//! Errors raised by the communication layer. Transport and storage failures
//! travel to callers as `Err` values on callbacks and futures; only locally
//! invalid preconditions (such as a message without a `protocol_type`) are
//! returned synchronously from `send`.

use std::io;
use std::time::Duration;

/// Errors produced by the codec, the connection managers and dispatch.
///
/// `Clone` so a single transport failure can be handed to every pending
/// callback of a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetError {
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("message has no protocol_type")]
    MissingDiscriminant,

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("not connected to {address}")]
    NotConnected { address: String },

    #[error("unknown protocol type `{kind}`")]
    UnknownProtocolType { kind: String },

    #[error("missing or invalid field `{field}`")]
    InvalidField { field: String },

    #[error("request rejected: {reason}")]
    Rejected { reason: String },

    #[error("no response within {after:?}")]
    Timeout { after: Duration },
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        NetError::Transport {
            reason: err.to_string(),
        }
    }
}

/// Errors reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("{what} already exists")]
    Conflict { what: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_become_transport_errors() {
        let err: NetError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone").into();
        assert_eq!(
            err,
            NetError::Transport {
                reason: "pipe gone".to_string()
            }
        );
    }

    #[test]
    fn error_display_messages() {
        let err = NetError::UnknownProtocolType {
            kind: "teleport".to_string(),
        };
        assert_eq!(err.to_string(), "unknown protocol type `teleport`");

        let err = StorageError::Conflict {
            what: "username 'alice'".to_string(),
        };
        assert_eq!(err.to_string(), "username 'alice' already exists");
    }
}
