// src/error.rs
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the queue layer.
///
/// Handler failures are deliberately not part of this taxonomy: a job handler
/// returns `anyhow::Result`, and the worker logs and swallows whatever comes
/// back. Everything that can cross a socket boundary lands here.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The endpoint could not be bound, resolved or reached.
    #[error("cannot reach {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    /// Operation attempted on a handle that is not connected.
    #[error("operation attempted on a disconnected queue handle")]
    NotConnected,

    /// The payload could not be encoded for transport.
    #[error("failed to encode payload: {0}")]
    Serialization(String),

    /// An incoming message could not be decoded.
    #[error("failed to decode payload: {0}")]
    Deserialization(String),

    /// The broker did not acknowledge within the requested window.
    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),

    /// A broker cycle failed for a reason other than the above.
    #[error("broker cycle failed: {0}")]
    Cycle(String),
}

impl QueueError {
    pub(crate) fn connection(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        QueueError::Connection {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// True for per-message failures a worker may log and skip.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QueueError::Serialization(_) | QueueError::Deserialization(_)
        )
    }
}
