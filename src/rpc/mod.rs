//! Request/reply over the broker.
//!
//! - [`registry`]: pending requests keyed by correlation id
//! - [`client`]: publishes requests and demultiplexes replies from one
//!   shared reply queue per process

use std::time::Duration;

use shelterhub_client::ClientError;

use crate::bus::BusError;

pub mod client;
pub mod registry;

pub use client::{RpcClient, RpcClientConfig};
pub use registry::{CorrelationId, CorrelationRegistry, WaitHandle};

/// Result type for request/reply operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors surfaced to a caller of [`RpcClient::call`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// No reply within the deadline. Retry with a fresh correlation id.
    #[error("No reply for {correlation_id} within {after:?}")]
    Timeout {
        correlation_id: String,
        after: Duration,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    /// A correlation id was registered twice.
    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelationId(String),

    #[error("Shutting down")]
    ShuttingDown,

    #[error("Failed to encode request: {0}")]
    Encode(String),

    /// A correlated reply arrived but its body is not a reply.
    #[error("Invalid reply: {0}")]
    InvalidReply(String),
}

impl RpcError {
    /// Whether the caller should report "service unavailable".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RpcError::Timeout { .. } | RpcError::Connection(_) | RpcError::ShuttingDown
        )
    }
}

impl From<BusError> for RpcError {
    fn from(e: BusError) -> Self {
        RpcError::Connection(e.to_string())
    }
}

impl From<RpcError> for ClientError {
    fn from(e: RpcError) -> Self {
        if e.is_unavailable() {
            ClientError::Unavailable(e.to_string())
        } else if let RpcError::InvalidReply(detail) = e {
            ClientError::InvalidReply(detail)
        } else {
            ClientError::InvalidArgument(e.to_string())
        }
    }
}
