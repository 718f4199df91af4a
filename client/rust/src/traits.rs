//! Transport seam for typed clients.
//!
//! The broker-backed RPC client in the `shelterhub` crate implements
//! [`Requester`]; tests implement it to script replies.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{Envelope, Reply};

/// Sends one request envelope to a service queue and waits for its reply.
///
/// Implementations map "no reply in time" and "broker unreachable" to
/// [`crate::ClientError::Unavailable`]. A reply with `success: false` is
/// returned as `Ok`; the typed clients turn it into a rejection.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn request(&self, queue: &str, envelope: Envelope) -> Result<Reply>;
}
