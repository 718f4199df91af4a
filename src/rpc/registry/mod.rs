//! Correlation registry: in-flight requests keyed by correlation id.
//!
//! Every registered id leaves the registry exactly once, through one of
//! `resolve`, `expire`, `cancel`, `reap_expired` or `fail_all`. Each path
//! removes the entry under the same lock that finds it, so a request is
//! settled at most once and a late or foreign reply is discarded.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shelterhub_client::Reply;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Result, RpcError};

/// Opaque, globally unique token linking a request to its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Fresh UUID v4 id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for CorrelationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Longest wait a deadline is allowed to express.
pub const MAX_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// `start + timeout`, capped at [`MAX_WAIT`] so it cannot overflow.
pub fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout.min(MAX_WAIT))
        .unwrap_or(start)
}

type Slot = oneshot::Sender<Result<Reply>>;

struct PendingRequest {
    reply_address: String,
    created_at: Instant,
    deadline: Instant,
    slot: Slot,
}

#[derive(Default)]
struct Inner {
    pending: Mutex<HashMap<CorrelationId, PendingRequest>>,
    /// Signalled whenever the registry becomes empty.
    emptied: Notify,
}

/// Tracks pending requests and hands each reply to its waiter.
#[derive(Clone, Default)]
pub struct CorrelationRegistry {
    inner: Arc<Inner>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request.
    ///
    /// Fails with [`RpcError::DuplicateCorrelationId`] if `id` is already
    /// pending.
    pub fn register(
        &self,
        id: CorrelationId,
        reply_address: impl Into<String>,
        timeout: Duration,
    ) -> Result<WaitHandle> {
        let mut pending = self.inner.pending.lock();
        if pending.contains_key(&id) {
            return Err(RpcError::DuplicateCorrelationId(id.to_string()));
        }

        let (slot, rx) = oneshot::channel();
        let created_at = Instant::now();
        let deadline = deadline_after(created_at, timeout);
        pending.insert(
            id.clone(),
            PendingRequest {
                reply_address: reply_address.into(),
                created_at,
                deadline,
                slot,
            },
        );

        Ok(WaitHandle {
            id,
            deadline,
            rx,
            registry: self.clone(),
            finished: false,
        })
    }

    /// Deliver `reply` to the request waiting on `id`.
    ///
    /// Returns false, and discards the reply, when nothing is pending under
    /// `id` (already settled, expired, or foreign).
    pub fn resolve(&self, id: &str, reply: Reply) -> bool {
        match self.take(id) {
            Some(request) => {
                debug!(
                    correlation_id = %id,
                    elapsed_ms = %request.created_at.elapsed().as_millis(),
                    "Resolved pending request"
                );
                // The waiter may have gone away; the entry is settled either way.
                let _ = request.slot.send(Ok(reply));
                true
            }
            None => {
                debug!(correlation_id = %id, "Discarding reply with no pending request");
                false
            }
        }
    }

    /// Fail the request waiting on `id` with `error`.
    pub fn fail(&self, id: &str, error: RpcError) -> bool {
        match self.take(id) {
            Some(request) => {
                debug!(correlation_id = %id, error = %error, "Failed pending request");
                let _ = request.slot.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail the request waiting on `id` with [`RpcError::Timeout`].
    pub fn expire(&self, id: &str) -> bool {
        match self.take(id) {
            Some(request) => {
                Self::send_timeout(id, request);
                true
            }
            None => false,
        }
    }

    /// Drop the pending entry without notifying anyone.
    pub fn cancel(&self, id: &str) -> bool {
        self.take(id).is_some()
    }

    /// Expire every request whose deadline has passed.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(CorrelationId, PendingRequest)> = {
            let mut pending = self.inner.pending.lock();
            let ids: Vec<CorrelationId> = pending
                .iter()
                .filter(|(_, request)| request.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            let expired = ids
                .into_iter()
                .filter_map(|id| pending.remove(&id).map(|request| (id, request)))
                .collect();
            if pending.is_empty() {
                self.inner.emptied.notify_waiters();
            }
            expired
        };

        let count = expired.len();
        for (id, request) in expired {
            Self::send_timeout(id.as_str(), request);
        }
        if count > 0 {
            debug!(count, "Reaped expired requests");
        }
        count
    }

    /// Fail every pending request with an error built per id.
    pub fn fail_all(&self, error: impl Fn(&CorrelationId) -> RpcError) -> usize {
        let drained: Vec<(CorrelationId, PendingRequest)> = {
            let mut pending = self.inner.pending.lock();
            let drained = pending.drain().collect();
            self.inner.emptied.notify_waiters();
            drained
        };

        let count = drained.len();
        for (id, request) in drained {
            let _ = request.slot.send(Err(error(&id)));
        }
        if count > 0 {
            warn!(count, "Failed pending requests");
        }
        count
    }

    /// Wait until no requests are pending, up to `timeout`.
    ///
    /// Returns true if the registry emptied in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(Instant::now(), timeout);
        loop {
            let notified = self.inner.emptied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return true;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return self.is_empty(),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pending.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.pending.lock().contains_key(id)
    }

    /// Reply address recorded for a pending request.
    pub fn reply_address(&self, id: &str) -> Option<String> {
        self.inner
            .pending
            .lock()
            .get(id)
            .map(|request| request.reply_address.clone())
    }

    fn take(&self, id: &str) -> Option<PendingRequest> {
        let mut pending = self.inner.pending.lock();
        let request = pending.remove(id);
        if request.is_some() && pending.is_empty() {
            self.inner.emptied.notify_waiters();
        }
        request
    }

    fn send_timeout(id: &str, request: PendingRequest) {
        let after = request.created_at.elapsed();
        debug!(correlation_id = %id, after_ms = %after.as_millis(), "Pending request expired");
        let _ = request.slot.send(Err(RpcError::Timeout {
            correlation_id: id.to_string(),
            after,
        }));
    }
}

/// Awaitable side of a pending request.
///
/// Dropping an unsettled handle cancels the request, so an abandoned call
/// leaves nothing behind.
pub struct WaitHandle {
    id: CorrelationId,
    deadline: Instant,
    rx: oneshot::Receiver<Result<Reply>>,
    registry: CorrelationRegistry,
    finished: bool,
}

impl WaitHandle {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the reply, or for [`RpcError::Timeout`] at the deadline.
    pub async fn wait(mut self) -> Result<Reply> {
        let outcome = tokio::select! {
            received = &mut self.rx => received,
            _ = tokio::time::sleep_until(self.deadline) => {
                // Whichever settlement won, the slot now holds it.
                self.registry.expire(self.id.as_str());
                (&mut self.rx).await
            }
        };
        self.finished = true;
        outcome.unwrap_or(Err(RpcError::ShuttingDown))
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        if !self.finished && self.registry.cancel(self.id.as_str()) {
            debug!(correlation_id = %self.id, "Pending request abandoned");
        }
    }
}

impl fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitHandle")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .finish()
    }
}
