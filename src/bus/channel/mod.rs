//! In-memory channel broker for standalone mode.
//!
//! A `ChannelBroker` holds named queues; each `ChannelTransport` connected to
//! it plays the part of one process's broker connection. Ideal for local
//! development and testing without external dependencies.
//!
//! Semantics follow AMQP where request/reply depends on them:
//! - publishing to a queue nobody declared drops the message
//! - reply queues are exclusive to the declaring transport and deleted when
//!   it closes
//! - prefetch bounds unsettled deliveries per consumer
//! - a delivery dropped without settlement counts as acknowledged

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    Acker, BusError, ConsumeOptions, Delivery, DeliveryStream, MessageProperties,
    OutboundMessage, QueueKind, Result, Transport,
};

struct StoredMessage {
    payload: Bytes,
    properties: MessageProperties,
}

struct QueueState {
    kind: QueueKind,
    /// Transport id owning an exclusive reply queue.
    owner: Option<u64>,
    tx: mpsc::UnboundedSender<StoredMessage>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<StoredMessage>>>,
    depth: Arc<AtomicUsize>,
}

#[derive(Default)]
struct BrokerInner {
    queues: Mutex<HashMap<String, QueueState>>,
    next_id: AtomicU64,
}

/// Shared in-memory broker.
#[derive(Clone, Default)]
pub struct ChannelBroker {
    inner: Arc<BrokerInner>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to this broker.
    pub fn connect(&self) -> ChannelTransport {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(connection = id, "Channel transport connected");
        ChannelTransport {
            broker: self.clone(),
            id,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            owned: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.inner.queues.lock().contains_key(name)
    }

    /// Messages waiting in a queue (not yet delivered).
    pub fn queue_depth(&self, name: &str) -> usize {
        self.inner
            .queues
            .lock()
            .get(name)
            .map(|q| q.depth.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.queues.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn declare(&self, name: &str, kind: QueueKind, connection: u64) -> Result<()> {
        let mut queues = self.inner.queues.lock();
        if let Some(existing) = queues.get(name) {
            if existing.kind != kind {
                return Err(BusError::Subscribe(format!(
                    "Queue {} already declared as {:?}",
                    name, existing.kind
                )));
            }
            if existing.owner.is_some_and(|owner| owner != connection) {
                return Err(BusError::Subscribe(format!(
                    "Queue {} is exclusive to another connection",
                    name
                )));
            }
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(
            name.to_string(),
            QueueState {
                kind,
                owner: (kind == QueueKind::Reply).then_some(connection),
                tx,
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
                depth: Arc::new(AtomicUsize::new(0)),
            },
        );
        Ok(())
    }

    /// Append to a queue; returns false if the queue does not exist.
    fn push(&self, name: &str, message: StoredMessage) -> bool {
        let queues = self.inner.queues.lock();
        match queues.get(name) {
            Some(queue) => {
                queue.depth.fetch_add(1, Ordering::SeqCst);
                if queue.tx.send(message).is_err() {
                    queue.depth.fetch_sub(1, Ordering::SeqCst);
                    return false;
                }
                true
            }
            None => false,
        }
    }

    fn delete(&self, name: &str) {
        self.inner.queues.lock().remove(name);
    }
}

/// One connection to a [`ChannelBroker`].
pub struct ChannelTransport {
    broker: ChannelBroker,
    id: u64,
    closed: AtomicBool,
    shutdown: CancellationToken,
    /// Reply queues to delete on close.
    owned: Mutex<Vec<String>>,
}

impl ChannelTransport {
    pub fn broker(&self) -> &ChannelBroker {
        &self.broker
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

struct ConsumerState {
    queue: String,
    broker: ChannelBroker,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<StoredMessage>>>,
    depth: Arc<AtomicUsize>,
    permits: Arc<Semaphore>,
    auto_ack: bool,
    token: CancellationToken,
}

impl ConsumerState {
    async fn next_delivery(&self) -> Option<Delivery> {
        let permit = if self.auto_ack {
            None
        } else {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return None,
                permit = self.permits.clone().acquire_owned() => Some(permit.ok()?),
            }
        };

        let message = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            message = async { self.rx.lock().await.recv().await } => message,
        }?;
        self.depth.fetch_sub(1, Ordering::SeqCst);

        let acker: Box<dyn Acker> = if self.auto_ack {
            Box::new(super::NoopAcker)
        } else {
            Box::new(ChannelAcker {
                _permit: permit,
                broker: self.broker.clone(),
                queue: self.queue.clone(),
            })
        };

        Some(Delivery::new(
            self.queue.clone(),
            message.payload,
            message.properties,
            acker,
        ))
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn declare_queue(&self, name: &str, kind: QueueKind) -> Result<()> {
        self.ensure_open()?;
        self.broker.declare(name, kind, self.id)?;
        if kind == QueueKind::Reply {
            let mut owned = self.owned.lock();
            if !owned.iter().any(|q| q == name) {
                owned.push(name.to_string());
            }
        }
        debug!(queue = %name, kind = ?kind, "Declared queue");
        Ok(())
    }

    #[tracing::instrument(name = "bus.publish", skip_all, fields(queue = %queue))]
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<()> {
        self.ensure_open()?;
        let stored = StoredMessage {
            payload: message.payload,
            properties: message.properties,
        };
        if self.broker.push(queue, stored) {
            debug!(queue = %queue, "Published message to channel");
        } else {
            debug!(queue = %queue, "No such queue, message dropped");
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<DeliveryStream> {
        self.ensure_open()?;
        let (rx, depth) = {
            let queues = self.broker.inner.queues.lock();
            let state = queues
                .get(queue)
                .ok_or_else(|| BusError::Subscribe(format!("Queue {} not found", queue)))?;
            (state.rx.clone(), state.depth.clone())
        };

        let state = ConsumerState {
            queue: queue.to_string(),
            broker: self.broker.clone(),
            rx,
            depth,
            permits: Arc::new(Semaphore::new(usize::from(options.prefetch.max(1)))),
            auto_ack: options.auto_ack,
            token: self.shutdown.child_token(),
        };

        info!(queue = %queue, prefetch = options.prefetch, "Channel consumer started");

        let stream = futures::stream::unfold(state, |state| async move {
            let delivery = state.next_delivery().await?;
            Some((Ok(delivery), state))
        });
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();
        for queue in self.owned.lock().drain(..) {
            self.broker.delete(&queue);
        }
        debug!(connection = self.id, "Channel transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Holds the consumer's prefetch slot until settled.
struct ChannelAcker {
    _permit: Option<OwnedSemaphorePermit>,
    broker: ChannelBroker,
    queue: String,
}

#[async_trait]
impl Acker for ChannelAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn requeue(self: Box<Self>, message: OutboundMessage) -> Result<()> {
        let stored = StoredMessage {
            payload: message.payload,
            properties: message.properties,
        };
        if !self.broker.push(&self.queue, stored) {
            debug!(queue = %self.queue, "Queue gone, requeued message dropped");
        }
        Ok(())
    }

    async fn reject(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests;
