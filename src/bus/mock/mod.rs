//! Mock transport implementation for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{
    Acker, BusError, ConsumeOptions, Delivery, DeliveryStream, MessageProperties,
    OutboundMessage, QueueKind, Result, Transport,
};

/// How a mock delivery was settled.
#[derive(Debug, Clone)]
pub enum Settled {
    Acked,
    Requeued(OutboundMessage),
    Rejected,
}

/// Mock transport for testing.
///
/// Records declarations, publishes and settlements. Consuming yields an
/// empty stream; build deliveries with [`MockTransport::delivery`].
#[derive(Default)]
pub struct MockTransport {
    declared: RwLock<Vec<(String, QueueKind)>>,
    published: RwLock<Vec<(String, OutboundMessage)>>,
    settled: Arc<RwLock<Vec<Settled>>>,
    fail_requeue: Arc<AtomicBool>,
    /// Remaining publishes that fail.
    failing_publishes: AtomicUsize,
    fail_on_publish: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Make delivery requeues fail; the original is recorded as rejected.
    pub fn set_fail_requeue(&self, fail: bool) {
        self.fail_requeue.store(fail, Ordering::SeqCst);
    }

    /// Fail only the next `count` publishes.
    pub fn fail_next_publishes(&self, count: usize) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<(String, OutboundMessage)> {
        std::mem::take(&mut *self.published.write().await)
    }

    pub async fn declared(&self) -> Vec<(String, QueueKind)> {
        self.declared.read().await.clone()
    }

    pub async fn settlements(&self) -> Vec<Settled> {
        self.settled.read().await.clone()
    }

    /// A delivery whose settlement is recorded on this transport.
    pub fn delivery(
        &self,
        queue: &str,
        payload: impl Into<Bytes>,
        properties: MessageProperties,
    ) -> Delivery {
        Delivery::new(
            queue,
            payload,
            properties,
            Box::new(RecordingAcker {
                settled: self.settled.clone(),
                fail_requeue: self.fail_requeue.clone(),
            }),
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn declare_queue(&self, name: &str, kind: QueueKind) -> Result<()> {
        self.declared.write().await.push((name.to_string(), kind));
        Ok(())
    }

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BusError::Connection("Mock publish failure".to_string()));
        }
        let failing = self
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }
        self.published
            .write()
            .await
            .push((queue.to_string(), message));
        Ok(())
    }

    async fn consume(&self, _queue: &str, _options: ConsumeOptions) -> Result<DeliveryStream> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct RecordingAcker {
    settled: Arc<RwLock<Vec<Settled>>>,
    fail_requeue: Arc<AtomicBool>,
}

#[async_trait]
impl Acker for RecordingAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.settled.write().await.push(Settled::Acked);
        Ok(())
    }

    async fn requeue(self: Box<Self>, message: OutboundMessage) -> Result<()> {
        if self.fail_requeue.load(Ordering::SeqCst) {
            self.settled.write().await.push(Settled::Rejected);
            return Err(BusError::Publish("Mock requeue failure".to_string()));
        }
        self.settled.write().await.push(Settled::Requeued(message));
        Ok(())
    }

    async fn reject(self: Box<Self>) -> Result<()> {
        self.settled.write().await.push(Settled::Rejected);
        Ok(())
    }
}
