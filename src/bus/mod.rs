//! Broker transport for request/reply messaging.
//!
//! This module contains:
//! - `Transport` trait: queue declaration, publish, consume, close
//! - `Delivery`: a received message that owns its settlement
//! - Implementations: AMQP (RabbitMQ), in-memory channel broker, mock

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tracing::info;

use crate::config::{MessagingConfig, MessagingType};

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
#[cfg(feature = "channel")]
pub mod channel;
pub mod mock;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::{AmqpConfig, AmqpTransport};
#[cfg(feature = "channel")]
pub use channel::{ChannelBroker, ChannelTransport};
pub use mock::{MockTransport, Settled};

/// Header carrying the redelivery count this system maintains on requeue.
pub const REDELIVERY_HEADER: &str = "x-redelivery-count";

/// Header carrying the broker-maintained delivery count (quorum queues).
pub const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Settlement failed: {0}")]
    Settle(String),

    #[error("Transport closed")]
    Closed,
}

impl BusError {
    /// Whether the failure concerns the broker connection itself.
    pub fn is_connection(&self) -> bool {
        matches!(self, BusError::Connection(_) | BusError::Closed)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Kind of queue to declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Broker-persisted, survives consumer restarts. Owned by a service.
    Durable,
    /// Exclusive to the declaring connection, deleted when it disconnects.
    Reply,
}

/// Broker message properties used by request/reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub persistent: bool,
    /// Times this message has been handed back to the queue.
    pub redelivery_count: u32,
}

/// A message ready to publish.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub payload: Bytes,
    pub properties: MessageProperties,
}

impl OutboundMessage {
    /// Persistent message with no correlation properties.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            properties: MessageProperties {
                persistent: true,
                ..Default::default()
            },
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.properties.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.properties.reply_to = Some(reply_to.into());
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.properties.persistent = persistent;
        self
    }
}

/// Settles one delivery with the broker.
///
/// Each method consumes the acker, so a delivery is settled at most once.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Put `message` back on the queue (count already incremented) and
    /// settle the original.
    ///
    /// If `message` cannot be put back, the original is dropped without
    /// redelivery and the error returned.
    async fn requeue(self: Box<Self>, message: OutboundMessage) -> Result<()>;

    /// Drop the message without redelivery.
    async fn reject(self: Box<Self>) -> Result<()>;
}

/// Acker for auto-acknowledged deliveries: the broker already forgot them.
pub struct NoopAcker;

#[async_trait]
impl Acker for NoopAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn requeue(self: Box<Self>, _message: OutboundMessage) -> Result<()> {
        Ok(())
    }

    async fn reject(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// A message received from a queue.
pub struct Delivery {
    pub queue: String,
    pub payload: Bytes,
    pub properties: MessageProperties,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(
        queue: impl Into<String>,
        payload: impl Into<Bytes>,
        properties: MessageProperties,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            queue: queue.into(),
            payload: payload.into(),
            properties,
            acker,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.properties.reply_to.as_deref()
    }

    pub fn redelivery_count(&self) -> u32 {
        self.properties.redelivery_count
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Return the message to its queue with the redelivery count incremented.
    pub async fn requeue(self) -> Result<()> {
        let message = OutboundMessage {
            payload: self.payload,
            properties: MessageProperties {
                redelivery_count: self.properties.redelivery_count.saturating_add(1),
                ..self.properties
            },
        };
        self.acker.requeue(message).await
    }

    pub async fn reject(self) -> Result<()> {
        self.acker.reject().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("payload_len", &self.payload.len())
            .field("properties", &self.properties)
            .finish()
    }
}

/// Stream of deliveries from one consumer.
///
/// An `Err` item means the consumer broke; the stream ends after it.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Maximum unacknowledged deliveries in flight.
    pub prefetch: u16,
    /// Deliveries count as settled on receipt.
    pub auto_ack: bool,
    pub consumer_tag: String,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            prefetch: 1,
            auto_ack: false,
            consumer_tag: "shelterhub-consumer".to_string(),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Connection to the message broker.
///
/// Implementations:
/// - `AmqpTransport`: RabbitMQ via AMQP
/// - `ChannelTransport`: in-memory broker for standalone mode and tests
/// - `MockTransport`: records publishes, for unit tests
///
/// Implementations serialize concurrent publishes internally.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Declare a queue. Idempotent for an existing queue of the same kind.
    async fn declare_queue(&self, name: &str, kind: QueueKind) -> Result<()>;

    /// Publish to a queue through the default exchange.
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<()>;

    /// Start consuming a declared queue.
    async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<DeliveryStream>;

    /// Release the channel, then the connection. Idempotent.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the broker transport based on configuration.
///
/// Requires the corresponding feature to be enabled:
/// - AMQP: `--features amqp` (included in default)
/// - Channel: `--features channel`
pub async fn init_transport(config: &MessagingConfig) -> Result<Arc<dyn Transport>> {
    match config.messaging_type {
        MessagingType::Amqp => {
            #[cfg(feature = "amqp")]
            {
                let transport = AmqpTransport::connect(AmqpConfig::from(&config.amqp)).await?;
                info!(messaging_type = "amqp", "Transport initialized");
                Ok(Arc::new(transport))
            }

            #[cfg(not(feature = "amqp"))]
            {
                Err(BusError::Connection(
                    "AMQP support requires the 'amqp' feature. Rebuild with --features amqp"
                        .to_string(),
                ))
            }
        }
        MessagingType::Channel => {
            #[cfg(feature = "channel")]
            {
                let transport = ChannelBroker::new().connect();
                info!(messaging_type = "channel", "Transport initialized");
                Ok(Arc::new(transport))
            }

            #[cfg(not(feature = "channel"))]
            {
                Err(BusError::Connection(
                    "Channel support requires the 'channel' feature. Rebuild with --features channel"
                        .to_string(),
                ))
            }
        }
    }
}
