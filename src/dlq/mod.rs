//! Dead Letter Queue (DLQ) infrastructure.
//!
//! Provides a trait-based abstraction for publishing messages a dispatcher
//! gave up on, for manual review and replay.
//!
//! ## Queue Naming
//!
//! DLQ queues follow the pattern: `shelterhub.dlq.{source queue}`
//!
//! This provides per-service isolation: each service's poison messages land
//! in their own durable queue.
//!
//! ## Message Format
//!
//! A JSON [`DeadLetter`] containing:
//! - Routing info (source queue, correlation id, reply address)
//! - The original body
//! - Rejection details (decode failure or exhausted redeliveries)
//! - Metadata (source service, timestamp)

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::{Delivery, OutboundMessage, QueueKind, Transport};

/// DLQ queue prefix. Full queue: `{prefix}.{source queue}`
pub const DLQ_QUEUE_PREFIX: &str = "shelterhub.dlq";

/// Build the DLQ queue name for a source queue.
pub fn dlq_queue_for(queue: &str) -> String {
    format!("{}.{}", DLQ_QUEUE_PREFIX, queue)
}

/// Errors that can occur during DLQ operations.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("Failed to serialize message: {0}")]
    Serialization(String),

    #[error("Failed to publish to DLQ: {0}")]
    PublishFailed(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Why a message was dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionDetails {
    /// Body was not a request envelope.
    DecodeFailed { error: String },
    /// Transport failures kept the message coming back.
    RedeliveryExhausted { attempts: u32, last_error: String },
}

/// Dead letter queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Queue the message was consumed from.
    pub queue: String,
    /// Original body, lossily decoded as UTF-8.
    pub payload: String,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Human-readable reason for rejection.
    pub rejection_reason: String,
    pub rejection_details: RejectionDetails,
    pub occurred_at: DateTime<Utc>,
    /// Which service sent it to the DLQ.
    pub source_service: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DeadLetter {
    fn from_delivery(
        delivery: &Delivery,
        rejection_reason: String,
        rejection_details: RejectionDetails,
        source_service: &str,
    ) -> Self {
        Self {
            queue: delivery.queue.clone(),
            payload: String::from_utf8_lossy(&delivery.payload).into_owned(),
            correlation_id: delivery.correlation_id().map(str::to_string),
            reply_to: delivery.reply_to().map(str::to_string),
            rejection_reason,
            rejection_details,
            occurred_at: Utc::now(),
            source_service: source_service.to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Create a dead letter for a body that is not an envelope.
    pub fn from_decode_failure(delivery: &Delivery, error: &str, source_service: &str) -> Self {
        Self::from_delivery(
            delivery,
            format!("Malformed envelope: {}", error),
            RejectionDetails::DecodeFailed {
                error: error.to_string(),
            },
            source_service,
        )
    }

    /// Create a dead letter for a message past its redelivery bound.
    pub fn from_redelivery_exhausted(
        delivery: &Delivery,
        attempts: u32,
        last_error: &str,
        source_service: &str,
    ) -> Self {
        Self::from_delivery(
            delivery,
            format!(
                "Redelivery limit reached after {} attempts: {}",
                attempts, last_error
            ),
            RejectionDetails::RedeliveryExhausted {
                attempts,
                last_error: last_error.to_string(),
            },
            source_service,
        )
    }

    /// Add metadata to the dead letter.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Get the DLQ queue for this dead letter.
    pub fn dlq_queue(&self) -> String {
        dlq_queue_for(&self.queue)
    }
}

/// Trait for publishing messages to a dead letter queue.
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    /// Publish a dead letter to the queue.
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError>;

    /// Check if the publisher is configured and ready.
    fn is_configured(&self) -> bool {
        true
    }
}

/// No-op DLQ publisher that logs but doesn't actually send anywhere.
///
/// Used when DLQ is disabled.
pub struct NoopDeadLetterPublisher;

#[async_trait]
impl DeadLetterPublisher for NoopDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        warn!(
            queue = %dead_letter.dlq_queue(),
            reason = %dead_letter.rejection_reason,
            source = %dead_letter.source_service,
            "DLQ not configured, logging dead letter"
        );
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// In-memory DLQ publisher using a channel.
///
/// Used for standalone mode and testing.
pub struct ChannelDeadLetterPublisher {
    sender: mpsc::UnboundedSender<DeadLetter>,
}

impl ChannelDeadLetterPublisher {
    /// Create a new channel-based DLQ publisher.
    ///
    /// Returns the publisher and a receiver for consuming dead letters.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeadLetter>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterPublisher for ChannelDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        info!(
            queue = %dead_letter.dlq_queue(),
            reason = %dead_letter.rejection_reason,
            "Publishing to channel DLQ"
        );
        self.sender
            .send(dead_letter)
            .map_err(|e| DlqError::PublishFailed(e.to_string()))
    }
}

/// DLQ publisher writing JSON dead letters to durable broker queues.
pub struct BusDeadLetterPublisher {
    transport: Arc<dyn Transport>,
    declared: Mutex<HashSet<String>>,
}

impl BusDeadLetterPublisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            declared: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl DeadLetterPublisher for BusDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        let queue = dead_letter.dlq_queue();
        let body = serde_json::to_vec(&dead_letter)
            .map_err(|e| DlqError::Serialization(e.to_string()))?;

        if !self.declared.lock().contains(&queue) {
            self.transport
                .declare_queue(&queue, QueueKind::Durable)
                .await
                .map_err(|e| DlqError::Connection(e.to_string()))?;
            self.declared.lock().insert(queue.clone());
        }

        let mut message = OutboundMessage::new(body);
        if let Some(correlation_id) = &dead_letter.correlation_id {
            message = message.with_correlation_id(correlation_id.clone());
        }

        self.transport
            .publish(&queue, message)
            .await
            .map_err(|e| DlqError::PublishFailed(e.to_string()))?;

        info!(
            queue = %queue,
            reason = %dead_letter.rejection_reason,
            source = %dead_letter.source_service,
            "Published dead letter"
        );
        Ok(())
    }
}

/// Configuration for DLQ publishers.
#[derive(Debug, Clone, Default)]
pub struct DlqConfig {
    /// Publish dead letters to the broker.
    pub enabled: bool,
}

impl DlqConfig {
    /// Check if any DLQ backend is configured.
    pub fn is_configured(&self) -> bool {
        self.enabled
    }
}

/// Create a DLQ publisher based on configuration.
///
/// Returns NoopDeadLetterPublisher if nothing is configured.
pub fn create_publisher(
    config: &DlqConfig,
    transport: Arc<dyn Transport>,
) -> Arc<dyn DeadLetterPublisher> {
    if config.is_configured() {
        Arc::new(BusDeadLetterPublisher::new(transport))
    } else {
        debug!("No DLQ configured, using noop publisher");
        Arc::new(NoopDeadLetterPublisher)
    }
}
