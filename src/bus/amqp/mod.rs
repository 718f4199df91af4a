//! AMQP (RabbitMQ) transport.
//!
//! Requests go to durable service queues through the default exchange
//! (routing key = queue name). Replies go to exclusive, auto-deleted reply
//! queues. One pooled connection carries one shared channel; publishes are
//! serialized through the channel lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_lapin::{Manager, Pool, PoolError};
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    Acker, BusError, ConsumeOptions, Delivery, DeliveryStream, MessageProperties,
    OutboundMessage, QueueKind, Result, Transport, DELIVERY_COUNT_HEADER, REDELIVERY_HEADER,
};
use crate::config::AmqpSettings;
use crate::utils::retry::{
    attempt_delays, connection_backoff, is_retryable, publish_backoff, PUBLISH_MAX_RETRIES,
};

/// Default exchange: routes by queue name.
const DEFAULT_EXCHANGE: &str = "";

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Configuration for AMQP connection.
#[derive(Clone, Debug)]
pub struct AmqpConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub url: String,
    /// Wait for broker confirmation of every publish.
    pub publisher_confirms: bool,
    /// Connection attempts before startup fails.
    pub connect_max_attempts: usize,
}

impl AmqpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            publisher_confirms: true,
            connect_max_attempts: 30,
        }
    }
}

impl From<&AmqpSettings> for AmqpConfig {
    fn from(settings: &AmqpSettings) -> Self {
        Self {
            url: settings.url.clone(),
            publisher_confirms: settings.publisher_confirms,
            connect_max_attempts: settings.connect_max_attempts,
        }
    }
}

/// Connection state shared with ackers.
struct Shared {
    pool: Pool,
    /// The process-wide channel. Held locked for the whole of a publish.
    channel: Mutex<Option<Channel>>,
    publisher_confirms: bool,
    closed: AtomicBool,
}

impl Shared {
    async fn open_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))?;

        if self.publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| {
                    BusError::Connection(format!("Failed to enable publisher confirms: {}", e))
                })?;
        }

        Ok(channel)
    }

    /// Return the shared channel, reopening it if the broker closed it.
    async fn current_channel(&self, slot: &mut Option<Channel>) -> Result<Channel> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        if let Some(channel) = slot.as_ref() {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
            warn!("Shared channel closed, reopening");
        }
        let channel = self.open_channel().await?;
        *slot = Some(channel.clone());
        Ok(channel)
    }

    async fn channel(&self) -> Result<Channel> {
        let mut slot = self.channel.lock().await;
        self.current_channel(&mut slot).await
    }

    /// One publish attempt under the channel lock.
    async fn publish_once(&self, queue: &str, message: &OutboundMessage) -> Result<()> {
        let mut slot = self.channel.lock().await;
        let channel = self.current_channel(&mut slot).await?;

        let outcome = async {
            let confirm = channel
                .basic_publish(
                    DEFAULT_EXCHANGE,
                    queue,
                    BasicPublishOptions::default(),
                    &message.payload,
                    to_basic_properties(&message.properties),
                )
                .await
                .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?;

            let confirmation = confirm
                .await
                .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

            if confirmation.is_nack() {
                return Err(BusError::Publish("Broker nacked publish".to_string()));
            }
            Ok(())
        }
        .await;

        if outcome.is_err() && !channel.status().connected() {
            *slot = None;
        }
        outcome
    }

    /// Publish with exponential backoff and jitter between attempts.
    async fn publish(&self, queue: &str, message: &OutboundMessage) -> Result<()> {
        let mut last_error = None;

        for (attempt, delay) in attempt_delays(publish_backoff()).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            match self.publish_once(queue, message).await {
                Ok(()) => {
                    debug!(queue = %queue, "Published message");
                    return Ok(());
                }
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) => {
                    error!(
                        attempt = attempt + 1,
                        max_retries = PUBLISH_MAX_RETRIES,
                        queue = %queue,
                        error = %e,
                        "Publish failed, retrying..."
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BusError::Publish("Max retries exceeded".to_string())))
    }
}

/// AMQP transport over RabbitMQ.
pub struct AmqpTransport {
    shared: Arc<Shared>,
    config: AmqpConfig,
}

impl AmqpTransport {
    /// Connect, retrying with backoff up to `connect_max_attempts`.
    pub async fn connect(config: AmqpConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(1)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        let shared = Arc::new(Shared {
            pool,
            channel: Mutex::new(None),
            publisher_confirms: config.publisher_confirms,
            closed: AtomicBool::new(false),
        });

        let mut last_error = None;
        let retries = config.connect_max_attempts.saturating_sub(1);
        for (attempt, delay) in attempt_delays(connection_backoff(retries)).enumerate()
        {
            if attempt > 0 {
                warn!(
                    attempt = attempt + 1,
                    backoff_ms = %delay.as_millis(),
                    url = %config.url,
                    "Broker unreachable, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            match shared.channel().await {
                Ok(_) => {
                    info!(url = %config.url, "Connected to AMQP");
                    return Ok(Self { shared, config });
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| BusError::Connection("No connection attempts made".to_string())))
    }

    pub fn config(&self) -> &AmqpConfig {
        &self.config
    }

    fn wrap_delivery(
        delivery: lapin::message::Delivery,
        shared: &Arc<Shared>,
        queue: &str,
        auto_ack: bool,
    ) -> Delivery {
        let properties = from_basic_properties(&delivery.properties);
        let acker: Box<dyn Acker> = if auto_ack {
            Box::new(super::NoopAcker)
        } else {
            Box::new(AmqpAcker {
                acker: delivery.acker,
                shared: shared.clone(),
                queue: queue.to_string(),
            })
        };
        Delivery::new(queue, delivery.data, properties, acker)
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn declare_queue(&self, name: &str, kind: QueueKind) -> Result<()> {
        let channel = self.shared.channel().await?;
        let options = match kind {
            QueueKind::Durable => QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            QueueKind::Reply => QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..Default::default()
            },
        };

        channel
            .queue_declare(name, options, FieldTable::default())
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to declare queue {}: {}", name, e)))?;

        debug!(queue = %name, kind = ?kind, "Declared queue");
        Ok(())
    }

    #[tracing::instrument(name = "bus.publish", skip_all, fields(queue = %queue))]
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<()> {
        self.shared.publish(queue, &message).await
    }

    async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<DeliveryStream> {
        let channel = self.shared.channel().await?;

        if !options.auto_ack {
            channel
                .basic_qos(options.prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| BusError::Subscribe(format!("Failed to set prefetch: {}", e)))?;
        }

        // Tags are per channel; suffix so a re-subscription never collides.
        let tag = format!("{}-{}", options.consumer_tag, uuid::Uuid::new_v4().simple());
        let consumer = channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_ack: options.auto_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))?;

        info!(queue = %queue, consumer_tag = %tag, prefetch = options.prefetch, "Consumer started");

        let shared = self.shared.clone();
        let queue = queue.to_string();
        let auto_ack = options.auto_ack;
        let stream = consumer.map(move |item| match item {
            Ok(delivery) => Ok(Self::wrap_delivery(delivery, &shared, &queue, auto_ack)),
            Err(e) => Err(BusError::Subscribe(format!("Consumer delivery error: {}", e))),
        });

        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(channel) = self.shared.channel.lock().await.take() {
            if channel.status().connected() {
                if let Err(e) = channel.close(REPLY_SUCCESS, "shutdown").await {
                    warn!(error = %e, "Failed to close channel");
                }
            }
        }

        if self.shared.pool.status().size > 0 {
            let conn = tokio::time::timeout(Duration::from_secs(5), self.shared.pool.get()).await;
            if let Ok(Ok(conn)) = conn {
                if conn.status().connected() {
                    conn.close(REPLY_SUCCESS, "shutdown")
                        .await
                        .map_err(|e| BusError::Connection(format!("Failed to close: {}", e)))?;
                }
            }
        }
        self.shared.pool.close();

        info!(url = %self.config.url, "AMQP transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// Settles a lapin delivery; requeue republishes with an incremented count.
struct AmqpAcker {
    acker: lapin::acker::Acker,
    shared: Arc<Shared>,
    queue: String,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| BusError::Settle(format!("Failed to ack: {}", e)))
    }

    async fn requeue(self: Box<Self>, message: OutboundMessage) -> Result<()> {
        match self.shared.publish(&self.queue, &message).await {
            Ok(()) => self
                .acker
                .ack(BasicAckOptions::default())
                .await
                .map(|_| ())
                .map_err(|e| BusError::Settle(format!("Failed to ack requeued message: {}", e))),
            Err(e) => {
                // A broker-side requeue would not carry the incremented count.
                warn!(queue = %self.queue, error = %e, "Republish failed, dropping original");
                if let Err(nack_error) = self
                    .acker
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                {
                    error!(queue = %self.queue, error = %nack_error, "Failed to nack");
                }
                Err(e)
            }
        }
    }

    async fn reject(self: Box<Self>) -> Result<()> {
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map(|_| ())
            .map_err(|e| BusError::Settle(format!("Failed to reject: {}", e)))
    }
}

// ============================================================================
// Property mapping
// ============================================================================

fn to_basic_properties(props: &MessageProperties) -> BasicProperties {
    let mut properties = BasicProperties::default()
        .with_content_type("application/json".into())
        .with_delivery_mode(if props.persistent { 2 } else { 1 });

    if let Some(correlation_id) = &props.correlation_id {
        properties = properties.with_correlation_id(ShortString::from(correlation_id.clone()));
    }
    if let Some(reply_to) = &props.reply_to {
        properties = properties.with_reply_to(ShortString::from(reply_to.clone()));
    }
    if props.redelivery_count > 0 {
        let mut headers = FieldTable::default();
        headers.insert(
            REDELIVERY_HEADER.into(),
            AMQPValue::LongUInt(props.redelivery_count),
        );
        properties = properties.with_headers(headers);
    }

    properties
}

fn from_basic_properties(properties: &BasicProperties) -> MessageProperties {
    let redelivery_count = properties
        .headers()
        .as_ref()
        .map(|headers| {
            let count = |key: &str| headers.inner().get(key).and_then(header_count).unwrap_or(0);
            count(DELIVERY_COUNT_HEADER).max(count(REDELIVERY_HEADER))
        })
        .unwrap_or(0);

    MessageProperties {
        correlation_id: properties.correlation_id().as_ref().map(|s| s.to_string()),
        reply_to: properties.reply_to().as_ref().map(|s| s.to_string()),
        persistent: properties.delivery_mode().as_ref() == Some(&2),
        redelivery_count,
    }
}

fn header_count(value: &AMQPValue) -> Option<u32> {
    match value {
        AMQPValue::ShortShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::ShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::LongUInt(v) => Some(*v),
        AMQPValue::ShortShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::ShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongLongInt(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}
