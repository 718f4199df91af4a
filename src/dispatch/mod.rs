//! Queue consumer and action dispatcher.
//!
//! One dispatcher per service consumes the service's durable queue, decodes
//! each body as an [`Envelope`], runs the handler registered for its action
//! and publishes the [`Reply`](shelterhub_client::Reply) to the request's reply address tagged with the
//! request's correlation id.
//!
//! Settlement rules:
//! - handled (including a `success: false` reply): ack
//! - unknown action: ack without processing, no reply
//! - undecodable body: dead-letter, reject
//! - reply publish failed: keep the reply and requeue while under the
//!   redelivery bound, dead-letter after; the redelivered request resends
//!   the kept reply without running the handler again
//! - redelivery count already past the bound: dead-letter without running
//!   the handler
//! - DLQ unreachable: requeue while under the bound, drop after

mod handler;
mod settled;

pub use handler::{handler_fn, ActionHandler, HandlerError, HandlerRegistry, HandlerResult};
pub use settled::{SettledReplies, DEFAULT_SETTLED_CAPACITY};

use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use bytes::Bytes;
use futures::StreamExt;
use shelterhub_client::{Envelope, Service};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, ConsumeOptions, Delivery, OutboundMessage, QueueKind, Transport};
use crate::config::DispatcherSettings;
use crate::dlq::{DeadLetter, DeadLetterPublisher};
use crate::utils::retry::consumer_backoff;

/// A body that is not a request envelope.
#[derive(Debug, thiserror::Error)]
#[error("Malformed envelope: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Decode a request body.
pub fn decode_envelope(body: &[u8]) -> Result<Envelope, DecodeError> {
    Ok(Envelope::from_slice(body)?)
}

/// What the consumer is doing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Processing {
        action: String,
        correlation_id: Option<String>,
    },
    Stopped,
}

/// How one delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued,
    DeadLettered,
    /// Settled without reaching a queue: both requeue and DLQ failed.
    Dropped,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue: String,
    /// Recorded on dead letters.
    pub service_name: String,
    pub prefetch: u16,
    pub max_redeliveries: u32,
}

impl DispatcherConfig {
    pub fn for_service(service: Service, settings: &DispatcherSettings) -> Self {
        Self {
            queue: service.queue().to_string(),
            service_name: service.name().to_string(),
            prefetch: settings.prefetch.max(1),
            max_redeliveries: settings.max_redeliveries,
        }
    }
}

/// Consumer loop for one service queue.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    handlers: HandlerRegistry,
    dead_letters: Arc<dyn DeadLetterPublisher>,
    config: DispatcherConfig,
    state: watch::Sender<ConsumerState>,
    settled: SettledReplies,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        handlers: HandlerRegistry,
        dead_letters: Arc<dyn DeadLetterPublisher>,
        config: DispatcherConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            transport,
            handlers,
            dead_letters,
            config,
            state,
            settled: SettledReplies::default(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn state(&self) -> ConsumerState {
        self.state.borrow().clone()
    }

    /// Follow state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Consume until `shutdown` is cancelled or the transport closes.
    ///
    /// Cancellation is observed between messages: a message being handled
    /// is always settled first. A broken consumer is re-subscribed with
    /// backoff.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), BusError> {
        let backoff_builder = consumer_backoff();
        let mut backoff_iter = backoff_builder.build();
        let queue = self.config.queue.clone();

        info!(queue = %queue, actions = ?self.handlers.actions(), "Dispatcher starting");

        'consume: loop {
            if shutdown.is_cancelled() || self.transport.is_closed() {
                break;
            }

            let subscribed = match self.transport.declare_queue(&queue, QueueKind::Durable).await {
                Ok(()) => {
                    self.transport
                        .consume(
                            &queue,
                            ConsumeOptions {
                                prefetch: self.config.prefetch,
                                auto_ack: false,
                                consumer_tag: format!("shelterhub-{}", self.config.service_name),
                            },
                        )
                        .await
                }
                Err(e) => Err(e),
            };

            match subscribed {
                Ok(mut stream) => {
                    backoff_iter = backoff_builder.build();
                    info!(queue = %queue, prefetch = self.config.prefetch, "Consuming");

                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break 'consume,
                            next = stream.next() => next,
                        };

                        match next {
                            Some(Ok(delivery)) => {
                                self.process(delivery).await;
                            }
                            Some(Err(e)) => {
                                error!(queue = %queue, error = %e, "Consumer error, will reconnect");
                                break;
                            }
                            None => {
                                info!(queue = %queue, "Consumer stream ended, reconnecting...");
                                break;
                            }
                        }
                    }
                }
                Err(BusError::Closed) => break,
                Err(e) => {
                    error!(queue = %queue, error = %e, "Failed to subscribe");
                }
            }

            if self.transport.is_closed() {
                break;
            }

            let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
            debug!(queue = %queue, backoff_ms = %delay.as_millis(), "Waiting before re-subscribing");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(ConsumerState::Stopped);
        info!(queue = %queue, "Dispatcher stopped");
        Ok(())
    }

    /// Handle and settle one delivery.
    #[tracing::instrument(
        name = "dispatch.process",
        skip_all,
        fields(
            queue = %self.config.queue,
            correlation_id = delivery.correlation_id().unwrap_or_default(),
            redelivery_count = delivery.redelivery_count(),
        )
    )]
    pub async fn process(&self, delivery: Delivery) -> Settlement {
        let envelope = match decode_envelope(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Undecodable message");
                let dead_letter = DeadLetter::from_decode_failure(
                    &delivery,
                    &e.to_string(),
                    &self.config.service_name,
                );
                return self.dead_letter(delivery, dead_letter).await;
            }
        };

        let redeliveries = delivery.redelivery_count();
        if redeliveries > self.config.max_redeliveries {
            warn!(action = %envelope.action, "Redelivery limit exceeded, dead-lettering");
            if let Some(correlation_id) = delivery.correlation_id() {
                self.settled.remove(correlation_id);
            }
            let dead_letter = DeadLetter::from_redelivery_exhausted(
                &delivery,
                redeliveries,
                "redelivery limit exceeded",
                &self.config.service_name,
            )
            .with_metadata("action", &envelope.action);
            return self.dead_letter(delivery, dead_letter).await;
        }

        if redeliveries > 0 {
            let stored = delivery.correlation_id().and_then(|id| self.settled.get(id));
            if let Some(body) = stored {
                info!(action = %envelope.action, "Reply already produced, resending it");
                return self.deliver_reply(delivery, &envelope.action, body).await;
            }
        }

        let Some(handler) = self.handlers.get(&envelope.action) else {
            warn!(action = %envelope.action, "Unknown action, acknowledged without processing");
            return self.ack(delivery).await;
        };

        self.state.send_replace(ConsumerState::Processing {
            action: envelope.action.clone(),
            correlation_id: delivery.correlation_id().map(str::to_string),
        });

        let action = envelope.action.clone();
        let reply = handler
            .handle(envelope)
            .await
            .unwrap_or_else(HandlerError::into_reply);
        debug!(action = %action, success = reply.success, "Action handled");

        let settlement = match reply.to_vec() {
            Ok(body) => self.deliver_reply(delivery, &action, Bytes::from(body)).await,
            Err(e) => {
                error!(action = %action, error = %e, "Failed to encode reply");
                self.ack(delivery).await
            }
        };

        self.state.send_replace(ConsumerState::Idle);
        settlement
    }

    /// Publish an encoded reply to the request's reply address and settle
    /// the request.
    ///
    /// The handler has already run. When the publish fails the reply is
    /// kept, so the requeued request resends it instead of handling again.
    async fn deliver_reply(&self, delivery: Delivery, action: &str, body: Bytes) -> Settlement {
        let redeliveries = delivery.redelivery_count();
        let correlation_id = delivery.correlation_id().map(str::to_string);
        let Some(reply_to) = delivery.reply_to().map(str::to_string) else {
            debug!("No reply address, reply dropped");
            return self.ack(delivery).await;
        };

        let mut message = OutboundMessage::new(body.clone()).persistent(false);
        match &correlation_id {
            Some(id) => message = message.with_correlation_id(id.clone()),
            None => warn!(reply_to = %reply_to, "Request without correlation id, reply cannot be matched"),
        }

        let error = match self.transport.publish(&reply_to, message).await {
            Ok(()) => {
                if let Some(id) = &correlation_id {
                    self.settled.remove(id);
                }
                return self.ack(delivery).await;
            }
            Err(e) => e,
        };

        let Some(correlation_id) = correlation_id else {
            warn!(action = %action, error = %error, "Reply publish failed for an unmatched request, dropping reply");
            return self.ack(delivery).await;
        };

        let dead_letter = DeadLetter::from_redelivery_exhausted(
            &delivery,
            redeliveries.saturating_add(1),
            &error.to_string(),
            &self.config.service_name,
        )
        .with_metadata("action", action);

        if redeliveries >= self.config.max_redeliveries {
            error!(action = %action, error = %error, "Reply publish failed, redelivery limit reached");
            self.settled.remove(&correlation_id);
            return self.dead_letter(delivery, dead_letter).await;
        }

        warn!(action = %action, error = %error, "Reply publish failed, requeueing");
        self.settled.insert(&correlation_id, body);
        match delivery.requeue().await {
            Ok(()) => Settlement::Requeued,
            Err(e) => {
                // The original is gone; the dead letter is all that is left of it.
                error!(error = %e, "Failed to requeue message, dead-lettering");
                self.settled.remove(&correlation_id);
                let dead_letter = dead_letter.with_metadata("requeue_error", &e.to_string());
                match self.dead_letters.publish(dead_letter).await {
                    Ok(()) => Settlement::DeadLettered,
                    Err(e) => {
                        error!(error = %e, "Failed to publish dead letter, message lost");
                        Settlement::Dropped
                    }
                }
            }
        }
    }

    async fn ack(&self, delivery: Delivery) -> Settlement {
        if let Err(e) = delivery.ack().await {
            error!(error = %e, "Failed to acknowledge message");
        }
        Settlement::Acked
    }

    /// Send to the DLQ, then reject.
    ///
    /// If the DLQ is unreachable the message is requeued while under the
    /// redelivery bound, and dropped after.
    async fn dead_letter(&self, delivery: Delivery, dead_letter: DeadLetter) -> Settlement {
        let error = match self.dead_letters.publish(dead_letter).await {
            Ok(()) => {
                if let Err(e) = delivery.reject().await {
                    error!(error = %e, "Failed to reject message");
                }
                return Settlement::DeadLettered;
            }
            Err(e) => e,
        };

        if delivery.redelivery_count() < self.config.max_redeliveries {
            warn!(error = %error, "Failed to publish dead letter, requeueing");
            match delivery.requeue().await {
                Ok(()) => Settlement::Requeued,
                Err(e) => {
                    error!(error = %e, "Failed to requeue message, message lost");
                    Settlement::Dropped
                }
            }
        } else {
            error!(error = %error, "Failed to publish dead letter, redelivery limit reached, message lost");
            if let Err(e) = delivery.reject().await {
                error!(error = %e, "Failed to reject message");
            }
            Settlement::Dropped
        }
    }
}

#[cfg(test)]
mod tests;
