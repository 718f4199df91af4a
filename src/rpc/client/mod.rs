//! Request/reply client.
//!
//! One exclusive reply queue per client process, consumed by a single
//! listener task. Each call registers a correlation id, publishes the
//! envelope with `reply_to` set to the shared queue, and waits on its
//! handle; the listener hands replies to the registry by correlation id.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use shelterhub_client::{ClientError, Envelope, Reply, Requester};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::{CorrelationId, CorrelationRegistry};
use super::{Result, RpcError};
use crate::bus::{ConsumeOptions, Delivery, DeliveryStream, OutboundMessage, QueueKind, Transport};
use crate::config::RpcSettings;
use crate::utils::retry::consumer_backoff;

/// Settings for an [`RpcClient`].
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Name of the calling process, part of the reply queue name.
    pub client_name: String,
    pub default_timeout: Duration,
    /// How often the listener sweeps expired requests.
    pub reap_interval: Duration,
    pub reply_queue_prefix: String,
}

impl RpcClientConfig {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self::from_settings(client_name, &RpcSettings::default())
    }

    pub fn from_settings(client_name: impl Into<String>, settings: &RpcSettings) -> Self {
        Self {
            client_name: client_name.into(),
            default_timeout: Duration::from_secs(settings.timeout_secs),
            reap_interval: Duration::from_millis(settings.reap_interval_ms.max(1)),
            reply_queue_prefix: settings.reply_queue_prefix.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    registry: CorrelationRegistry,
    config: RpcClientConfig,
    reply_queue: String,
    /// Target queues already declared by this client.
    declared: Mutex<HashSet<String>>,
    accepting: AtomicBool,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Request/reply client sharing one reply queue across all calls.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Declare the reply queue and start the reply listener.
    pub async fn start(transport: Arc<dyn Transport>, config: RpcClientConfig) -> Result<Self> {
        let reply_queue = format!(
            "{}.{}.{}",
            config.reply_queue_prefix,
            config.client_name,
            uuid::Uuid::new_v4().simple()
        );

        let stream = open_reply_stream(transport.as_ref(), &reply_queue).await?;

        let inner = Arc::new(ClientInner {
            transport,
            registry: CorrelationRegistry::new(),
            config,
            reply_queue,
            declared: Mutex::new(HashSet::new()),
            accepting: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            listener: Mutex::new(None),
        });

        let handle = tokio::spawn(listen(inner.clone(), stream));
        *inner.listener.lock() = Some(handle);

        info!(reply_queue = %inner.reply_queue, "RPC client started");
        Ok(Self { inner })
    }

    pub fn reply_queue(&self) -> &str {
        &self.inner.reply_queue
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.inner.registry
    }

    /// Requests published and not yet settled.
    pub fn pending(&self) -> usize {
        self.inner.registry.len()
    }

    /// Publish `{action, data}` to `queue` and wait for the correlated reply.
    ///
    /// `timeout` defaults to the configured one.
    #[tracing::instrument(name = "rpc.call", skip_all, fields(queue = %queue, action = %action))]
    pub async fn call(
        &self,
        queue: &str,
        action: &str,
        data: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<Reply> {
        self.send(queue, Envelope::new(action, data), timeout).await
    }

    /// Publish a prepared envelope and wait for the correlated reply.
    pub async fn send(
        &self,
        queue: &str,
        envelope: Envelope,
        timeout: Option<Duration>,
    ) -> Result<Reply> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(RpcError::ShuttingDown);
        }

        self.ensure_declared(queue).await?;
        let body = envelope
            .to_vec()
            .map_err(|e| RpcError::Encode(e.to_string()))?;

        // Register before publishing so a fast reply always finds its entry.
        let id = CorrelationId::new();
        let handle = self.inner.registry.register(
            id.clone(),
            self.inner.reply_queue.clone(),
            timeout.unwrap_or(self.inner.config.default_timeout),
        )?;

        let message = OutboundMessage::new(body)
            .with_correlation_id(id.as_str())
            .with_reply_to(self.inner.reply_queue.clone());

        // On failure the handle drops here and cancels the entry.
        self.inner.transport.publish(queue, message).await?;
        debug!(correlation_id = %id, queue = %queue, action = %envelope.action, "Request published");

        handle.wait().await
    }

    /// Stop accepting calls. In-flight calls keep waiting.
    pub fn stop_accepting(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for in-flight calls to settle.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.inner.registry.drain(timeout).await
    }

    /// Stop accepting, drain, fail the rest with `ShuttingDown`, and stop
    /// the listener. Returns the number of abandoned requests.
    pub async fn shutdown(&self, drain_timeout: Duration) -> usize {
        self.stop_accepting();
        let drained = self.drain(drain_timeout).await;
        let abandoned = if drained {
            0
        } else {
            self.inner.registry.fail_all(|_| RpcError::ShuttingDown)
        };

        self.inner.shutdown.cancel();
        let listener = self.inner.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!(error = %e, "Reply listener ended abnormally");
            }
        }

        info!(abandoned, "RPC client stopped");
        abandoned
    }

    async fn ensure_declared(&self, queue: &str) -> Result<()> {
        if self.inner.declared.lock().contains(queue) {
            return Ok(());
        }
        self.inner
            .transport
            .declare_queue(queue, QueueKind::Durable)
            .await?;
        self.inner.declared.lock().insert(queue.to_string());
        Ok(())
    }
}

#[async_trait]
impl Requester for RpcClient {
    async fn request(&self, queue: &str, envelope: Envelope) -> shelterhub_client::Result<Reply> {
        self.send(queue, envelope, None)
            .await
            .map_err(ClientError::from)
    }
}

async fn open_reply_stream(transport: &dyn Transport, reply_queue: &str) -> Result<DeliveryStream> {
    transport.declare_queue(reply_queue, QueueKind::Reply).await?;
    let stream = transport
        .consume(
            reply_queue,
            ConsumeOptions {
                prefetch: 0,
                auto_ack: true,
                consumer_tag: "shelterhub-reply".to_string(),
            },
        )
        .await?;
    Ok(stream)
}

/// Reply listener: demultiplexes replies, sweeps expired requests, and
/// re-subscribes with backoff when the consumer ends.
async fn listen(inner: Arc<ClientInner>, mut stream: DeliveryStream) {
    let backoff_builder = consumer_backoff();
    let mut backoff_iter = backoff_builder.build();
    let mut reaper = tokio::time::interval(inner.config.reap_interval);
    reaper.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = reaper.tick() => {
                inner.registry.reap_expired();
                continue;
            }
            item = stream.next() => match item {
                Some(Ok(delivery)) => {
                    handle_reply(&inner.registry, delivery);
                    continue;
                }
                Some(Err(e)) => error!(error = %e, "Reply consumer error, will reconnect"),
                None => info!(reply_queue = %inner.reply_queue, "Reply stream ended, reconnecting..."),
            },
        }

        if inner.shutdown.is_cancelled() {
            break;
        }

        // Stream broke: re-subscribe until it works or we are told to stop.
        loop {
            if inner.transport.is_closed() {
                info!(reply_queue = %inner.reply_queue, "Transport closed, reply listener stopping");
                return;
            }

            let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
            tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            inner.registry.reap_expired();

            match open_reply_stream(inner.transport.as_ref(), &inner.reply_queue).await {
                Ok(new_stream) => {
                    info!(reply_queue = %inner.reply_queue, "Reply consumer reconnected");
                    stream = new_stream;
                    backoff_iter = backoff_builder.build();
                    break;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        backoff_ms = %delay.as_millis(),
                        reply_queue = %inner.reply_queue,
                        "Failed to re-subscribe reply queue, retrying after backoff"
                    );
                }
            }
        }
    }

    debug!(reply_queue = %inner.reply_queue, "Reply listener stopped");
}

fn handle_reply(registry: &CorrelationRegistry, delivery: Delivery) {
    let Some(correlation_id) = delivery.correlation_id().map(str::to_string) else {
        warn!(queue = %delivery.queue, "Reply without correlation id discarded");
        return;
    };

    match Reply::from_slice(&delivery.payload) {
        Ok(reply) => {
            registry.resolve(&correlation_id, reply);
        }
        Err(e) => {
            warn!(correlation_id = %correlation_id, error = %e, "Undecodable reply");
            registry.fail(&correlation_id, RpcError::InvalidReply(e.to_string()));
        }
    }
}
