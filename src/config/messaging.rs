//! Messaging, request/reply and dispatcher configuration types.

use serde::Deserialize;

/// Messaging type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// AMQP/RabbitMQ messaging.
    #[default]
    Amqp,
    /// In-memory broker inside this process (no external broker).
    Channel,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// AMQP-specific configuration.
    pub amqp: AmqpSettings,
}

/// AMQP-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpSettings {
    /// AMQP connection URL.
    pub url: String,
    /// Wait for broker confirmation of every publish.
    pub publisher_confirms: bool,
    /// Connection attempts at startup before giving up.
    pub connect_max_attempts: usize,
}

impl Default for AmqpSettings {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            publisher_confirms: true,
            connect_max_attempts: 30,
        }
    }
}

/// Request/reply client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    /// Default time to wait for a reply.
    pub timeout_secs: u64,
    /// Interval of the expired-request sweep.
    pub reap_interval_ms: u64,
    /// Reply queues are named `{prefix}.{client}.{uuid}`.
    pub reply_queue_prefix: String,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            reap_interval_ms: 1000,
            reply_queue_prefix: "shelterhub.reply".to_string(),
        }
    }
}

/// Queue consumer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Unacknowledged deliveries in flight. 1 serializes handling.
    pub prefetch: u16,
    /// Redeliveries allowed before a message is dead-lettered.
    pub max_redeliveries: u32,
    /// Publish dead letters to `shelterhub.dlq.<queue>`. When false they are
    /// only logged.
    pub dead_letter: bool,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            prefetch: 1,
            max_redeliveries: 5,
            dead_letter: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messaging_config_default() {
        let messaging = MessagingConfig::default();
        assert_eq!(messaging.messaging_type, MessagingType::Amqp);
        assert_eq!(messaging.amqp.url, "amqp://localhost:5672");
        assert!(messaging.amqp.publisher_confirms);
    }

    #[test]
    fn test_dispatcher_settings_default() {
        let dispatcher = DispatcherSettings::default();
        assert_eq!(dispatcher.prefetch, 1);
        assert_eq!(dispatcher.max_redeliveries, 5);
        assert!(dispatcher.dead_letter);
    }

    #[test]
    fn test_rpc_settings_default() {
        let rpc = RpcSettings::default();
        assert_eq!(rpc.timeout_secs, 30);
        assert_eq!(rpc.reply_queue_prefix, "shelterhub.reply");
    }
}
