//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter. Provides standard
//! backoff configurations for broker connection, publish, and consumer
//! re-subscription.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::bus::BusError;

/// Attempts made by a publish before giving up (on top of the first try).
pub const PUBLISH_MAX_RETRIES: usize = 5;

/// Backoff for broker connection at startup and on reconnection.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Retries after the first attempt: `max_retries`
/// - Jitter enabled
pub fn connection_backoff(max_retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(max_retries)
        .with_jitter()
}

/// Backoff for publish retries.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 5
/// - Jitter enabled
pub fn publish_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(PUBLISH_MAX_RETRIES)
        .with_jitter()
}

/// Backoff for re-subscribing after a consumer stream ends.
///
/// Unbounded: callers stop on shutdown, not on attempt count.
pub fn consumer_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(30))
        .without_max_times()
        .with_jitter()
}

/// Delays to wait before each attempt: zero for the first, then the backoff.
pub fn attempt_delays(builder: ExponentialBuilder) -> impl Iterator<Item = Duration> {
    std::iter::once(Duration::ZERO).chain(builder.build())
}

/// Whether a transport failure may succeed on retry.
///
/// A closed transport never recovers; everything else is assumed transient.
pub fn is_retryable(error: &BusError) -> bool {
    !matches!(error, BusError::Closed)
}
