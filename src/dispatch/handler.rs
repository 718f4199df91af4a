//! Action handlers and the per-service registry.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use shelterhub_client::{Envelope, Reply};
use tracing::error;

use crate::password::PasswordError;
use crate::storage::StorageError;

/// Failure while handling an action.
///
/// Every variant becomes a `success: false` reply; none of them fail the
/// message at the transport level.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Business rule violation, replied verbatim.
    #[error("{0}")]
    Rejected(String),

    /// `data` does not fit the action.
    #[error("Invalid request: {0}")]
    InvalidPayload(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Password error: {0}")]
    Password(#[from] PasswordError),
}

impl HandlerError {
    pub fn rejected(message: impl Into<String>) -> Self {
        HandlerError::Rejected(message.into())
    }

    /// The reply sent back for this failure.
    ///
    /// Collaborator failures are logged here and never leak detail to the
    /// caller.
    pub fn into_reply(self) -> Reply {
        match self {
            HandlerError::Rejected(message) => Reply::failure(message),
            HandlerError::InvalidPayload(_) => Reply::failure(self.to_string()),
            HandlerError::Storage(_) | HandlerError::Password(_) => {
                error!(error = %self, "Action failed on a collaborator");
                Reply::failure("Internal Server Error")
            }
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::InvalidPayload(e.to_string())
    }
}

pub type HandlerResult = Result<Reply, HandlerError>;

/// Handles one action of a service.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> HandlerResult;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, envelope: Envelope) -> HandlerResult {
        (self.0)(envelope).await
    }
}

/// Wrap an async closure as an [`ActionHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handlers keyed by action name.
///
/// The key set is the service's known operation set: anything else is an
/// unknown action.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, replacing any previous one.
    pub fn register(mut self, action: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.insert(action.into(), handler);
        self
    }

    /// Register a handler taking the action's typed payload.
    ///
    /// A payload that does not decode is answered with
    /// [`HandlerError::InvalidPayload`] before `f` runs.
    pub fn on<T, F, Fut>(self, action: impl Into<String>, f: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = handler_fn(move |envelope: Envelope| {
            let call = envelope.payload::<T>().map(&f);
            async move {
                match call {
                    Ok(fut) => fut.await,
                    Err(e) => Err(HandlerError::from(e)),
                }
            }
        });
        self.register(action, handler)
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action).cloned()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
