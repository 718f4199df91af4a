//! Error types for the shelterhub client library.

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur during client operations.
///
/// Callers must keep "the service could not answer" apart from "the service
/// answered no": the first is [`ClientError::Unavailable`], the second is
/// [`ClientError::Rejected`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No reply arrived: broker unreachable, timed out, or shutting down.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service replied with `success: false`.
    #[error("request rejected: {message}")]
    Rejected { message: String },

    /// The reply body could not be understood.
    #[error("invalid reply: {0}")]
    InvalidReply(String),

    /// Invalid argument provided by caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    /// Returns the error message.
    pub fn message(&self) -> String {
        match self {
            ClientError::Unavailable(msg) => msg.clone(),
            ClientError::Rejected { message } => message.clone(),
            ClientError::InvalidReply(msg) => msg.clone(),
            ClientError::InvalidArgument(msg) => msg.clone(),
        }
    }

    /// Returns true if the service could not be reached in time.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ClientError::Unavailable(_))
    }

    /// Returns true if the service answered with a domain failure.
    pub fn is_rejected(&self) -> bool {
        matches!(self, ClientError::Rejected { .. })
    }

    /// Message suitable for showing to an end user.
    ///
    /// Rejections carry the service's own wording; everything else is
    /// reported as a generic availability problem.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Rejected { message } => message.clone(),
            ClientError::Unavailable(_) => "Service unavailable, please try again later".to_string(),
            ClientError::InvalidReply(_) | ClientError::InvalidArgument(_) => {
                "An error occurred".to_string()
            }
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::InvalidReply(e.to_string())
    }
}
