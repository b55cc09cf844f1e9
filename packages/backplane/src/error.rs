//! Error types for the backplane core.

use keyed_actors::SubstrateError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackplaneError {
    /// A required string parameter was empty
    #[error("invalid argument: '{name}' must not be empty")]
    InvalidArgument { name: &'static str },

    /// Publish attempted before the hub's stream subscriptions were wired up
    #[error("stream subscriptions for hub '{hub}' are not initialized")]
    NotInitialized { hub: String },

    /// The component was disposed and cannot be used again
    #[error("{component} has been disposed")]
    Disposed { component: &'static str },

    #[error(transparent)]
    Substrate(#[from] SubstrateError),

    /// A topic payload could not be encoded or decoded
    #[error("message codec error: {0}")]
    Codec(String),
}

impl BackplaneError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::NotInitialized { .. } => "not_initialized",
            Self::Disposed { .. } => "disposed",
            Self::Substrate(inner) => inner.error_code(),
            Self::Codec(_) => "codec",
        }
    }
}

impl From<serde_json::Error> for BackplaneError {
    fn from(err: serde_json::Error) -> Self {
        BackplaneError::Codec(err.to_string())
    }
}

pub type Result<T, E = BackplaneError> = std::result::Result<T, E>;

/// Failure writing to a locally held connection
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("connection send buffer is full")]
    Backpressure,

    #[error("transport error: {0}")]
    Other(String),
}

/// Reject empty string parameters before any remote call is made.
pub(crate) fn ensure_not_empty(name: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(BackplaneError::InvalidArgument { name })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_initialized_message() {
        let err = BackplaneError::NotInitialized { hub: "chat".into() };
        assert!(err.to_string().contains("not initialized"));
        assert_eq!(err.error_code(), "not_initialized");
    }

    #[test]
    fn ensure_not_empty_names_the_parameter() {
        assert!(ensure_not_empty("group", "g").is_ok());
        let err = ensure_not_empty("group", "").unwrap_err();
        assert!(matches!(err, BackplaneError::InvalidArgument { name: "group" }));
        assert!(err.to_string().contains("'group'"));
    }

    #[test]
    fn substrate_errors_keep_their_code() {
        let err: BackplaneError = SubstrateError::MailboxClosed { key: "k".into() }.into();
        assert_eq!(err.error_code(), "mailbox_closed");
    }
}
