/// Errors raised by the actor and pub/sub substrates
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubstrateError {
    /// The actor's mailbox is gone and could not be reopened
    #[error("mailbox for actor '{key}' is closed")]
    MailboxClosed { key: String },

    /// The actor dropped the operation without replying (it panicked or stopped)
    #[error("actor '{key}' did not reply")]
    NoReply { key: String },

    /// Publishing to a topic failed
    #[error("failed to publish to topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    /// Subscribing to a topic failed
    #[error("failed to subscribe to topic '{topic}': {reason}")]
    Subscribe { topic: String, reason: String },
}

impl SubstrateError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::MailboxClosed { .. } => "mailbox_closed",
            Self::NoReply { .. } => "no_reply",
            Self::Publish { .. } => "publish_failed",
            Self::Subscribe { .. } => "subscribe_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        let err = SubstrateError::NoReply { key: "k".into() };
        assert_eq!(err.error_code(), "no_reply");
        assert_eq!(err.to_string(), "actor 'k' did not reply");

        let err = SubstrateError::Publish {
            topic: "t".into(),
            reason: "broker down".into(),
        };
        assert_eq!(err.error_code(), "publish_failed");
        assert!(err.to_string().contains("broker down"));
    }
}
