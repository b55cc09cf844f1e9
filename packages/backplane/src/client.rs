//! Per-connection record of which server currently owns the socket.

use std::sync::Arc;

use keyed_actors::{KeyedActorHost, PubSub, invoke};
use tracing::debug;

use crate::error::{Result, ensure_not_empty};
use crate::message::{Envelope, HubMessage, TopicNames, client_key};

/// State owned by a client actor. Advisory: it trails the real socket owner.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientBinding {
    server_id: Option<String>,
}

impl ClientBinding {
    pub fn bind(&mut self, server_id: &str) {
        self.server_id = Some(server_id.to_string());
    }

    pub fn clear(&mut self) {
        self.server_id = None;
    }

    pub fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }
}

/// Handle to the client actor for one (hub, connection) pair.
#[derive(Clone)]
pub struct ClientActor {
    connection_id: String,
    key: String,
    host: Arc<dyn KeyedActorHost<ClientBinding>>,
    pubsub: Arc<dyn PubSub>,
    topics: TopicNames,
}

impl ClientActor {
    pub fn new(
        topics: TopicNames,
        connection_id: &str,
        host: Arc<dyn KeyedActorHost<ClientBinding>>,
        pubsub: Arc<dyn PubSub>,
    ) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            key: client_key(topics.hub(), connection_id),
            host,
            pubsub,
            topics,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Record `server_id` as the owner, replacing any previous binding.
    pub async fn connect(&self, server_id: &str) -> Result<()> {
        ensure_not_empty("server_id", server_id)?;
        let server = server_id.to_string();
        invoke(self.host.as_ref(), &self.key, move |binding: &mut ClientBinding| {
            binding.bind(&server)
        })
        .await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        invoke(self.host.as_ref(), &self.key, |binding: &mut ClientBinding| {
            binding.clear()
        })
        .await?;
        Ok(())
    }

    pub async fn server_id(&self) -> Result<Option<String>> {
        Ok(invoke(self.host.as_ref(), &self.key, |binding: &mut ClientBinding| {
            binding.server_id().map(str::to_string)
        })
        .await?)
    }

    /// Forward `message` to the owning server's inbox. Returns `Ok(false)`
    /// without publishing when nobody owns the connection.
    pub async fn send_message(&self, message: &HubMessage) -> Result<bool> {
        message.validate()?;
        let Some(owner) = self.server_id().await? else {
            debug!(
                connection_id = %self.connection_id,
                method = %message.method,
                "connection has no owner, dropping message"
            );
            return Ok(false);
        };

        let envelope = Envelope::Direct {
            connection_id: self.connection_id.clone(),
            message: message.clone(),
        };
        self.pubsub
            .publish(&self.topics.server(&owner), envelope.encode()?)
            .await?;
        debug!(
            connection_id = %self.connection_id,
            server_id = %owner,
            method = %message.method,
            "routed message to owning server"
        );
        Ok(true)
    }
}
