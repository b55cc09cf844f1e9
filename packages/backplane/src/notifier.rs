//! Sending from outside any connection lifecycle, e.g. from background jobs.

use std::sync::Arc;

use keyed_actors::PubSub;
use tracing::debug;

use crate::error::{Result, ensure_not_empty};
use crate::message::{Envelope, HubMessage, TopicNames, user_group};
use crate::metrics::BackplaneMetrics;
use crate::routing::Router;
use crate::substrate::ClusterSubstrate;

/// Sends to a hub's connections without holding any of them.
///
/// Every send goes through the substrate: there is no local registry to try
/// first and no subscription is ever made.
#[derive(Clone)]
pub struct Notifier {
    router: Arc<Router>,
}

impl Notifier {
    pub fn new(
        hub: &str,
        provider: &str,
        substrate: ClusterSubstrate,
        metrics: Arc<BackplaneMetrics>,
    ) -> Result<Self> {
        ensure_not_empty("hub", hub)?;
        ensure_not_empty("provider", provider)?;
        Ok(Self {
            router: Router::new(TopicNames::new(provider, hub), substrate, None, metrics),
        })
    }

    pub fn hub(&self) -> &str {
        self.router.topics().hub()
    }

    pub async fn send_all(&self, message: &HubMessage) -> Result<()> {
        self.send_all_except(message, &[]).await
    }

    pub async fn send_all_except(&self, message: &HubMessage, excluded: &[String]) -> Result<()> {
        message.validate()?;
        let envelope = Envelope::Broadcast {
            message: message.clone(),
            excluded: excluded.to_vec(),
        };
        let topic = self.router.topics().all();
        self.router
            .substrate()
            .pubsub
            .publish(&topic, envelope.encode()?)
            .await?;
        self.router.metrics().broadcast_published();
        debug!(topic = %topic, method = %message.method, "notifier broadcast");
        Ok(())
    }

    pub async fn send_connection(&self, connection_id: &str, message: &HubMessage) -> Result<()> {
        ensure_not_empty("connection_id", connection_id)?;
        message.validate()?;
        self.router.send_connection(connection_id, message).await
    }

    pub async fn send_group(&self, group: &str, message: &HubMessage) -> Result<()> {
        ensure_not_empty("group", group)?;
        message.validate()?;
        self.router.group(group).send_message(message, &[]).await
    }

    pub async fn send_user(&self, user_id: &str, message: &HubMessage) -> Result<()> {
        ensure_not_empty("user_id", user_id)?;
        message.validate()?;
        self.router
            .group(&user_group(user_id))
            .send_message(message, &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackplaneError;
    use crate::lifetime::HubLifetimeManager;
    use crate::test_helpers::{RecordingConnection, instrumented_substrate};

    fn msg(method: &str) -> HubMessage {
        HubMessage::new(method, vec![])
    }

    #[tokio::test]
    async fn reaches_connections_held_by_a_server() {
        let inst = instrumented_substrate();
        let metrics = Arc::new(BackplaneMetrics::new());
        let hub =
            HubLifetimeManager::new("chat", "s1", "default", inst.substrate.clone(), metrics.clone())
                .unwrap();
        let alice = RecordingConnection::with_user("c1", "alice");
        let bob = RecordingConnection::new("c2");
        hub.on_connected(alice.clone()).await.unwrap();
        hub.on_connected(bob.clone()).await.unwrap();
        hub.add_to_group("c2", "ops").await.unwrap();

        let notifier = Notifier::new("chat", "default", inst.substrate, metrics).unwrap();
        notifier.send_connection("c1", &msg("direct")).await.unwrap();
        notifier.send_user("alice", &msg("user")).await.unwrap();
        notifier.send_group("ops", &msg("group")).await.unwrap();
        notifier.send_all_except(&msg("all"), &["c1".to_string()]).await.unwrap();

        assert_eq!(alice.wait_for(2).await.len(), 2);
        assert_eq!(bob.wait_for(2).await.len(), 2);
        assert_eq!(alice.methods(), vec!["direct", "user"]);
        // inbox and broadcast topics are not ordered relative to each other
        let mut bob_methods = bob.methods();
        bob_methods.sort();
        assert_eq!(bob_methods, vec!["all", "group"]);
    }

    #[tokio::test]
    async fn never_subscribes_and_drops_unowned_targets() {
        let inst = instrumented_substrate();
        let notifier = Notifier::new(
            "chat",
            "default",
            inst.substrate,
            Arc::new(BackplaneMetrics::new()),
        )
        .unwrap();

        notifier.send_connection("ghost", &msg("m")).await.unwrap();
        notifier.send_group("empty", &msg("m")).await.unwrap();
        notifier.send_all(&msg("m")).await.unwrap();

        assert_eq!(
            inst.pubsub.published_topics(),
            vec![TopicNames::new("default", "chat").all()]
        );
        assert_eq!(notifier.hub(), "chat");
    }

    #[tokio::test]
    async fn rejects_empty_arguments() {
        let inst = instrumented_substrate();
        let notifier = Notifier::new(
            "chat",
            "default",
            inst.substrate,
            Arc::new(BackplaneMetrics::new()),
        )
        .unwrap();

        for result in [
            notifier.send_connection("", &msg("m")).await,
            notifier.send_group("", &msg("m")).await,
            notifier.send_user("", &msg("m")).await,
            notifier.send_all(&msg("")).await,
        ] {
            assert!(matches!(result, Err(BackplaneError::InvalidArgument { .. })));
        }
        assert_eq!(inst.pubsub.publishes(), 0);
        assert_eq!(inst.clients.dispatches(), 0);
    }
}
