//! The orchestrator driven by the transport host for one hub.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::client::ClientActor;
use crate::error::{Result, ensure_not_empty};
use crate::group::GroupActor;
use crate::message::{Envelope, HubMessage, TopicNames, user_group};
use crate::metrics::BackplaneMetrics;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::routing::{Router, deliver_local, first_error};
use crate::streams::{EnvelopeHandler, StreamSubscriptionManager, envelope_handler};
use crate::substrate::ClusterSubstrate;

/// Connects, disconnects, groups and sends for one hub on one server.
///
/// Sends to a single connection try the local registry first and only fall
/// back to the connection's client actor on a miss. Group sends go through
/// the group actor; sends to everyone go out on the hub broadcast topic.
pub struct HubLifetimeManager {
    hub: String,
    server_id: String,
    registry: Arc<ConnectionRegistry>,
    router: Arc<Router>,
    streams: StreamSubscriptionManager,
    metrics: Arc<BackplaneMetrics>,
    disposed: AtomicBool,
}

impl HubLifetimeManager {
    pub fn new(
        hub: &str,
        server_id: &str,
        provider: &str,
        substrate: ClusterSubstrate,
        metrics: Arc<BackplaneMetrics>,
    ) -> Result<Self> {
        ensure_not_empty("hub", hub)?;
        ensure_not_empty("server_id", server_id)?;
        ensure_not_empty("provider", provider)?;

        let registry = Arc::new(ConnectionRegistry::new());
        let streams = StreamSubscriptionManager::new(substrate.pubsub.clone(), provider, server_id);
        let router = Router::new(
            TopicNames::new(provider, hub),
            substrate,
            Some(registry.clone()),
            metrics.clone(),
        );

        Ok(Self {
            hub: hub.to_string(),
            server_id: server_id.to_string(),
            registry,
            router,
            streams,
            metrics,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Connections held by this server for this hub
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn client(&self, connection_id: &str) -> Result<ClientActor> {
        ensure_not_empty("connection_id", connection_id)?;
        Ok(self.router.client(connection_id))
    }

    pub fn group(&self, group: &str) -> Result<GroupActor> {
        ensure_not_empty("group", group)?;
        Ok(self.router.group(group))
    }

    pub async fn on_connected(&self, connection: ConnectionHandle) -> Result<()> {
        let connection_id = connection.connection_id().to_string();
        ensure_not_empty("connection_id", &connection_id)?;
        self.ensure_streams().await?;

        if self.registry.try_add(&connection_id, connection.clone())? {
            self.metrics.connection_opened();
        } else {
            warn!(hub = %self.hub, connection_id = %connection_id, "connection id already registered");
        }

        self.router
            .client(&connection_id)
            .connect(&self.server_id)
            .await?;

        if let Some(user) = connection.user_id().filter(|u| !u.is_empty()) {
            self.router
                .group(&user_group(user))
                .add_connection(&connection_id)
                .await?;
        }

        info!(
            hub = %self.hub,
            server_id = %self.server_id,
            connection_id = %connection_id,
            user = connection.user_id(),
            "connection registered"
        );
        Ok(())
    }

    pub async fn on_disconnected(&self, connection: ConnectionHandle) -> Result<()> {
        let connection_id = connection.connection_id().to_string();
        ensure_not_empty("connection_id", &connection_id)?;

        if self.registry.try_remove(&connection_id) {
            self.metrics.connection_closed();
        }

        self.router.client(&connection_id).disconnect().await?;

        if let Some(user) = connection.user_id().filter(|u| !u.is_empty()) {
            self.router
                .group(&user_group(user))
                .remove_connection(&connection_id)
                .await?;
        }

        info!(hub = %self.hub, connection_id = %connection_id, "connection unregistered");
        Ok(())
    }

    pub async fn add_to_group(&self, connection_id: &str, group: &str) -> Result<()> {
        ensure_not_empty("connection_id", connection_id)?;
        ensure_not_empty("group", group)?;
        self.router.group(group).add_connection(connection_id).await
    }

    pub async fn remove_from_group(&self, connection_id: &str, group: &str) -> Result<()> {
        ensure_not_empty("connection_id", connection_id)?;
        ensure_not_empty("group", group)?;
        self.router.group(group).remove_connection(connection_id).await
    }

    pub async fn send_connection(&self, connection_id: &str, message: &HubMessage) -> Result<()> {
        ensure_not_empty("connection_id", connection_id)?;
        message.validate()?;
        self.router.send_connection(connection_id, message).await
    }

    pub async fn send_connections(
        &self,
        connection_ids: &[String],
        message: &HubMessage,
    ) -> Result<()> {
        message.validate()?;
        for id in connection_ids {
            ensure_not_empty("connection_id", id)?;
        }
        self.router.send_each(connection_ids, message).await
    }

    pub async fn send_group(&self, group: &str, message: &HubMessage) -> Result<()> {
        self.send_group_except(group, message, &[]).await
    }

    /// Send to every member of `group` except the connections in `excluded`.
    pub async fn send_group_except(
        &self,
        group: &str,
        message: &HubMessage,
        excluded: &[String],
    ) -> Result<()> {
        ensure_not_empty("group", group)?;
        message.validate()?;
        self.router.group(group).send_message(message, excluded).await
    }

    pub async fn send_groups(&self, groups: &[String], message: &HubMessage) -> Result<()> {
        message.validate()?;
        for group in groups {
            ensure_not_empty("group", group)?;
        }
        self.fan_out_groups(groups.iter().cloned(), message).await
    }

    pub async fn send_user(&self, user_id: &str, message: &HubMessage) -> Result<()> {
        ensure_not_empty("user_id", user_id)?;
        message.validate()?;
        self.router
            .group(&user_group(user_id))
            .send_message(message, &[])
            .await
    }

    pub async fn send_users(&self, user_ids: &[String], message: &HubMessage) -> Result<()> {
        message.validate()?;
        for user in user_ids {
            ensure_not_empty("user_id", user)?;
        }
        self.fan_out_groups(user_ids.iter().map(|u| user_group(u)), message)
            .await
    }

    pub async fn send_all(&self, message: &HubMessage) -> Result<()> {
        self.send_all_except(message, &[]).await
    }

    /// Publish on the hub broadcast topic; every subscribed server delivers to
    /// its local connections minus `excluded`.
    pub async fn send_all_except(&self, message: &HubMessage, excluded: &[String]) -> Result<()> {
        message.validate()?;
        self.ensure_streams().await?;
        let envelope = Envelope::Broadcast {
            message: message.clone(),
            excluded: excluded.to_vec(),
        };
        self.streams.publish_to_all(&envelope).await?;
        self.metrics.broadcast_published();
        debug!(hub = %self.hub, method = %message.method, excluded = excluded.len(), "broadcast published");
        Ok(())
    }

    /// Release the topic subscriptions. Safe to call any number of times.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.streams.dispose().await;
        info!(hub = %self.hub, server_id = %self.server_id, "hub lifetime manager disposed");
    }

    async fn fan_out_groups(
        &self,
        groups: impl Iterator<Item = String>,
        message: &HubMessage,
    ) -> Result<()> {
        let actors: Vec<GroupActor> = groups.map(|g| self.router.group(&g)).collect();
        let results = join_all(actors.iter().map(|g| g.send_message(message, &[]))).await;
        first_error(results)
    }

    async fn ensure_streams(&self) -> Result<()> {
        if self.streams.is_initialized() {
            return Ok(());
        }
        let on_all = self.local_delivery_handler("broadcast");
        let on_server = self.local_delivery_handler("inbox");
        self.streams
            .ensure_initialized(&self.hub, on_all, on_server)
            .await
    }

    fn local_delivery_handler(&self, source: &'static str) -> EnvelopeHandler {
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        envelope_handler(move |envelope| {
            let registry = registry.clone();
            let metrics = metrics.clone();
            async move {
                metrics.envelope_received();
                deliver_envelope(&registry, &metrics, envelope, source).await;
            }
        })
    }
}

impl Drop for HubLifetimeManager {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::Acquire) {
            debug!(hub = %self.hub, "hub lifetime manager dropped without dispose");
        }
    }
}

/// Write an envelope received from a hub topic to the local connections it addresses.
async fn deliver_envelope(
    registry: &ConnectionRegistry,
    metrics: &BackplaneMetrics,
    envelope: Envelope,
    source: &'static str,
) {
    match envelope {
        Envelope::Broadcast { message, excluded } => {
            let targets: Vec<ConnectionHandle> = registry
                .all()
                .into_iter()
                .filter(|c| !excluded.iter().any(|id| id == c.connection_id()))
                .collect();
            debug!(source, method = %message.method, targets = targets.len(), "delivering broadcast");
            join_all(
                targets
                    .iter()
                    .map(|connection| deliver_local(connection, &message, metrics)),
            )
            .await;
        }
        Envelope::Direct {
            connection_id,
            message,
        } => match registry.get(&connection_id) {
            Ok(Some(connection)) => deliver_local(&connection, &message, metrics).await,
            _ => {
                metrics.send_dropped();
                debug!(
                    source,
                    connection_id = %connection_id,
                    method = %message.method,
                    "addressed connection is not held here, dropping"
                );
            }
        },
    }
}
