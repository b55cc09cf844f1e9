use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::client::ClientActor;
use crate::error::Result;
use crate::group::GroupActor;
use crate::message::{HubMessage, TopicNames};
use crate::metrics::BackplaneMetrics;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::substrate::ClusterSubstrate;

/// Resolves connection and group targets for one hub.
///
/// With a local registry, connections held by this process are written to
/// directly; everything else goes through the connection's client actor.
pub(crate) struct Router {
    topics: TopicNames,
    substrate: ClusterSubstrate,
    registry: Option<Arc<ConnectionRegistry>>,
    metrics: Arc<BackplaneMetrics>,
}

impl Router {
    pub fn new(
        topics: TopicNames,
        substrate: ClusterSubstrate,
        registry: Option<Arc<ConnectionRegistry>>,
        metrics: Arc<BackplaneMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            topics,
            substrate,
            registry,
            metrics,
        })
    }

    pub fn topics(&self) -> &TopicNames {
        &self.topics
    }

    pub fn substrate(&self) -> &ClusterSubstrate {
        &self.substrate
    }

    pub fn metrics(&self) -> &Arc<BackplaneMetrics> {
        &self.metrics
    }

    pub fn client(&self, connection_id: &str) -> ClientActor {
        ClientActor::new(
            self.topics.clone(),
            connection_id,
            self.substrate.clients.clone(),
            self.substrate.pubsub.clone(),
        )
    }

    pub fn group(self: &Arc<Self>, group: &str) -> GroupActor {
        GroupActor::new(group, self.clone())
    }

    /// Deliver to one connection: local write on a registry hit, client actor otherwise.
    pub async fn send_connection(&self, connection_id: &str, message: &HubMessage) -> Result<()> {
        if let Some(registry) = &self.registry {
            if let Some(connection) = registry.get(connection_id)? {
                deliver_local(&connection, message, &self.metrics).await;
                return Ok(());
            }
        }

        self.metrics.remote_route();
        let routed = self.client(connection_id).send_message(message).await?;
        if !routed {
            self.metrics.send_dropped();
        }
        Ok(())
    }

    /// Deliver to each id independently. Every id is attempted; the first
    /// failure is returned afterwards.
    pub async fn send_each(&self, connection_ids: &[String], message: &HubMessage) -> Result<()> {
        let results = join_all(
            connection_ids
                .iter()
                .map(|id| self.send_connection(id, message)),
        )
        .await;
        first_error(results)
    }
}

/// Write to a connection this process holds. Transport failures are logged
/// and counted; the host tears the socket down on its own.
pub(crate) async fn deliver_local(
    connection: &ConnectionHandle,
    message: &HubMessage,
    metrics: &BackplaneMetrics,
) {
    match connection.send(message).await {
        Ok(()) => {
            metrics.local_delivery();
            debug!(
                connection_id = connection.connection_id(),
                method = %message.method,
                "delivered locally"
            );
        }
        Err(e) => {
            metrics.write_failure();
            warn!(
                connection_id = connection.connection_id(),
                method = %message.method,
                error = %e,
                "failed to write to connection"
            );
        }
    }
}

pub(crate) fn first_error(results: Vec<Result<()>>) -> Result<()> {
    let mut failures = results.into_iter().filter_map(|r| r.err());
    match failures.next() {
        Some(first) => {
            let others = failures.count();
            if others > 0 {
                warn!(additional_failures = others, error = %first, "fan-out partially failed");
            }
            Err(first)
        }
        None => Ok(()),
    }
}
