use std::sync::Arc;

use keyed_actors::{InMemoryPubSub, KeyedActorHost, LocalActorHost, PubSub};

use crate::client::ClientBinding;
use crate::directory::ServerRegistry;
use crate::group::GroupMembership;

/// The shared actor hosts and pub/sub bus every server in a fleet talks to.
///
/// Cloning is cheap; all clones address the same actors and topics.
#[derive(Clone)]
pub struct ClusterSubstrate {
    pub clients: Arc<dyn KeyedActorHost<ClientBinding>>,
    pub groups: Arc<dyn KeyedActorHost<GroupMembership>>,
    pub directory: Arc<dyn KeyedActorHost<ServerRegistry>>,
    pub pubsub: Arc<dyn PubSub>,
}

impl ClusterSubstrate {
    /// Single-node substrate backed by in-process actors and broadcast channels.
    pub fn in_memory(topic_capacity: usize) -> Self {
        Self {
            clients: Arc::new(LocalActorHost::<ClientBinding>::new("client")),
            groups: Arc::new(LocalActorHost::<GroupMembership>::new("group")),
            directory: Arc::new(LocalActorHost::<ServerRegistry>::new("server-directory")),
            pubsub: Arc::new(InMemoryPubSub::with_capacity(topic_capacity)),
        }
    }
}
