//! Backplane - route real-time messages to connections anywhere in a fleet
//!
//! Every server holds some of a hub's connections. This crate lets any of
//! them send to one connection, a group, a user or everyone without knowing
//! which server holds the socket:
//!
//! - [`ConnectionRegistry`]: the connections this process holds.
//! - [`ClientActor`]: which server owns a connection (advisory).
//! - [`GroupActor`]: group membership and group fan-out.
//! - [`ServerDirectoryActor`] + [`HeartbeatManager`]: liveness of servers.
//! - [`StreamSubscriptionManager`]: the hub broadcast topic and this server's inbox.
//! - [`HubLifetimeManager`]: what a transport host drives on connect, disconnect and send.
//! - [`Notifier`]: sending from code that holds no connections.
//!
//! State lives in keyed actors and messages travel over pub/sub topics, both
//! provided by a [`ClusterSubstrate`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use backplane::{BackplaneMetrics, ClusterSubstrate, HubLifetimeManager, HubMessage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), backplane::BackplaneError> {
//!     let substrate = ClusterSubstrate::in_memory(1024);
//!     let hub = HubLifetimeManager::new(
//!         "chat",
//!         "server-1",
//!         "default",
//!         substrate,
//!         Arc::new(BackplaneMetrics::new()),
//!     )?;
//!
//!     hub.send_group("lobby", &HubMessage::new("notice", vec![])).await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod directory;
mod error;
mod group;
mod heartbeat;
mod lifetime;
mod message;
mod metrics;
mod notifier;
mod registry;
mod routing;
mod streams;
mod substrate;
#[cfg(test)]
mod test_helpers;

pub use client::{ClientActor, ClientBinding};
pub use config::{BackplaneConfig, BackplaneFileConfig};
pub use directory::{DIRECTORY_KEY, ServerDirectory, ServerDirectoryActor, ServerInfo, ServerRegistry};
pub use error::{BackplaneError, Result, TransportError};
pub use group::{GroupActor, GroupMembership};
pub use heartbeat::{
    ConnectionCountProvider, FixedServerIdProvider, HeartbeatManager, HeartbeatOptions,
    ServerIdProvider, UuidServerIdProvider,
};
pub use lifetime::HubLifetimeManager;
pub use message::{Envelope, HubMessage, TopicNames, user_group};
pub use metrics::{BackplaneMetrics, MetricsSnapshot};
pub use notifier::Notifier;
pub use registry::{ConnectionHandle, ConnectionRegistry, HubConnection};
pub use streams::{EnvelopeHandler, StreamPhase, StreamSubscriptionManager, envelope_handler};
pub use substrate::ClusterSubstrate;
