//! Cluster-wide directory of live servers and their last heartbeat.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyed_actors::{KeyedActorHost, invoke};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, ensure_not_empty};

/// Every server shares one directory instance under this key.
pub const DIRECTORY_KEY: &str = "server-directory";

#[derive(Debug, Clone, PartialEq)]
struct ServerEntry {
    last_heartbeat: Instant,
    last_heartbeat_at: DateTime<Utc>,
    connection_count: usize,
}

/// Point-in-time view of one registered server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_id: String,
    pub last_heartbeat: DateTime<Utc>,
    pub connection_count: usize,
}

/// State owned by the directory actor.
#[derive(Debug, Default, PartialEq)]
pub struct ServerRegistry {
    servers: HashMap<String, ServerEntry>,
}

impl ServerRegistry {
    /// Upsert; refreshes the heartbeat time of an existing entry.
    pub fn register(&mut self, server_id: &str, now: Instant) {
        let entry = self
            .servers
            .entry(server_id.to_string())
            .or_insert(ServerEntry {
                last_heartbeat: now,
                last_heartbeat_at: Utc::now(),
                connection_count: 0,
            });
        entry.last_heartbeat = now;
        entry.last_heartbeat_at = Utc::now();
    }

    pub fn unregister(&mut self, server_id: &str) -> bool {
        self.servers.remove(server_id).is_some()
    }

    /// Refresh a registered server. Unknown ids are ignored so a heartbeat
    /// racing an unregister cannot bring the entry back.
    pub fn heartbeat(&mut self, server_id: &str, connection_count: usize, now: Instant) -> bool {
        match self.servers.get_mut(server_id) {
            Some(entry) => {
                entry.last_heartbeat = now;
                entry.last_heartbeat_at = Utc::now();
                entry.connection_count = connection_count;
                true
            }
            None => false,
        }
    }

    /// Servers whose last heartbeat is older than `timeout`, sorted by id.
    ///
    /// A zero timeout reports every registered server.
    pub fn dead_servers(&self, timeout: Duration, now: Instant) -> Vec<String> {
        let mut dead: Vec<String> = self
            .servers
            .iter()
            .filter(|(_, entry)| is_dead(entry, timeout, now))
            .map(|(id, _)| id.clone())
            .collect();
        dead.sort();
        dead
    }

    /// Remove and return the servers [`dead_servers`](Self::dead_servers) would report.
    pub fn reap(&mut self, timeout: Duration, now: Instant) -> Vec<String> {
        let dead = self.dead_servers(timeout, now);
        for id in &dead {
            self.servers.remove(id);
        }
        dead
    }

    pub fn snapshot(&self) -> Vec<ServerInfo> {
        let mut servers: Vec<ServerInfo> = self
            .servers
            .iter()
            .map(|(id, entry)| ServerInfo {
                server_id: id.clone(),
                last_heartbeat: entry.last_heartbeat_at,
                connection_count: entry.connection_count,
            })
            .collect();
        servers.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        servers
    }
}

fn is_dead(entry: &ServerEntry, timeout: Duration, now: Instant) -> bool {
    timeout.is_zero() || now.saturating_duration_since(entry.last_heartbeat) > timeout
}

/// Liveness registry as seen by a server process.
#[async_trait]
pub trait ServerDirectory: Send + Sync + 'static {
    async fn register(&self, server_id: &str) -> Result<()>;
    async fn unregister(&self, server_id: &str) -> Result<()>;
    async fn heartbeat(&self, server_id: &str, connection_count: usize) -> Result<()>;
    async fn dead_servers(&self, timeout: Duration) -> Result<Vec<String>>;
    async fn servers(&self) -> Result<Vec<ServerInfo>>;
    async fn reap_dead_servers(&self, timeout: Duration) -> Result<Vec<String>>;
}

/// [`ServerDirectory`] backed by the single directory actor.
#[derive(Clone)]
pub struct ServerDirectoryActor {
    host: Arc<dyn KeyedActorHost<ServerRegistry>>,
}

impl ServerDirectoryActor {
    pub fn new(host: Arc<dyn KeyedActorHost<ServerRegistry>>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl ServerDirectory for ServerDirectoryActor {
    async fn register(&self, server_id: &str) -> Result<()> {
        ensure_not_empty("server_id", server_id)?;
        let id = server_id.to_string();
        invoke(self.host.as_ref(), DIRECTORY_KEY, move |reg: &mut ServerRegistry| {
            reg.register(&id, Instant::now())
        })
        .await?;
        debug!(server_id, "server registered");
        Ok(())
    }

    async fn unregister(&self, server_id: &str) -> Result<()> {
        ensure_not_empty("server_id", server_id)?;
        let id = server_id.to_string();
        let removed = invoke(self.host.as_ref(), DIRECTORY_KEY, move |reg: &mut ServerRegistry| {
            reg.unregister(&id)
        })
        .await?;
        debug!(server_id, removed, "server unregistered");
        Ok(())
    }

    async fn heartbeat(&self, server_id: &str, connection_count: usize) -> Result<()> {
        ensure_not_empty("server_id", server_id)?;
        let id = server_id.to_string();
        let known = invoke(self.host.as_ref(), DIRECTORY_KEY, move |reg: &mut ServerRegistry| {
            reg.heartbeat(&id, connection_count, Instant::now())
        })
        .await?;
        if !known {
            debug!(server_id, "heartbeat from unregistered server ignored");
        }
        Ok(())
    }

    async fn dead_servers(&self, timeout: Duration) -> Result<Vec<String>> {
        Ok(invoke(self.host.as_ref(), DIRECTORY_KEY, move |reg: &mut ServerRegistry| {
            reg.dead_servers(timeout, Instant::now())
        })
        .await?)
    }

    async fn servers(&self) -> Result<Vec<ServerInfo>> {
        Ok(invoke(self.host.as_ref(), DIRECTORY_KEY, |reg: &mut ServerRegistry| {
            reg.snapshot()
        })
        .await?)
    }

    async fn reap_dead_servers(&self, timeout: Duration) -> Result<Vec<String>> {
        Ok(invoke(self.host.as_ref(), DIRECTORY_KEY, move |reg: &mut ServerRegistry| {
            reg.reap(timeout, Instant::now())
        })
        .await?)
    }
}
