//! Per-group membership sets and group fan-out.

use std::collections::BTreeSet;
use std::sync::Arc;

use keyed_actors::invoke;
use tracing::debug;

use crate::error::{Result, ensure_not_empty};
use crate::message::{HubMessage, group_key};
use crate::routing::Router;

/// State owned by a group actor.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    members: BTreeSet<String>,
}

impl GroupMembership {
    pub fn add(&mut self, connection_id: &str) -> bool {
        self.members.insert(connection_id.to_string())
    }

    pub fn remove(&mut self, connection_id: &str) -> bool {
        self.members.remove(connection_id)
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.members.contains(connection_id)
    }

    /// Members in sorted order
    pub fn snapshot(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }
}

/// Handle to the group actor for one (hub, group) pair.
pub struct GroupActor {
    name: String,
    key: String,
    router: Arc<Router>,
}

impl GroupActor {
    pub(crate) fn new(name: &str, router: Arc<Router>) -> Self {
        Self {
            name: name.to_string(),
            key: group_key(router.topics().hub(), name),
            router,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn add_connection(&self, connection_id: &str) -> Result<()> {
        ensure_not_empty("connection_id", connection_id)?;
        let id = connection_id.to_string();
        let added = invoke(
            self.router.substrate().groups.as_ref(),
            &self.key,
            move |group: &mut GroupMembership| group.add(&id),
        )
        .await?;
        debug!(group = %self.name, connection_id, added, "group add");
        Ok(())
    }

    pub async fn remove_connection(&self, connection_id: &str) -> Result<()> {
        ensure_not_empty("connection_id", connection_id)?;
        let id = connection_id.to_string();
        let removed = invoke(
            self.router.substrate().groups.as_ref(),
            &self.key,
            move |group: &mut GroupMembership| group.remove(&id),
        )
        .await?;
        debug!(group = %self.name, connection_id, removed, "group remove");
        Ok(())
    }

    pub async fn connections(&self) -> Result<Vec<String>> {
        Ok(invoke(
            self.router.substrate().groups.as_ref(),
            &self.key,
            |group: &mut GroupMembership| group.snapshot(),
        )
        .await?)
    }

    /// Deliver `message` to every member not listed in `excluded`.
    pub async fn send_message(&self, message: &HubMessage, excluded: &[String]) -> Result<()> {
        message.validate()?;
        let members: Vec<String> = self
            .connections()
            .await?
            .into_iter()
            .filter(|id| !excluded.contains(id))
            .collect();

        if members.is_empty() {
            debug!(group = %self.name, method = %message.method, "no recipients in group");
            return Ok(());
        }

        debug!(
            group = %self.name,
            method = %message.method,
            recipients = members.len(),
            "fanning out to group"
        );
        self.router.send_each(&members, message).await
    }
}
