//! Message payloads, topic envelopes and naming of topics and actor keys.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ensure_not_empty};

/// An invocation delivered to a connection: a method name and its ordered arguments.
///
/// The backplane never inspects either; they pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    pub method: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl HubMessage {
    pub fn new(method: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure_not_empty("method", &self.method)
    }
}

/// What travels over the pub/sub topics between processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    /// For every local connection except `excluded` (broadcast topic)
    Broadcast {
        message: HubMessage,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        excluded: Vec<String>,
    },
    /// For a single connection held by the addressed server (inbox topic)
    Direct {
        connection_id: String,
        message: HubMessage,
    },
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Topic names for one hub under one broadcast provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNames {
    provider: String,
    hub: String,
}

impl TopicNames {
    pub fn new(provider: impl Into<String>, hub: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            hub: hub.into(),
        }
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// Hub-wide broadcast topic, processed by every subscribed server
    pub fn all(&self) -> String {
        format!("{}:{}:all", self.provider, self.hub)
    }

    /// Inbox topic of one server, processed only by that server
    pub fn server(&self, server_id: &str) -> String {
        format!("{}:{}:server:{}", self.provider, self.hub, server_id)
    }
}

/// Group key reserved for the connections of one user.
pub fn user_group(user_id: &str) -> String {
    format!("user:{user_id}")
}

// Hub names are length-prefixed so ("a:b", "c") and ("a", "b:c") never share a key.
pub(crate) fn client_key(hub: &str, connection_id: &str) -> String {
    format!("{}:{}:{}", hub.len(), hub, connection_id)
}

pub(crate) fn group_key(hub: &str, group: &str) -> String {
    format!("{}:{}:{}", hub.len(), hub, group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_shape() {
        let env = Envelope::Direct {
            connection_id: "c1".into(),
            message: HubMessage::new("notify", vec![json!(1), json!("two")]),
        };
        let value: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(value["kind"], "direct");
        assert_eq!(value["connection_id"], "c1");
        assert_eq!(value["message"]["method"], "notify");
        assert_eq!(value["message"]["args"][1], "two");
    }

    #[test]
    fn broadcast_omits_empty_exclusions() {
        let env = Envelope::Broadcast {
            message: HubMessage::new("tick", vec![]),
            excluded: vec![],
        };
        let value: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert!(value.get("excluded").is_none());
        assert_eq!(Envelope::decode(&env.encode().unwrap()).unwrap(), env);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Envelope::decode(b"not json").is_err());
        assert!(Envelope::decode(br#"{"kind":"unknown"}"#).is_err());
    }

    #[test]
    fn message_args_default_to_empty() {
        let msg: HubMessage = serde_json::from_str(r#"{"method":"ping"}"#).unwrap();
        assert!(msg.args.is_empty());
        assert!(HubMessage::new("", vec![]).validate().is_err());
    }

    #[test]
    fn topic_names() {
        let topics = TopicNames::new("default", "chat");
        assert_eq!(topics.all(), "default:chat:all");
        assert_eq!(topics.server("srv-1"), "default:chat:server:srv-1");
        assert_ne!(topics.all(), TopicNames::new("redis", "chat").all());
    }

    #[test]
    fn actor_keys_are_unambiguous() {
        assert_ne!(client_key("a:b", "c"), client_key("a", "b:c"));
        assert_eq!(group_key("chat", "room"), "4:chat:room");
        assert_eq!(user_group("alice"), "user:alice");
    }
}
