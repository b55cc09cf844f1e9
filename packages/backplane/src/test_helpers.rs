//! Fakes shared by the unit tests in this crate.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keyed_actors::{
    ActorOp, InMemoryPubSub, KeyedActorHost, LocalActorHost, MessageHandler, PubSub,
    SubstrateError, Subscription,
};

use crate::error::TransportError;
use crate::message::HubMessage;
use crate::registry::HubConnection;
use crate::substrate::ClusterSubstrate;

/// Connection that records every message written to it.
pub struct RecordingConnection {
    id: String,
    user: Option<String>,
    received: Mutex<Vec<HubMessage>>,
}

impl RecordingConnection {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            user: None,
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn with_user(id: &str, user: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            user: Some(user.to_string()),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn received(&self) -> Vec<HubMessage> {
        self.received.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.received().into_iter().map(|m| m.method).collect()
    }

    /// Poll until `count` messages have arrived or a second passes.
    pub async fn wait_for(&self, count: usize) -> Vec<HubMessage> {
        for _ in 0..100 {
            if self.received.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.received()
    }
}

#[async_trait]
impl HubConnection for RecordingConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> Option<&str> {
        self.user.as_deref()
    }

    async fn send(&self, message: &HubMessage) -> Result<(), TransportError> {
        self.received.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Actor host wrapper that counts dispatched operations.
pub struct CountingHost<S> {
    inner: LocalActorHost<S>,
    dispatches: AtomicUsize,
}

impl<S: Default + PartialEq + Send + 'static> CountingHost<S> {
    pub fn new(kind: &'static str) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalActorHost::new(kind),
            dispatches: AtomicUsize::new(0),
        })
    }

    pub fn dispatches(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    /// Actors currently alive in the wrapped host
    pub fn live(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl<S: Default + PartialEq + Send + 'static> KeyedActorHost<S> for CountingHost<S> {
    async fn dispatch(&self, key: &str, op: ActorOp<S>) -> Result<(), SubstrateError> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.inner.dispatch(key, op).await
    }
}

/// Pub/sub wrapper that counts publishes and can be told to fail publishes
/// or subscribes.
#[derive(Default)]
pub struct CountingPubSub {
    inner: InMemoryPubSub,
    publishes: AtomicUsize,
    published_topics: Mutex<Vec<String>>,
    fail_publish: std::sync::atomic::AtomicBool,
    fail_subscribe_to: Mutex<Option<String>>,
}

impl CountingPubSub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.published_topics.lock().unwrap().clone()
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make subscribes to `topic` fail; `None` lets every subscribe through.
    pub fn fail_subscribes_to(&self, topic: Option<&str>) {
        *self.fail_subscribe_to.lock().unwrap() = topic.map(str::to_string);
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.subscriber_count(topic)
    }
}

#[async_trait]
impl PubSub for CountingPubSub {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SubstrateError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.published_topics.lock().unwrap().push(topic.to_string());
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SubstrateError::Publish {
                topic: topic.to_string(),
                reason: "injected failure".into(),
            });
        }
        self.inner.publish(topic, payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, SubstrateError> {
        let fail = self.fail_subscribe_to.lock().unwrap().as_deref() == Some(topic);
        if fail {
            return Err(SubstrateError::Subscribe {
                topic: topic.to_string(),
                reason: "injected failure".into(),
            });
        }
        self.inner.subscribe(topic, handler).await
    }
}

/// Substrate whose client host and pub/sub count their calls.
pub struct Instrumented {
    pub substrate: ClusterSubstrate,
    pub clients: Arc<CountingHost<crate::client::ClientBinding>>,
    pub groups: Arc<LocalActorHost<crate::group::GroupMembership>>,
    pub pubsub: Arc<CountingPubSub>,
}

pub fn instrumented_substrate() -> Instrumented {
    let clients = CountingHost::new("client");
    let groups = Arc::new(LocalActorHost::<crate::group::GroupMembership>::new("group"));
    let pubsub = CountingPubSub::new();
    let substrate = ClusterSubstrate {
        clients: clients.clone(),
        groups: groups.clone(),
        directory: Arc::new(LocalActorHost::<crate::directory::ServerRegistry>::new("directory")),
        pubsub: pubsub.clone(),
    };
    Instrumented {
        substrate,
        clients,
        groups,
        pubsub,
    }
}
