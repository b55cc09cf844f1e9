use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SubstrateError;

/// Callback invoked once per message delivered to a subscription.
///
/// Messages for one subscription are handled sequentially in arrival order.
pub type MessageHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// Named topics with at-least-once delivery to current subscribers.
#[async_trait]
pub trait PubSub: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SubstrateError>;

    /// Subscribe `handler` to `topic`. Delivery stops when the returned
    /// [`Subscription`] is unsubscribed or dropped.
    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, SubstrateError>;
}

/// A live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            topic: topic.into(),
            cancel,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop delivery. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.cancel.is_cancelled() {
            debug!(topic = %self.topic, "unsubscribing");
            self.cancel.cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// In-memory pub/sub: one broadcast channel per topic.
///
/// A topic's channel is dropped once its last subscription ends.
pub struct InMemoryPubSub {
    topics: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// `capacity` bounds how far a slow subscriber may lag before messages are skipped.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live receivers on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of topics with a live channel
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SubstrateError> {
        let sender = self.topics.get(topic).map(|tx| tx.clone());
        match sender {
            Some(tx) => {
                // Err only means nobody is listening right now
                let delivered = tx.send(payload).unwrap_or(0);
                debug!(topic, delivered, "published");
            }
            None => debug!(topic, "published to topic with no subscribers"),
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, SubstrateError> {
        let mut rx = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let topic_name = topic.to_string();
        let topics = self.topics.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(payload) => handler(payload).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic_name, skipped, "subscriber lagged, messages skipped");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            drop(rx);
            // subscribe holds the entry lock while adding a receiver, so a
            // concurrent subscriber is either counted here or recreates the topic
            if topics
                .remove_if(&topic_name, |_, tx| tx.receiver_count() == 0)
                .is_some()
            {
                debug!(topic = %topic_name, "last subscriber gone, topic dropped");
            }
            debug!(topic = %topic_name, "subscription task finished");
        });

        Ok(Subscription::new(topic, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn channel_handler() -> (MessageHandler, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let h = handler(move |payload| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(payload);
            }
        });
        (h, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Option<Vec<u8>> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let bus = InMemoryPubSub::new();
        let (h1, mut rx1) = channel_handler();
        let (h2, mut rx2) = channel_handler();
        let _s1 = bus.subscribe("t", h1).await.unwrap();
        let _s2 = bus.subscribe("t", h2).await.unwrap();

        bus.publish("t", b"hello".to_vec()).await.unwrap();

        assert_eq!(recv(&mut rx1).await.as_deref(), Some(&b"hello"[..]));
        assert_eq!(recv(&mut rx2).await.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InMemoryPubSub::new();
        let (h, mut rx) = channel_handler();
        let _s = bus.subscribe("a", h).await.unwrap();

        bus.publish("b", b"nope".to_vec()).await.unwrap();
        bus.publish("a", b"yes".to_vec()).await.unwrap();

        assert_eq!(recv(&mut rx).await.as_deref(), Some(&b"yes"[..]));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = InMemoryPubSub::new();
        bus.publish("empty", b"x".to_vec()).await.unwrap();
        assert_eq!(bus.subscriber_count("empty"), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = InMemoryPubSub::new();
        let (h, mut rx) = channel_handler();
        let sub = bus.subscribe("t", h).await.unwrap();
        assert!(sub.is_active());

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());

        bus.publish("t", b"late".to_vec()).await.unwrap();
        assert!(recv(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn dropping_subscription_releases_receiver() {
        let bus = InMemoryPubSub::new();
        let (h, _rx) = channel_handler();
        let sub = bus.subscribe("t", h).await.unwrap();
        assert_eq!(bus.subscriber_count("t"), 1);

        drop(sub);
        for _ in 0..20 {
            if bus.topic_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(bus.subscriber_count("t"), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn topic_survives_while_any_subscriber_remains() {
        let bus = InMemoryPubSub::new();
        let (h1, _rx1) = channel_handler();
        let (h2, mut rx2) = channel_handler();
        let first = bus.subscribe("t", h1).await.unwrap();
        let _second = bus.subscribe("t", h2).await.unwrap();

        drop(first);
        for _ in 0..20 {
            if bus.subscriber_count("t") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(bus.topic_count(), 1);

        bus.publish("t", b"still here".to_vec()).await.unwrap();
        assert_eq!(recv(&mut rx2).await.as_deref(), Some(&b"still here"[..]));
    }

    #[tokio::test]
    async fn churned_topics_are_pruned() {
        let bus = InMemoryPubSub::new();
        for i in 0..50 {
            let (h, _rx) = channel_handler();
            let sub = bus.subscribe(&format!("server:{i}"), h).await.unwrap();
            sub.unsubscribe();
        }
        for _ in 0..100 {
            if bus.topic_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(bus.topic_count(), 0);

        let (h, mut rx) = channel_handler();
        let _sub = bus.subscribe("server:0", h).await.unwrap();
        bus.publish("server:0", b"back".to_vec()).await.unwrap();
        assert_eq!(recv(&mut rx).await.as_deref(), Some(&b"back"[..]));
    }

    #[tokio::test]
    async fn messages_arrive_in_publish_order() {
        let bus = InMemoryPubSub::new();
        let (h, mut rx) = channel_handler();
        let _s = bus.subscribe("t", h).await.unwrap();

        for i in 0..10u8 {
            bus.publish("t", vec![i]).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(recv(&mut rx).await, Some(vec![i]));
        }
    }
}
