//! Per-hub subscriptions to the broadcast topic and this server's inbox topic.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use keyed_actors::{MessageHandler, PubSub, Subscription};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BackplaneError, Result, ensure_not_empty};
use crate::message::{Envelope, TopicNames};

/// Callback for envelopes arriving on a hub topic.
pub type EnvelopeHandler = Arc<dyn Fn(Envelope) -> BoxFuture<'static, ()> + Send + Sync>;

/// Box an async closure into an [`EnvelopeHandler`].
pub fn envelope_handler<F, Fut>(f: F) -> EnvelopeHandler
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |envelope| Box::pin(f(envelope)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamPhase {
    Uninitialized = 0,
    Initializing = 1,
    /// Both topic handlers are wired
    Initialized = 2,
    Disposed = 3,
}

impl StreamPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Initialized,
            _ => Self::Disposed,
        }
    }
}

/// Lazily subscribes one server to one hub's topics, at most once.
pub struct StreamSubscriptionManager {
    pubsub: Arc<dyn PubSub>,
    provider: String,
    server_id: String,
    phase: AtomicU8,
    // Held across the whole initialization so concurrent callers wait for the first.
    subscriptions: Mutex<Vec<Subscription>>,
    topics: OnceLock<TopicNames>,
}

impl StreamSubscriptionManager {
    pub fn new(pubsub: Arc<dyn PubSub>, provider: &str, server_id: &str) -> Self {
        Self {
            pubsub,
            provider: provider.to_string(),
            server_id: server_id.to_string(),
            phase: AtomicU8::new(StreamPhase::Uninitialized as u8),
            subscriptions: Mutex::new(Vec::new()),
            topics: OnceLock::new(),
        }
    }

    pub fn phase(&self) -> StreamPhase {
        StreamPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_initialized(&self) -> bool {
        self.phase() == StreamPhase::Initialized
    }

    /// Topic names of the hub, once initialized
    pub fn topics(&self) -> Option<&TopicNames> {
        self.topics.get()
    }

    /// Subscribe to `hub`'s broadcast topic and this server's inbox topic.
    ///
    /// Repeated and concurrent calls subscribe once; later calls return as
    /// soon as the first has finished. A failed attempt leaves the manager
    /// uninitialized so the next call retries.
    pub async fn ensure_initialized(
        &self,
        hub: &str,
        on_all: EnvelopeHandler,
        on_server: EnvelopeHandler,
    ) -> Result<()> {
        ensure_not_empty("hub", hub)?;
        if self.is_initialized() {
            return Ok(());
        }

        let mut subscriptions = self.subscriptions.lock().await;
        match self.phase() {
            StreamPhase::Initialized => return Ok(()),
            StreamPhase::Disposed => {
                return Err(BackplaneError::Disposed {
                    component: "stream subscriptions",
                });
            }
            StreamPhase::Uninitialized | StreamPhase::Initializing => {}
        }
        self.set_phase(StreamPhase::Initializing);

        let topics = TopicNames::new(self.provider.clone(), hub);
        let all_topic = topics.all();
        let inbox_topic = topics.server(&self.server_id);

        let all = match self
            .pubsub
            .subscribe(&all_topic, decoding(all_topic.clone(), on_all))
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                self.set_phase(StreamPhase::Uninitialized);
                return Err(e.into());
            }
        };
        let inbox = match self
            .pubsub
            .subscribe(&inbox_topic, decoding(inbox_topic.clone(), on_server))
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                // dropping `all` cancels it
                self.set_phase(StreamPhase::Uninitialized);
                return Err(e.into());
            }
        };

        subscriptions.push(all);
        subscriptions.push(inbox);
        if self.topics.set(topics).is_err() {
            debug!(hub, "topic names already recorded");
        }
        self.set_phase(StreamPhase::Initialized);

        info!(
            hub,
            server_id = %self.server_id,
            all = %all_topic,
            inbox = %inbox_topic,
            "stream subscriptions initialized"
        );
        Ok(())
    }

    /// Publish on the hub broadcast topic. Fails with
    /// [`BackplaneError::NotInitialized`] before [`ensure_initialized`](Self::ensure_initialized).
    pub async fn publish_to_all(&self, envelope: &Envelope) -> Result<()> {
        let topics = match (self.phase(), self.topics.get()) {
            (StreamPhase::Initialized, Some(topics)) => topics,
            (StreamPhase::Disposed, _) => {
                return Err(BackplaneError::Disposed {
                    component: "stream subscriptions",
                });
            }
            (_, topics) => {
                return Err(BackplaneError::NotInitialized {
                    hub: topics
                        .map(|t| t.hub().to_string())
                        .unwrap_or_else(|| "<unset>".to_string()),
                });
            }
        };

        self.pubsub
            .publish(&topics.all(), envelope.encode()?)
            .await?;
        Ok(())
    }

    /// Release both subscriptions. Safe to call any number of times.
    pub async fn dispose(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        let previous = self.phase.swap(StreamPhase::Disposed as u8, Ordering::AcqRel);
        if previous == StreamPhase::Disposed as u8 {
            return;
        }
        for subscription in subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        debug!(server_id = %self.server_id, "stream subscriptions disposed");
    }

    fn set_phase(&self, phase: StreamPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }
}

fn decoding(topic: String, on_envelope: EnvelopeHandler) -> MessageHandler {
    Arc::new(move |payload: Vec<u8>| -> BoxFuture<'static, ()> {
        match Envelope::decode(&payload) {
            Ok(envelope) => on_envelope(envelope),
            Err(e) => {
                warn!(topic = %topic, error = %e, "dropping undecodable envelope");
                Box::pin(async {})
            }
        }
    })
}
