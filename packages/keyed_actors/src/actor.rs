use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::SubstrateError;

/// An operation run against an actor's state while it holds its key exclusively.
pub type ActorOp<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Addresses actors of state type `S` by string key.
///
/// Implementations must run at most one operation per key at a time and apply
/// operations for the same key in the order they were dispatched. Operations on
/// different keys have no relative ordering.
#[async_trait]
pub trait KeyedActorHost<S>: Send + Sync + 'static {
    /// Queue `op` on the actor for `key`, activating the actor if needed.
    async fn dispatch(&self, key: &str, op: ActorOp<S>) -> Result<(), SubstrateError>;
}

/// Run `f` on the actor for `key` and return its result.
pub async fn invoke<S, R, F, H>(host: &H, key: &str, f: F) -> Result<R, SubstrateError>
where
    H: KeyedActorHost<S> + ?Sized,
    S: 'static,
    R: Send + 'static,
    F: FnOnce(&mut S) -> R + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    host.dispatch(
        key,
        Box::new(move |state: &mut S| {
            let _ = tx.send(f(state));
        }),
    )
    .await?;
    rx.await.map_err(|_| SubstrateError::NoReply {
        key: key.to_string(),
    })
}

/// In-process actor host: one mailbox task per key, each owning its `S`.
///
/// An actor retires once an operation leaves its state equal to `S::default()`
/// with nothing queued behind it; the next dispatch to that key starts afresh.
pub struct LocalActorHost<S> {
    kind: &'static str,
    mailboxes: Arc<DashMap<String, Mailbox<S>>>,
    next_id: AtomicU64,
    mailbox_capacity: usize,
}

struct Mailbox<S> {
    id: u64,
    tx: mpsc::Sender<ActorOp<S>>,
}

/// Outcome of one attempt to queue an operation
enum Queued<S> {
    Sent,
    /// The mailbox is full; wait on `tx` for capacity and retry
    Full(ActorOp<S>, mpsc::Sender<ActorOp<S>>),
}

impl<S: Default + PartialEq + Send + 'static> LocalActorHost<S> {
    /// Create a host; `kind` only labels log lines.
    pub fn new(kind: &'static str) -> Self {
        Self::with_capacity(kind, DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn with_capacity(kind: &'static str, mailbox_capacity: usize) -> Self {
        Self {
            kind,
            mailboxes: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    /// Number of live actors
    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    /// Stop the actor for `key`, discarding its state once queued operations drain.
    pub fn deactivate(&self, key: &str) -> bool {
        self.mailboxes.remove(key).is_some()
    }

    // Sends only ever happen under the map guard, so an actor retiring under
    // the shard write lock can never strand a queued operation.
    fn try_queue(&self, key: &str, op: ActorOp<S>) -> Result<Queued<S>, SubstrateError> {
        let op = match self.mailboxes.get(key) {
            Some(mailbox) => match mailbox.tx.try_send(op) {
                Ok(()) => return Ok(Queued::Sent),
                Err(TrySendError::Full(op)) => return Ok(Queued::Full(op, mailbox.tx.clone())),
                Err(TrySendError::Closed(op)) => op,
            },
            None => op,
        };

        let mut entry = self
            .mailboxes
            .entry(key.to_string())
            .or_insert_with(|| self.spawn(key));
        if entry.tx.is_closed() {
            debug!(kind = self.kind, key, "reactivating stopped actor");
            *entry = self.spawn(key);
        }
        match entry.tx.try_send(op) {
            Ok(()) => Ok(Queued::Sent),
            Err(TrySendError::Full(op)) => Ok(Queued::Full(op, entry.tx.clone())),
            Err(TrySendError::Closed(_)) => Err(SubstrateError::MailboxClosed {
                key: key.to_string(),
            }),
        }
    }

    fn spawn(&self, key: &str) -> Mailbox<S> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<ActorOp<S>>(self.mailbox_capacity);
        tokio::spawn(run_actor(
            self.kind,
            key.to_string(),
            id,
            rx,
            Arc::downgrade(&self.mailboxes),
        ));
        Mailbox { id, tx }
    }
}

async fn run_actor<S: Default + PartialEq + Send + 'static>(
    kind: &'static str,
    key: String,
    id: u64,
    mut rx: mpsc::Receiver<ActorOp<S>>,
    mailboxes: Weak<DashMap<String, Mailbox<S>>>,
) {
    debug!(kind, key = %key, "actor activated");
    let mut state = S::default();
    while let Some(op) = rx.recv().await {
        op(&mut state);
        if state != S::default() {
            continue;
        }
        // host dropped: its senders are gone and `recv` ends the loop
        let Some(mailboxes) = mailboxes.upgrade() else {
            continue;
        };
        let retired = mailboxes
            .remove_if(&key, |_, mailbox| mailbox.id == id && rx.is_empty())
            .is_some();
        if retired {
            debug!(kind, key = %key, "idle actor retired");
            return;
        }
    }
    debug!(kind, key = %key, "actor stopped");
}

#[async_trait]
impl<S: Default + PartialEq + Send + 'static> KeyedActorHost<S> for LocalActorHost<S> {
    async fn dispatch(&self, key: &str, op: ActorOp<S>) -> Result<(), SubstrateError> {
        let mut op = op;
        loop {
            match self.try_queue(key, op)? {
                Queued::Sent => return Ok(()),
                Queued::Full(pending, tx) => {
                    op = pending;
                    // Err means the actor stopped; the next pass reactivates it
                    let _ = tx.reserve().await;
                }
            }
        }
    }
}
