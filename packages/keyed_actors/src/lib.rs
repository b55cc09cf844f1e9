//! Keyed Actors - single-writer state per key, plus pub/sub topics
//!
//! This crate provides the two substrates a distributed backplane needs:
//!
//! - [`KeyedActorHost`]: address a piece of state by a string key and run
//!   operations against it with at most one operation in flight per key.
//! - [`PubSub`]: named topics with publish/subscribe.
//!
//! [`LocalActorHost`] retires an actor as soon as its state is back to
//! `S::default()` and its mailbox is empty, so keys that come and go (one per
//! connection, say) do not accumulate tasks.
//!
//! Both are traits so a cluster deployment can swap in a sharded actor pool
//! or a message broker. The in-process implementations ([`LocalActorHost`],
//! [`InMemoryPubSub`]) are enough for a single node and for tests.
//!
//! # Example
//!
//! ```no_run
//! use keyed_actors::{LocalActorHost, invoke};
//!
//! #[tokio::main]
//! async fn main() {
//!     let host: LocalActorHost<Vec<String>> = LocalActorHost::new("inbox");
//!
//!     invoke(&host, "alice", |items: &mut Vec<String>| items.push("hi".into()))
//!         .await
//!         .unwrap();
//!
//!     let len = invoke(&host, "alice", |items: &mut Vec<String>| items.len())
//!         .await
//!         .unwrap();
//!     assert_eq!(len, 1);
//! }
//! ```

mod actor;
mod error;
mod pubsub;

pub use actor::{ActorOp, KeyedActorHost, LocalActorHost, invoke};
pub use error::SubstrateError;
pub use pubsub::{InMemoryPubSub, MessageHandler, PubSub, Subscription, handler};
