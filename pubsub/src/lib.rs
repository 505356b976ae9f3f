//! Topic-based publish/subscribe fanout for real-time events.
//!
//! This crate provides the event fanout layer that delivers domain events
//! (new message, typing, receipt update, presence change, call signaling) to
//! every handler subscribed to a topic, with two interchangeable backends
//! behind one contract.
//!
//! # Architecture
//!
//! - **One contract, two backends**: producers and the connection gateway
//!   hold an `Arc<dyn PubSub>` and never branch on the concrete backend.
//!   [`LocalPubSub`] fans out in-process for single-instance deployments;
//!   [`RedisPubSub`] routes through Redis channels so topics are visible
//!   across horizontally scaled instances.
//! - **Topics are opaque strings**: the convention is `<entity>:<id>`
//!   (`room:42`, `user:7`, `call:9`) plus the fixed `presence` channel; the
//!   [`topic`] module formats canonical names, the dispatch core never
//!   parses them.
//! - **Ordered, bounded delivery per subscription**: every subscription owns
//!   a bounded queue drained by one worker, so one subscriber sees messages
//!   in publish order, subscribers stay concurrent with each other, and a
//!   stalled subscriber drops its own overflow instead of backpressuring
//!   publishers.
//! - **Ephemeral messages**: no durability or replay; a subscriber that is
//!   not registered at publish time simply misses the event.
//!
//! # Message Flow
//!
//! 1. A producer (REST/WebSocket handler) publishes a [`Message`] onto a
//!    topic via [`PubSub::publish`].
//! 2. The backend snapshots the topic's subscribers and enqueues the message
//!    on each subscription's delivery queue (for the Redis backend this hop
//!    crosses the broker first).
//! 3. Each subscription's worker invokes its [`MessageHandler`], one per
//!    live client connection, registered by the gateway via
//!    [`PubSub::subscribe`].
//! 4. The gateway forwards the event to its socket, dispatching on the
//!    envelope's `type` field.
//!
//! # Example: publishing a room event
//!
//! ```rust,ignore
//! use pubsub::{event_kind, topic, Message, PubSub};
//! use serde_json::json;
//!
//! // In a handler, after persisting a chat message
//! app_state
//!     .pubsub
//!     .publish(
//!         &topic::room(conversation_id),
//!         Message::new(
//!             topic::room(conversation_id),
//!             event_kind::MESSAGE_NEW,
//!             json!({ "text": "hi" }),
//!         ),
//!     )
//!     .await?;
//! ```
//!
//! # Modules
//!
//! - `message`: wire envelope, handler trait, well-known event kinds
//! - `topic`: canonical topic-name helpers
//! - `subscription`: cancellable registration handle
//! - `local`: in-process backend
//! - `redis_backend`: Redis-channel backend
//! - `error`: error kinds shared by both backends

pub mod error;
pub mod local;
pub mod message;
pub mod redis_backend;
pub mod subscription;
pub mod topic;

mod dispatch;

use async_trait::async_trait;
use std::sync::Arc;

pub use dispatch::DEFAULT_QUEUE_CAPACITY;
pub use error::Error;
pub use local::LocalPubSub;
pub use message::{event_kind, Message, MessageHandler};
pub use redis_backend::RedisPubSub;
pub use subscription::{Subscription, SubscriptionId};

/// The backend contract implemented by [`LocalPubSub`] and [`RedisPubSub`].
///
/// Backends are safe for unrestricted concurrent use of every operation.
/// Caller-side cancellation follows normal future semantics: drop the future
/// or wrap the call in a timeout. Cancellation never propagates into handler
/// invocations, which are dispatched independently of the publishing call.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Broadcast `message` to every handler currently subscribed to `topic`.
    ///
    /// A topic with zero subscribers is silent success; absence of listeners
    /// is not a failure. Fails with the `Closed` kind after [`PubSub::close`].
    async fn publish(&self, topic: &str, message: Message) -> Result<(), Error>;

    /// Register `handler` against `topic` and return the handle that cancels
    /// the registration.
    ///
    /// Fails with the `Closed` kind after shutdown, or with a broker error
    /// when the underlying channel cannot be established.
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, Error>;

    /// Shut the backend down, releasing every backend-held resource. After
    /// `close` all `publish`/`subscribe` calls fail with the `Closed` kind;
    /// already-issued [`Subscription::unsubscribe`] calls remain safe no-ops.
    /// Idempotent.
    async fn close(&self) -> Result<(), Error>;

    /// Number of handlers this instance currently has registered on `topic`
    /// (0 after close). For the distributed backend this counts local
    /// registrations only, not subscribers on other instances.
    fn subscriber_count(&self, topic: &str) -> usize;
}
