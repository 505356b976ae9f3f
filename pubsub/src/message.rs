use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known event kinds shared by producers and the connection gateway.
///
/// The dispatch core never interprets these; they are the agreed-upon values
/// of the envelope's `type` field, which consumers use as the dispatch key
/// for decoding `payload`.
pub mod event_kind {
    /// A new chat message was posted to a conversation.
    pub const MESSAGE_NEW: &str = "message.new";
    /// A participant started or stopped typing.
    pub const TYPING: &str = "typing";
    /// A read/delivery receipt changed.
    pub const RECEIPT_UPDATE: &str = "receipt.update";
    /// A user's presence changed.
    pub const PRESENCE_CHANGE: &str = "presence.change";
    /// Call signaling (offer/answer/candidate) for a room.
    pub const CALL_SIGNAL: &str = "call.signal";
}

/// The wire envelope broadcast over a topic.
///
/// Payloads are carried as raw JSON values; the core never looks inside them.
/// Consumers interpret `payload` according to `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The topic this message was published to.
    pub topic: String,
    /// Application-defined event kind, e.g. [`event_kind::MESSAGE_NEW`].
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque event data, typically a serialized domain entity.
    pub payload: Value,
}

impl Message {
    pub fn new(
        topic: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Trait for receiving messages delivered over a subscribed topic.
///
/// One handler is registered per subscription (the connection gateway
/// registers one per live client connection) and is invoked once per
/// delivered message. Implementations must not assume anything about which
/// task invokes them; long-running work should be moved off the delivery
/// path so other messages for the same subscription are not delayed.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message);
}
