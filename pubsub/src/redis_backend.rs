//! Redis-backed fanout backend for horizontally scaled deployments.
//!
//! Topics map 1:1 onto Redis pub/sub channels, which makes a topic visible
//! across every instance sharing the broker: a message published on instance
//! A reaches subscribers registered on instance B. Each subscription gets a
//! dedicated broker connection and receive loop; publishing goes through one
//! shared multiplexed connection.

use crate::dispatch;
use crate::error::{
    closed_error, connection_error, publish_error, subscribe_error, Error, PublishErrorKind,
    SubscribeErrorKind,
};
use crate::message::{Message, MessageHandler};
use crate::subscription::{Subscription, SubscriptionId, Unsubscriber};
use crate::PubSub;
use async_trait::async_trait;
use futures::StreamExt;
use log::*;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};

struct RedisSubscriber {
    topic: String,
    cancel: oneshot::Sender<()>,
}

struct State {
    /// Shared publish connection; dropped on close.
    conn: Option<MultiplexedConnection>,
    subscriptions: HashMap<SubscriptionId, RedisSubscriber>,
    next_subscription_id: SubscriptionId,
    closed: bool,
}

struct Inner {
    client: redis::Client,
    state: Mutex<State>,
    queue_capacity: usize,
}

/// Distributed pub/sub backend routing through Redis channels.
pub struct RedisPubSub {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RedisPubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPubSub").finish_non_exhaustive()
    }
}

impl RedisPubSub {
    /// Connect to the broker and verify it is reachable with a `PING`.
    /// Connection failure here is fatal and surfaced to the caller; it is
    /// never retried internally.
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        Self::connect_with_queue_capacity(redis_url, dispatch::DEFAULT_QUEUE_CAPACITY).await
    }

    /// Like [`RedisPubSub::connect`] with an explicit per-subscription
    /// delivery queue capacity.
    pub async fn connect_with_queue_capacity(
        redis_url: &str,
        queue_capacity: usize,
    ) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url).map_err(connection_error)?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connection_error)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(connection_error)?;

        info!("Connected to Redis pub/sub broker");
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                state: Mutex::new(State {
                    conn: Some(conn),
                    subscriptions: HashMap::new(),
                    next_subscription_id: 0,
                    closed: false,
                }),
                queue_capacity,
            }),
        })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, topic: &str, message: Message) -> Result<(), Error> {
        let mut conn = {
            let state = self.inner.state.lock().expect("pub/sub state lock poisoned");
            match &state.conn {
                Some(conn) if !state.closed => conn.clone(),
                _ => return Err(closed_error()),
            }
        };

        let payload = serde_json::to_vec(&message)
            .map_err(|e| publish_error(PublishErrorKind::Serialization, e))?;

        // PUBLISH reports how many connections received the message across
        // the whole broker; zero listeners is not a failure.
        let receivers: i64 = conn
            .publish(topic, payload)
            .await
            .map_err(|e| publish_error(PublishErrorKind::Broker, e))?;
        if receivers == 0 {
            debug!("No subscribers anywhere for topic {topic}, message dropped by broker");
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, Error> {
        {
            let state = self.inner.state.lock().expect("pub/sub state lock poisoned");
            if state.closed {
                return Err(closed_error());
            }
        }

        // Dedicated broker connection per subscription. SUBSCRIBE does not
        // return until the broker confirms, so once this method returns the
        // caller cannot lose a message to a subscribe/publish race at the
        // broker.
        let mut broker_channel = self
            .inner
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| subscribe_error(SubscribeErrorKind::Broker, e))?;
        broker_channel
            .subscribe(topic)
            .await
            .map_err(|e| subscribe_error(SubscribeErrorKind::Broker, e))?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let id = {
            let mut state = self.inner.state.lock().expect("pub/sub state lock poisoned");
            if state.closed {
                // Lost the shutdown race; dropping the broker connection
                // releases the channel we just opened.
                return Err(closed_error());
            }
            let id = state.next_subscription_id;
            state.next_subscription_id += 1;
            state.subscriptions.insert(
                id,
                RedisSubscriber {
                    topic: topic.to_string(),
                    cancel: cancel_tx,
                },
            );
            id
        };

        let queue = dispatch::spawn_worker(topic, handler, self.inner.queue_capacity);
        spawn_receive_loop(topic.to_string(), broker_channel, cancel_rx, queue);

        debug!("Subscribed handler {id} to broker channel {topic}");
        Ok(Subscription::new(
            id,
            topic.to_string(),
            Arc::downgrade(&self.inner) as Weak<dyn Unsubscriber>,
        ))
    }

    async fn close(&self) -> Result<(), Error> {
        let cancelled = {
            let mut state = self.inner.state.lock().expect("pub/sub state lock poisoned");
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            // Drop the shared publish connection along with every record.
            state.conn = None;
            state
                .subscriptions
                .drain()
                .map(|(_, subscriber)| subscriber)
                .collect::<Vec<_>>()
        };

        let count = cancelled.len();
        for subscriber in cancelled {
            // The receive loop may have exited on its own already.
            let _ = subscriber.cancel.send(());
        }
        info!("Redis pub/sub backend closed, cancelled {count} subscription(s)");
        Ok(())
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        let state = self.inner.state.lock().expect("pub/sub state lock poisoned");
        state
            .subscriptions
            .values()
            .filter(|s| s.topic == topic)
            .count()
    }
}

impl Unsubscriber for Inner {
    fn remove_subscription(&self, id: SubscriptionId, _topic: &str) {
        let removed = {
            let mut state = self.state.lock().expect("pub/sub state lock poisoned");
            state.subscriptions.remove(&id)
        };
        if let Some(subscriber) = removed {
            // Safe to race the loop's own teardown.
            let _ = subscriber.cancel.send(());
            debug!(
                "Unsubscribed handler {id} from broker channel {}",
                subscriber.topic
            );
        }
    }
}

/// One receive loop per subscription: waits for either cancellation or the
/// next raw frame from the broker. Exiting the loop drops the broker
/// connection, which closes the channel subscription server-side.
fn spawn_receive_loop(
    topic: String,
    channel: redis::aio::PubSub,
    mut cancel: oneshot::Receiver<()>,
    queue: mpsc::Sender<Message>,
) {
    tokio::spawn(async move {
        let mut frames = channel.into_on_message();
        loop {
            tokio::select! {
                _ = &mut cancel => {
                    debug!("Receive loop for broker channel {topic} cancelled");
                    break;
                }
                frame = frames.next() => match frame {
                    Some(frame) => match decode_frame(frame.get_payload_bytes()) {
                        Ok(message) => dispatch::enqueue(&topic, &queue, message),
                        // A malformed frame must never terminate the loop or
                        // surface to subscribers.
                        Err(e) => warn!("Dropping malformed frame on broker channel {topic}: {e}"),
                    },
                    None => {
                        warn!("Broker stream for channel {topic} ended");
                        break;
                    }
                }
            }
        }
    });
}

/// Deserialize one raw broker frame into the wire envelope.
fn decode_frame(raw: &[u8]) -> Result<Message, serde_json::Error> {
    serde_json::from_slice(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::message::event_kind;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
    use tokio::time::timeout;

    #[test]
    fn test_decode_frame_accepts_a_well_formed_envelope() {
        let raw = br#"{"topic":"room:42","type":"message.new","payload":{"text":"hi"}}"#;
        let message = decode_frame(raw).unwrap();

        assert_eq!(message.topic, "room:42");
        assert_eq!(message.event_type, event_kind::MESSAGE_NEW);
        assert_eq!(message.payload["text"], "hi");
    }

    #[test]
    fn test_decode_frame_rejects_garbage_and_truncated_frames() {
        assert!(decode_frame(b"not json at all").is_err());
        assert!(decode_frame(br#"{"topic":"room:42","type":"mess"#).is_err());
        // Valid JSON that is not the envelope is rejected too.
        assert!(decode_frame(br#"{"unrelated":true}"#).is_err());
    }

    // The tests below need a live Redis; they are skipped unless run with
    // `cargo test -- --ignored` (set REDIS_URL to point somewhere else).

    fn test_redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string())
    }

    /// Unique per test process so concurrent runs do not see each other.
    fn test_topic(label: &str) -> String {
        format!("test:{}:{label}", std::process::id())
    }

    struct Recorder {
        tx: UnboundedSender<Message>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: &Message) {
            let _ = self.tx.send(message.clone());
        }
    }

    fn recorder() -> (Arc<Recorder>, UnboundedReceiver<Message>) {
        let (tx, rx) = unbounded_channel();
        (Arc::new(Recorder { tx }), rx)
    }

    async fn recv_one(rx: &mut UnboundedReceiver<Message>) -> Message {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("delivery channel closed")
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_message_published_on_one_instance_reaches_another() {
        let instance_a = RedisPubSub::connect(&test_redis_url()).await.unwrap();
        let instance_b = RedisPubSub::connect(&test_redis_url()).await.unwrap();
        let topic = test_topic("cross-instance");

        let (handler, mut rx) = recorder();
        instance_b.subscribe(&topic, handler).await.unwrap();

        instance_a
            .publish(
                &topic,
                Message::new(topic.as_str(), event_kind::MESSAGE_NEW, json!({"text": "hi"})),
            )
            .await
            .unwrap();

        let received = recv_one(&mut rx).await;
        assert_eq!(received.event_type, event_kind::MESSAGE_NEW);
        assert_eq!(received.payload["text"], "hi");

        instance_a.close().await.unwrap();
        instance_b.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_malformed_frames_are_dropped_and_the_loop_continues() {
        let backend = RedisPubSub::connect(&test_redis_url()).await.unwrap();
        let topic = test_topic("malformed");

        let (handler, mut rx) = recorder();
        backend.subscribe(&topic, handler).await.unwrap();

        // Push a garbage frame straight through the broker, bypassing the
        // envelope serializer, then a well-formed one.
        let client = redis::Client::open(test_redis_url().as_str()).unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: i64 = conn.publish(&topic, "not json").await.unwrap();

        backend
            .publish(
                &topic,
                Message::new(topic.as_str(), event_kind::TYPING, json!({"user_id": 7})),
            )
            .await
            .unwrap();

        // Only the well-formed frame is delivered.
        let received = recv_one(&mut rx).await;
        assert_eq!(received.event_type, event_kind::TYPING);

        backend.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_unsubscribe_stops_delivery() {
        let backend = RedisPubSub::connect(&test_redis_url()).await.unwrap();
        let topic = test_topic("unsubscribe");

        let (handler, mut rx) = recorder();
        let subscription = backend.subscribe(&topic, handler).await.unwrap();
        assert_eq!(backend.subscriber_count(&topic), 1);

        backend
            .publish(
                &topic,
                Message::new(topic.as_str(), event_kind::MESSAGE_NEW, json!({"n": 1})),
            )
            .await
            .unwrap();
        recv_one(&mut rx).await;

        subscription.unsubscribe();
        assert_eq!(backend.subscriber_count(&topic), 0);

        // Give the receive loop a moment to tear down, then publish again.
        tokio::time::sleep(Duration::from_millis(100)).await;
        backend
            .publish(
                &topic,
                Message::new(topic.as_str(), event_kind::MESSAGE_NEW, json!({"n": 2})),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err(), "delivery after unsubscribe");

        backend.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_operations_after_close_fail_with_the_closed_error() {
        let backend = RedisPubSub::connect(&test_redis_url()).await.unwrap();
        let topic = test_topic("closed");

        let (handler, _rx) = recorder();
        let subscription = backend.subscribe(&topic, handler).await.unwrap();

        backend.close().await.unwrap();
        backend.close().await.unwrap(); // idempotent

        let publish_err = backend
            .publish(
                &topic,
                Message::new(topic.as_str(), event_kind::MESSAGE_NEW, json!(null)),
            )
            .await
            .unwrap_err();
        assert_eq!(publish_err.error_kind, ErrorKind::Closed);

        let (late_handler, _late_rx) = recorder();
        let subscribe_err = backend.subscribe(&topic, late_handler).await.unwrap_err();
        assert_eq!(subscribe_err.error_kind, ErrorKind::Closed);

        // Already-issued handles stay safe no-ops.
        subscription.unsubscribe();
    }

    #[tokio::test]
    async fn test_connect_fails_fast_when_the_broker_is_unreachable() {
        // Port 1 is never a Redis; construction must fail, not retry.
        let err = RedisPubSub::connect("redis://127.0.0.1:1/").await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Connection);
    }
}
