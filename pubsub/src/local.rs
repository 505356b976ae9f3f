//! In-process fanout backend for single-instance deployments.

use crate::dispatch;
use crate::error::{closed_error, Error};
use crate::message::{Message, MessageHandler};
use crate::subscription::{Subscription, SubscriptionId, Unsubscriber};
use crate::PubSub;
use async_trait::async_trait;
use log::*;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::mpsc;

struct LocalSubscriber {
    queue: mpsc::Sender<Message>,
}

/// Topic → active subscriptions, plus the id counter and the closed flag.
/// All mutation is linearized by the registry lock; once closed the registry
/// is empty and stays that way.
struct Registry {
    topics: HashMap<String, HashMap<SubscriptionId, LocalSubscriber>>,
    next_subscription_id: SubscriptionId,
    closed: bool,
}

struct Inner {
    registry: RwLock<Registry>,
    queue_capacity: usize,
}

/// In-process pub/sub backend.
///
/// Keeps the subscriber registry in a single reader/writer lock. A publish
/// snapshots the topic's delivery queues under the read lock and releases it
/// before enqueueing, so subscriber-supplied code never runs while the
/// registry is locked and a slow subscriber cannot stall publishers.
pub struct LocalPubSub {
    inner: Arc<Inner>,
}

impl LocalPubSub {
    pub fn new() -> Self {
        Self::with_queue_capacity(dispatch::DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a backend whose per-subscription delivery queues hold up to
    /// `queue_capacity` undelivered messages before overflow drops kick in.
    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry {
                    topics: HashMap::new(),
                    next_subscription_id: 0,
                    closed: false,
                }),
                queue_capacity,
            }),
        }
    }
}

impl Default for LocalPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for LocalPubSub {
    async fn publish(&self, topic: &str, message: Message) -> Result<(), Error> {
        let queues: Vec<mpsc::Sender<Message>> = {
            let registry = self
                .inner
                .registry
                .read()
                .expect("pub/sub registry lock poisoned");
            if registry.closed {
                return Err(closed_error());
            }

            match registry.topics.get(topic) {
                Some(subscribers) => subscribers.values().map(|s| s.queue.clone()).collect(),
                None => {
                    debug!("No subscribers for topic {topic}, dropping message");
                    return Ok(());
                }
            }
        };

        // Registry lock released: enqueueing only touches subscriber queues.
        for queue in &queues {
            dispatch::enqueue(topic, queue, message.clone());
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, Error> {
        let id = {
            let mut registry = self
                .inner
                .registry
                .write()
                .expect("pub/sub registry lock poisoned");
            if registry.closed {
                return Err(closed_error());
            }

            let id = registry.next_subscription_id;
            registry.next_subscription_id += 1;

            let queue = dispatch::spawn_worker(topic, handler, self.inner.queue_capacity);
            registry
                .topics
                .entry(topic.to_string())
                .or_default()
                .insert(id, LocalSubscriber { queue });
            id
        };

        debug!("Subscribed handler {id} to topic {topic}");
        Ok(Subscription::new(
            id,
            topic.to_string(),
            Arc::downgrade(&self.inner) as Weak<dyn Unsubscriber>,
        ))
    }

    async fn close(&self) -> Result<(), Error> {
        let mut registry = self
            .inner
            .registry
            .write()
            .expect("pub/sub registry lock poisoned");
        if registry.closed {
            return Ok(());
        }

        registry.closed = true;
        let dropped: usize = registry.topics.values().map(HashMap::len).sum();
        // Dropping the queue senders stops every delivery worker.
        registry.topics.clear();
        info!("Local pub/sub backend closed, removed {dropped} active subscription(s)");
        Ok(())
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        let registry = self
            .inner
            .registry
            .read()
            .expect("pub/sub registry lock poisoned");
        registry.topics.get(topic).map_or(0, HashMap::len)
    }
}

impl Unsubscriber for Inner {
    fn remove_subscription(&self, id: SubscriptionId, topic: &str) {
        let mut registry = self
            .registry
            .write()
            .expect("pub/sub registry lock poisoned");
        if let Some(subscribers) = registry.topics.get_mut(topic) {
            if subscribers.remove(&id).is_some() {
                debug!("Unsubscribed handler {id} from topic {topic}");
            }
            // Keep the registry bounded by active topics, not historical ones.
            if subscribers.is_empty() {
                registry.topics.remove(topic);
            }
        }
    }
}
