use std::sync::Weak;

/// Locally-unique identifier for one handler registration, allocated from a
/// monotonically increasing counter per backend instance.
pub type SubscriptionId = u64;

/// Backend-side removal of a registration. Implemented by each backend's
/// internal state so a [`Subscription`] can cancel itself without knowing
/// which backend issued it.
pub(crate) trait Unsubscriber: Send + Sync {
    fn remove_subscription(&self, id: SubscriptionId, topic: &str);
}

/// A cancellable handle representing one handler's registration on one topic.
///
/// The subscriber holds the only reference capable of cancelling the
/// registration; the backend keeps its own record purely for dispatch.
/// Dropping the handle does NOT cancel the registration; cancellation is
/// always explicit via [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    backend: Weak<dyn Unsubscriber>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, topic: String, backend: Weak<dyn Unsubscriber>) -> Self {
        Self { id, topic, backend }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Cancel this registration. No further messages are delivered to the
    /// handler once removal completes (deliveries already in flight may still
    /// arrive). Consumes the handle, and is a safe no-op when the owning
    /// backend has already been closed or dropped.
    pub fn unsubscribe(self) {
        if let Some(backend) = self.backend.upgrade() {
            backend.remove_subscription(self.id, &self.topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct Recording {
        removed: AtomicU64,
    }

    impl Unsubscriber for Recording {
        fn remove_subscription(&self, id: SubscriptionId, _topic: &str) {
            self.removed.store(id, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_unsubscribe_reaches_the_owning_backend() {
        let backend = Arc::new(Recording {
            removed: AtomicU64::new(0),
        });
        let weak = Arc::downgrade(&backend) as Weak<dyn Unsubscriber>;

        Subscription::new(17, "room:42".to_string(), weak).unsubscribe();
        assert_eq!(backend.removed.load(Ordering::SeqCst), 17);
    }

    #[test]
    fn test_unsubscribe_after_backend_drop_is_a_noop() {
        let backend = Arc::new(Recording {
            removed: AtomicU64::new(0),
        });
        let weak = Arc::downgrade(&backend) as Weak<dyn Unsubscriber>;
        drop(backend);

        // Must not panic once the backend is gone.
        Subscription::new(3, "presence".to_string(), weak).unsubscribe();
    }
}
