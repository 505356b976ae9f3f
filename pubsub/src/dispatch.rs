//! Per-subscription delivery queues.
//!
//! Every subscription owns a bounded mpsc queue drained by a single worker
//! task, so messages to one subscriber arrive in publish order while
//! subscribers remain concurrent with each other. Publishers never wait on
//! subscriber code: enqueueing is non-blocking, and when a subscriber's queue
//! is full the message is dropped for that subscriber with a warning.

use crate::message::{Message, MessageHandler};
use futures::FutureExt;
use log::*;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Queue capacity used when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Spawn the delivery worker for one subscription and return the sending half
/// of its queue. The worker stops when every sender has been dropped.
pub(crate) fn spawn_worker(
    topic: &str,
    handler: Arc<dyn MessageHandler>,
    capacity: usize,
) -> mpsc::Sender<Message> {
    let (tx, mut rx) = mpsc::channel::<Message>(capacity);
    let topic = topic.to_string();

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            // A panicking handler must not take down the worker: log it and
            // keep delivering subsequent messages.
            let invocation = AssertUnwindSafe(handler.handle(&message)).catch_unwind();
            if invocation.await.is_err() {
                error!("Handler for topic {topic} panicked while processing a message");
            }
        }
        debug!("Delivery worker for topic {topic} stopped");
    });

    tx
}

/// Non-blocking enqueue onto a subscription's delivery queue.
pub(crate) fn enqueue(topic: &str, queue: &mpsc::Sender<Message>, message: Message) {
    match queue.try_send(message) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Subscriber queue full on topic {topic}, dropping message");
        }
        // The worker is already gone (unsubscribed between snapshot and send).
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}
