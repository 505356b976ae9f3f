use config::{Config, PubSubBackend};
use log::info;
use pubsub::{LocalPubSub, PubSub, RedisPubSub};
use std::sync::Arc;

pub mod config;
pub mod logging;

/// Construct the pub/sub backend selected by configuration.
///
/// Callers receive the contract only; nothing downstream may branch on which
/// backend is active. A Redis connection failure here is fatal and surfaced
/// to the caller; it is not retried.
pub async fn init_pubsub(config: &Config) -> Result<Arc<dyn PubSub>, pubsub::Error> {
    match config.pubsub_backend {
        PubSubBackend::Local => {
            info!(
                "Pub/sub backend: local (in-process), queue_capacity={}",
                config.pubsub_queue_capacity
            );
            Ok(Arc::new(LocalPubSub::with_queue_capacity(
                config.pubsub_queue_capacity,
            )))
        }
        PubSubBackend::Redis => {
            info!(
                "Pub/sub backend: redis, queue_capacity={}",
                config.pubsub_queue_capacity
            );
            let backend = RedisPubSub::connect_with_queue_capacity(
                config.redis_url(),
                config.pubsub_queue_capacity,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub pubsub: Arc<dyn PubSub>,
    pub config: Config,
}

impl AppState {
    pub fn new(app_config: Config, pubsub: &Arc<dyn PubSub>) -> Self {
        Self {
            pubsub: Arc::clone(pubsub),
            config: app_config,
        }
    }

    pub fn pubsub_ref(&self) -> &dyn PubSub {
        self.pubsub.as_ref()
    }
}
