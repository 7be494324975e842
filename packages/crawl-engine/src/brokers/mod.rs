//! Queue and syncer backends.
//!
//! Each broker implements both [`Queue`] and [`CrawlSyncer`] over one
//! substrate, so the same value is handed out behind both traits.

pub mod memory;
pub mod postgres;
pub mod redis;

use std::sync::Arc;

use tracing::info;

use crate::config::{Backend, EngineConfig};
use crate::error::SyncResult;
use crate::traits::queue::Queue;
use crate::traits::syncer::CrawlSyncer;

pub use memory::MemoryBroker;
pub use postgres::PostgresBroker;
pub use redis::RedisBroker;

/// A connected broker seen through both of its traits.
#[derive(Clone)]
pub struct Broker {
    pub queue: Arc<dyn Queue>,
    pub syncer: Arc<dyn CrawlSyncer>,
}

impl Broker {
    pub fn new<B>(broker: B) -> Self
    where
        B: Queue + CrawlSyncer + 'static,
    {
        let broker = Arc::new(broker);
        Self {
            queue: broker.clone(),
            syncer: broker,
        }
    }
}

/// Connect the backend named in `config`.
pub async fn connect(config: &EngineConfig) -> SyncResult<Broker> {
    let broker = match &config.backend {
        Backend::Memory => Broker::new(MemoryBroker::new(config)),
        Backend::Redis { url } => Broker::new(RedisBroker::connect(url, config).await?),
        Backend::Postgres { url } => Broker::new(PostgresBroker::new(url, config).await?),
    };
    info!(backend = config.backend.name(), "broker connected");
    Ok(broker)
}
