//! Crawl job orchestration.
//!
//! Callers submit a batch of product URLs as a job. Each valid URL gets a
//! stable identity and a durable record and is published for crawling.
//! Workers consume deliveries, hand each one to the extractor registered
//! for its URL class, and record the result. Failed attempts are replayed
//! until the retry ceiling, then dead-lettered.
//!
//! # Modules
//!
//! - [`types`]: URL identity, statuses, jobs and delivery envelopes
//! - [`traits`]: the queue, syncer, storage and extractor seams
//! - [`brokers`]: in-memory, Redis streams and PostgreSQL backends
//! - [`storage`]: file and PostgreSQL stores for extracted data
//! - [`context`]: the per-delivery façade extractors drive
//! - [`factory`]: extractor registration by URL class
//! - [`worker`]: the consume and dispatch loops
//! - [`config`]: environment-driven configuration
//! - [`testing`]: in-memory storage and scripted extractors
//!
//! # Example
//!
//! ```ignore
//! let config = EngineConfig::from_env()?;
//! let broker = brokers::connect(&config).await?;
//! let storage = Arc::new(FileStorage::new("./data"));
//! let factory = ExtractorFactory::new(broker.syncer.clone(), storage, config.policy.clone())
//!     .with_extractor(UrlClass::AmazonProduct, |ctx| Box::new(ProductExtractor::new(ctx)));
//!
//! let worker = CrawlWorker::new(
//!     broker.queue.clone(),
//!     broker.syncer.clone(),
//!     Arc::new(factory),
//!     WorkerConfig::from(&config),
//! )
//! .start();
//!
//! let submitted = broker.queue.submit_job(&OwnerId::new("u1"), &urls).await?;
//!
//! // Later, once the job has settled: crawl its failed URLs again.
//! broker.queue.start_job(&OwnerId::new("u1"), &submitted.job.job_id).await?;
//! ```

pub mod brokers;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod storage;
pub mod testing;
pub mod traits;
pub mod types;
pub mod worker;

pub use brokers::{connect, Broker, MemoryBroker, PostgresBroker, RedisBroker};
pub use config::{Backend, EngineConfig, StreamConfig};
pub use context::{CrawlContext, DefaultCrawlContext};
pub use error::{
    ContextError, DecodeError, ExtractionError, InvalidUrlError, QueueError, StorageError,
    SyncPersistenceError, TransitionError,
};
pub use factory::ExtractorFactory;
pub use storage::{FileStorage, PostgresStorage};
pub use traits::{
    extractor::Extractor,
    queue::Queue,
    storage::{CrawledRecord, Storage},
    syncer::{CrawlSyncer, ErrorReport, SyncOutcome},
};
pub use types::envelope::{Delivery, DeliveryPayload, JobEvent, MessageId};
pub use types::job::{CrawlJob, JobId, OwnerId, SubmittedJob};
pub use types::status::{CrawlJobStatus, CrawlUrlStatus};
pub use types::url::{derive_url_id, CrawlUrl, UrlClass, UrlPolicy};
pub use worker::{CrawlWorker, WorkerConfig, WorkerHandle};
