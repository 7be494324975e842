//! Crawl worker: the polling and dispatch loops.
//!
//! ```text
//! CrawlWorker
//!     │
//!     ├─► URL loop
//!     │     ├─► wait for a free slot (max_crawl_tasks)
//!     │     ├─► Queue::consume
//!     │     ├─► decode, reconcile with the durable record
//!     │     └─► spawn Extractor::crawl on the task tracker
//!     │
//!     └─► Job loop
//!           ├─► Queue::consume_job_event
//!           └─► CrawlSyncer::activate_job
//! ```
//!
//! Stopping cancels both loops and waits for in-flight extractions. Running
//! extractions are never pre-empted; only the next poll is gated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::factory::ExtractorFactory;
use crate::traits::queue::Queue;
use crate::traits::syncer::CrawlSyncer;
use crate::types::envelope::Delivery;
use crate::types::status::CrawlUrlStatus;

/// Configuration for a crawl worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer name registered with the broker
    pub consumer_name: String,
    /// Extractions allowed in flight at once
    pub max_crawl_tasks: usize,
    /// Sleep after a broker error before polling again
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for WorkerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            consumer_name: config.consumer_name.clone(),
            max_crawl_tasks: config.max_crawl_tasks.max(1),
            error_backoff: config.url_stream.poll_interval,
        }
    }
}

impl WorkerConfig {
    pub fn with_max_crawl_tasks(mut self, max_crawl_tasks: usize) -> Self {
        self.max_crawl_tasks = max_crawl_tasks.max(1);
        self
    }
}

struct Inner {
    queue: Arc<dyn Queue>,
    syncer: Arc<dyn CrawlSyncer>,
    factory: Arc<ExtractorFactory>,
    config: WorkerConfig,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// Consumes URL deliveries and job-start events from one queue.
pub struct CrawlWorker {
    inner: Arc<Inner>,
}

impl CrawlWorker {
    pub fn new(
        queue: Arc<dyn Queue>,
        syncer: Arc<dyn CrawlSyncer>,
        factory: Arc<ExtractorFactory>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                syncer,
                factory,
                slots: Arc::new(Semaphore::new(config.max_crawl_tasks)),
                config,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Spawn the URL and job loops.
    pub fn start(self) -> WorkerHandle {
        info!(
            consumer = %self.inner.config.consumer_name,
            max_crawl_tasks = self.inner.config.max_crawl_tasks,
            "crawl worker starting"
        );

        let urls = tokio::spawn(self.inner.clone().run_urls());
        let jobs = tokio::spawn(self.inner.clone().run_jobs());

        WorkerHandle {
            inner: self.inner,
            loops: vec![urls, jobs],
        }
    }
}

/// Running worker. Dropping it leaves the loops running; call [`stop`](Self::stop).
pub struct WorkerHandle {
    inner: Arc<Inner>,
    loops: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Extractions currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Cancel polling and wait for in-flight extractions to finish.
    pub async fn stop(self) {
        self.inner.shutdown.cancel();
        for handle in self.loops {
            if let Err(e) = handle.await {
                error!(error = %e, "worker loop panicked");
            }
        }

        let running = self.inner.tracker.len();
        if running > 0 {
            info!(count = running, "waiting for running extractions to complete");
        }
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!(consumer = %self.inner.config.consumer_name, "crawl worker stopped");
    }
}

impl Inner {
    async fn run_urls(self: Arc<Self>) {
        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.queue.consume(&self.config.consumer_name) => result,
            };

            match delivery {
                Ok(Some(delivery)) => self.dispatch(delivery, permit).await,
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "failed to consume url delivery");
                    drop(permit);
                    if self.pause().await {
                        break;
                    }
                }
            }
        }
        debug!("url loop stopped");
    }

    async fn run_jobs(self: Arc<Self>) {
        loop {
            let delivery = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.queue.consume_job_event(&self.config.consumer_name) => result,
            };

            match delivery {
                Ok(Some(delivery)) => self.activate(delivery).await,
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "failed to consume job event");
                    if self.pause().await {
                        break;
                    }
                }
            }
        }
        debug!("job loop stopped");
    }

    /// Back off after an error. Returns true if shutdown arrived meanwhile.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.config.error_backoff) => false,
        }
    }

    /// Decode, reconcile and spawn one URL delivery.
    async fn dispatch(&self, delivery: Delivery, permit: OwnedSemaphorePermit) {
        let message_id = delivery.message_id;
        let ceiling = self.syncer.retry_ceiling();

        let decoded = match self.factory.decode(&delivery.payload) {
            Ok(url) => url,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "dropping undecodable delivery");
                if let Err(e) = self.syncer.ack(&message_id).await {
                    error!(message_id = %message_id, error = %e, "failed to ack undecodable delivery");
                }
                return;
            }
        };

        // The durable record is the source of truth; the payload may be stale.
        let url = match self.syncer.fetch(decoded.url_id()).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                warn!(url_id = %decoded.url_id(), "delivery for unknown url, archiving");
                if let Err(e) = self.syncer.archive(&message_id).await {
                    error!(message_id = %message_id, error = %e, "failed to archive delivery");
                }
                return;
            }
            Err(e) => {
                error!(url_id = %decoded.url_id(), error = %e, "failed to read url record");
                return;
            }
        };

        if url.status == CrawlUrlStatus::Complete || url.is_exhausted(ceiling) {
            debug!(url_id = %url.url_id(), status = %url.status, "url already settled");
            if let Err(e) = self.syncer.archive(&message_id).await {
                error!(message_id = %message_id, error = %e, "failed to archive delivery");
            }
            return;
        }

        if delivery.attempt > ceiling {
            warn!(url_id = %url.url_id(), attempt = delivery.attempt, "poison delivery, dead-lettering");
            let reason = format!("delivered {} times without resolution", delivery.attempt);
            if let Err(e) = self.syncer.dead_letter(&url, &message_id, &reason).await {
                error!(url_id = %url.url_id(), error = %e, "failed to dead-letter url");
            }
            return;
        }

        let class = url.class();
        let url_id = url.url_id().to_string();
        let Some(mut extractor) = self.factory.bind(url.clone(), message_id.clone()) else {
            warn!(url_id = %url_id, class = %class, "no extractor registered, dead-lettering");
            let reason = format!("no extractor registered for {class}");
            if let Err(e) = self.syncer.dead_letter(&url, &message_id, &reason).await {
                error!(url_id = %url_id, error = %e, "failed to dead-letter url");
            }
            return;
        };

        debug!(url_id = %url_id, attempt = delivery.attempt, "dispatching extraction");
        self.tracker.spawn(async move {
            let _permit = permit;
            extractor.crawl().await;
        });
    }

    async fn activate(&self, delivery: Delivery) {
        let message_id = delivery.message_id;

        let event = match delivery.payload.decode_job_event() {
            Ok(event) => event,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "dropping undecodable job event");
                if let Err(e) = self.queue.ack_job_event(&message_id).await {
                    error!(message_id = %message_id, error = %e, "failed to ack job event");
                }
                return;
            }
        };

        match self.syncer.activate_job(&event, &message_id).await {
            Ok(published) => {
                info!(job_id = %event.job_id, published, "job started");
            }
            Err(e) => {
                error!(job_id = %event.job_id, attempt = delivery.attempt, error = %e, "failed to start job");
                if delivery.attempt >= self.syncer.retry_ceiling() {
                    warn!(job_id = %event.job_id, "giving up on job event");
                    if let Err(e) = self.queue.ack_job_event(&message_id).await {
                        error!(message_id = %message_id, error = %e, "failed to ack job event");
                    }
                }
            }
        }
    }
}
