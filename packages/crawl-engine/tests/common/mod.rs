// Common test utilities
#![allow(dead_code)]

pub mod harness;
pub mod scenarios;

pub use harness::*;

use std::sync::Arc;
use std::time::Duration;

use crawl_engine::testing::ExtractorScript;
use crawl_engine::{
    Broker, CrawlJob, CrawlJobStatus, CrawlWorker, EngineConfig, ExtractorFactory, JobId,
    MemoryBroker, OwnerId, Queue, Storage, UrlClass, WorkerConfig, WorkerHandle,
};
use tokio::time::Instant;

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short polls so workers notice work and shutdown quickly.
pub fn fast_config(retry_ceiling: u32, max_crawl_tasks: usize) -> EngineConfig {
    EngineConfig::default()
        .with_retry_ceiling(retry_ceiling)
        .with_max_crawl_tasks(max_crawl_tasks)
        .with_consumer_name("test-worker")
        .with_streams(|s| {
            s.max_poll = Duration::from_millis(50);
            s.poll_interval = Duration::from_millis(10);
        })
}

pub fn product_url(code: &str) -> String {
    format!("https://www.amazon.com/dp/{code}")
}

pub fn memory_broker(config: &EngineConfig) -> (Arc<MemoryBroker>, Broker) {
    let memory = Arc::new(MemoryBroker::new(config));
    let broker = Broker {
        queue: memory.clone(),
        syncer: memory.clone(),
    };
    (memory, broker)
}

/// Start a worker whose product extractor follows `script`.
pub fn spawn_scripted(
    broker: &Broker,
    storage: Arc<dyn Storage>,
    config: &EngineConfig,
    script: &ExtractorScript,
) -> WorkerHandle {
    let factory = ExtractorFactory::new(broker.syncer.clone(), storage, config.policy.clone())
        .with_extractor(UrlClass::AmazonProduct, script.builder());
    spawn_worker(broker, factory, config)
}

pub fn spawn_worker(broker: &Broker, factory: ExtractorFactory, config: &EngineConfig) -> WorkerHandle {
    CrawlWorker::new(
        broker.queue.clone(),
        broker.syncer.clone(),
        Arc::new(factory),
        WorkerConfig::from(config),
    )
    .start()
}

/// Poll until every URL in the job is terminal.
pub async fn wait_for_job(
    queue: &dyn Queue,
    owner_id: &OwnerId,
    job_id: &JobId,
    retry_ceiling: u32,
) -> CrawlJob {
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let job = queue
            .get_job(owner_id, job_id)
            .await
            .expect("get_job failed")
            .expect("job exists");
        if job.status(retry_ceiling) == CrawlJobStatus::Complete {
            return job;
        }
        assert!(
            Instant::now() < deadline,
            "job {job_id} did not settle: {:?}",
            job.urls
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
