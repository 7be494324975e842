//! Job-facing queue contract.

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::types::envelope::{Delivery, MessageId};
use crate::types::job::{CrawlJob, JobId, OwnerId, SubmittedJob};
use crate::types::status::CrawlUrlStatus;
use crate::types::url::CrawlUrl;

/// Broker-agnostic submission and consumption of crawl work.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Create a job from raw URLs.
    ///
    /// Invalid URLs come back in `rejected` and are never persisted.
    /// Duplicates collapse by `url_id`. Every accepted URL is stored as
    /// `pending` and gets exactly one delivery.
    async fn submit_job(&self, owner_id: &OwnerId, urls: &[String]) -> QueueResult<SubmittedJob>;

    /// Publish a start event for an existing job.
    async fn start_job(&self, owner_id: &OwnerId, job_id: &JobId) -> QueueResult<MessageId>;

    /// Pull one URL delivery, waiting up to the configured max poll.
    async fn consume(&self, consumer: &str) -> QueueResult<Option<Delivery>>;

    /// Pull one job-start delivery, waiting up to the configured max poll.
    async fn consume_job_event(&self, consumer: &str) -> QueueResult<Option<Delivery>>;

    /// Resolve a URL delivery. Callers must have recorded the outcome first.
    async fn ack(&self, message_id: &MessageId) -> QueueResult<()>;

    /// Resolve a job-start delivery without activating the job.
    async fn ack_job_event(&self, message_id: &MessageId) -> QueueResult<()>;

    /// Read a job with its members, if `owner_id` owns it.
    async fn get_job(&self, owner_id: &OwnerId, job_id: &JobId) -> QueueResult<Option<CrawlJob>>;

    /// Members of a job currently in `status`.
    async fn urls_by_status(
        &self,
        job_id: &JobId,
        status: CrawlUrlStatus,
    ) -> QueueResult<Vec<CrawlUrl>>;
}
