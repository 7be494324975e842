//! Keeps durable URL state consistent with in-flight deliveries.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncResult;
use crate::types::envelope::{JobEvent, MessageId};
use crate::types::url::CrawlUrl;

/// Result of a status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Written,
    /// The durable record is already `complete`; nothing was written.
    Settled,
}

/// Where an error report left the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReport {
    /// Budget remains. The delivery is still unresolved and should be replayed.
    Retry { retries: u32 },
    /// Budget spent. The delivery was archived in the same step.
    DeadLettered { retries: u32 },
    /// The URL completed under another delivery. Nothing was recorded and
    /// this delivery was archived.
    Settled { retries: u32 },
}

impl ErrorReport {
    pub fn retries(&self) -> u32 {
        match self {
            ErrorReport::Retry { retries }
            | ErrorReport::DeadLettered { retries }
            | ErrorReport::Settled { retries } => *retries,
        }
    }
}

/// The only writer of durable URL status.
///
/// Every operation is idempotent or safe to retry. Failures come back as
/// [`crate::error::SyncPersistenceError`] and leave the delivery pending so
/// the broker redelivers it after its visibility timeout.
///
/// `complete` is terminal: no write moves a complete record to another
/// status. Writes that would are refused as settled.
#[async_trait]
pub trait CrawlSyncer: Send + Sync {
    /// Errors at or past this count are terminal.
    fn retry_ceiling(&self) -> u32;

    /// Overwrite durable status and retries and move the per-status index.
    async fn sync(&self, url: &CrawlUrl) -> SyncResult<SyncOutcome>;

    /// Resolve a URL delivery.
    async fn ack(&self, message_id: &MessageId) -> SyncResult<()>;

    /// Move a URL delivery to the archive.
    async fn archive(&self, message_id: &MessageId) -> SyncResult<()>;

    /// Atomically bump retries, log `error`, set status `error`, and
    /// archive the delivery when the ceiling is reached.
    async fn report_error(
        &self,
        url: &CrawlUrl,
        message_id: &MessageId,
        error: &str,
    ) -> SyncResult<ErrorReport>;

    /// Atomically resolve `message_id` and publish a fresh delivery for `url`.
    /// A complete record is not republished; its delivery is archived.
    async fn replay(&self, url: &CrawlUrl, message_id: &MessageId) -> SyncResult<SyncOutcome>;

    /// Insert `url` if its `url_id` is unknown, index it, and publish a
    /// delivery. Returns whether a record was created.
    async fn enqueue(&self, url: &CrawlUrl) -> SyncResult<bool>;

    /// Atomically store `data`, set status `complete`, and archive.
    async fn complete(&self, url: &CrawlUrl, message_id: &MessageId, data: &Value)
        -> SyncResult<()>;

    /// Mark `url` exhausted, log `reason`, and archive its delivery.
    /// Returns [`ErrorReport::DeadLettered`], or [`ErrorReport::Settled`]
    /// when the record was already complete.
    async fn dead_letter(&self, url: &CrawlUrl, message_id: &MessageId, reason: &str)
        -> SyncResult<ErrorReport>;

    /// Read the durable record.
    async fn fetch(&self, url_id: &str) -> SyncResult<Option<CrawlUrl>>;

    /// Durable error log for a URL, oldest first.
    async fn errors(&self, url_id: &str) -> SyncResult<Vec<String>>;

    /// Handle a job-start event: reset `error` members to `pending` with
    /// zero retries and publish one delivery for each, mark the job
    /// started, and archive the event. Pending and running members already
    /// hold a live delivery and are left alone. Returns how many URLs were
    /// published.
    async fn activate_job(&self, event: &JobEvent, message_id: &MessageId) -> SyncResult<usize>;
}
