//! Persistence of extracted payloads.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::StorageResult;
use crate::types::job::JobId;
use crate::types::url::CrawlUrl;

/// One stored extraction, keyed by product code.
pub type CrawledRecord = BTreeMap<String, Value>;

/// Append-only store for extraction results.
///
/// Only [`crate::context::CrawlContext::complete`] writes here, and it
/// writes before the delivery is resolved.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `data` for `url`. Re-appending the same URL overwrites.
    async fn append(&self, url: &CrawlUrl, data: &Value) -> StorageResult<()>;

    /// Everything stored for a job, one `{code: data}` entry per URL,
    /// ordered by product code.
    async fn crawled_data(&self, job_id: &JobId) -> StorageResult<Vec<CrawledRecord>>;
}
