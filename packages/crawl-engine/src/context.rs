//! Per-delivery façade handed to extractors.
//!
//! A context owns a working copy of one URL record and the receipt of the
//! delivery that carried it. Every transition goes through the syncer. If
//! persistence fails the working copy still advances and the failure is
//! logged: the delivery stays unresolved and the broker hands it out again
//! after its visibility timeout.
//!
//! A redelivered copy can run while the first copy is still extracting. If
//! the first one completes, every later write from the copy is refused as
//! settled: the context adopts `complete` and the copy's delivery is
//! archived rather than replayed.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{ContextError, ExtractionError, TransitionError};
use crate::traits::storage::Storage;
use crate::traits::syncer::{CrawlSyncer, ErrorReport, SyncOutcome};
use crate::types::envelope::MessageId;
use crate::types::status::CrawlUrlStatus;
use crate::types::url::{CrawlUrl, UrlPolicy};

/// What an extractor may do with the URL it was given.
#[async_trait]
pub trait CrawlContext: Send + Sync {
    /// Working copy of the URL record.
    fn crawl_url(&self) -> &CrawlUrl;

    fn message_id(&self) -> &MessageId;

    /// `pending | error -> running`.
    async fn set_running(&mut self) -> Result<(), TransitionError>;

    /// `running -> complete`. Stores `data` before resolving the delivery.
    async fn complete(&mut self, data: Value) -> Result<(), ContextError>;

    /// Record a failed attempt. Replays the URL while budget remains.
    async fn fail(&mut self, error: ExtractionError) -> Result<(), TransitionError>;

    /// Add a discovered URL to the same job. `None` if it is invalid,
    /// already known, or could not be written.
    async fn enqueue(&self, url: &str) -> Option<CrawlUrl>;
}

/// Context backed by a [`CrawlSyncer`] and a [`Storage`].
pub struct DefaultCrawlContext {
    url: CrawlUrl,
    message_id: MessageId,
    syncer: Arc<dyn CrawlSyncer>,
    storage: Arc<dyn Storage>,
    policy: Arc<UrlPolicy>,
}

impl DefaultCrawlContext {
    pub fn new(
        url: CrawlUrl,
        message_id: MessageId,
        syncer: Arc<dyn CrawlSyncer>,
        storage: Arc<dyn Storage>,
        policy: Arc<UrlPolicy>,
    ) -> Self {
        Self {
            url,
            message_id,
            syncer,
            storage,
            policy,
        }
    }

    fn check(&self, to: CrawlUrlStatus) -> Result<(), TransitionError> {
        if self.url.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(TransitionError {
                url_id: self.url.url_id().to_string(),
                from: self.url.status,
                to,
            })
        }
    }

    /// Adopt the durable `complete` status after a refused write.
    fn settle(&mut self, to: CrawlUrlStatus) -> TransitionError {
        debug!(url_id = %self.url.url_id(), message_id = %self.message_id, "url completed elsewhere, delivery settled");
        self.url.status = CrawlUrlStatus::Complete;
        TransitionError {
            url_id: self.url.url_id().to_string(),
            from: CrawlUrlStatus::Complete,
            to,
        }
    }
}

#[async_trait]
impl CrawlContext for DefaultCrawlContext {
    fn crawl_url(&self) -> &CrawlUrl {
        &self.url
    }

    fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    async fn set_running(&mut self) -> Result<(), TransitionError> {
        self.check(CrawlUrlStatus::Running)?;
        self.url.status = CrawlUrlStatus::Running;

        match self.syncer.sync(&self.url).await {
            Ok(SyncOutcome::Written) => Ok(()),
            Ok(SyncOutcome::Settled) => {
                if let Err(e) = self.syncer.archive(&self.message_id).await {
                    error!(message_id = %self.message_id, error = %e, "failed to archive settled delivery");
                }
                Err(self.settle(CrawlUrlStatus::Running))
            }
            Err(e) => {
                warn!(url_id = %self.url.url_id(), error = %e, "failed to persist running status");
                Ok(())
            }
        }
    }

    async fn complete(&mut self, data: Value) -> Result<(), ContextError> {
        self.check(CrawlUrlStatus::Complete)?;

        if let Err(e) = self.storage.append(&self.url, &data).await {
            error!(url_id = %self.url.url_id(), error = %e, "failed to store crawled data");
            return Err(e.into());
        }

        self.url.status = CrawlUrlStatus::Complete;
        match self
            .syncer
            .complete(&self.url, &self.message_id, &data)
            .await
        {
            Ok(()) => info!(url_id = %self.url.url_id(), "url complete"),
            Err(e) => {
                error!(url_id = %self.url.url_id(), message_id = %self.message_id, error = %e, "failed to persist completion")
            }
        }
        Ok(())
    }

    async fn fail(&mut self, error: ExtractionError) -> Result<(), TransitionError> {
        self.check(CrawlUrlStatus::Error)?;
        self.url.status = CrawlUrlStatus::Error;

        let report = match self
            .syncer
            .report_error(&self.url, &self.message_id, &error.message)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                self.url.retries += 1;
                error!(url_id = %self.url.url_id(), error = %e, "failed to report crawl error");
                return Ok(());
            }
        };
        self.url.retries = report.retries();

        match report {
            ErrorReport::Retry { retries } => {
                debug!(url_id = %self.url.url_id(), retries, error = %error, "crawl failed, replaying");
                match self.syncer.replay(&self.url, &self.message_id).await {
                    Ok(SyncOutcome::Written) => {}
                    Ok(SyncOutcome::Settled) => return Err(self.settle(CrawlUrlStatus::Error)),
                    Err(e) => warn!(url_id = %self.url.url_id(), error = %e, "failed to replay url"),
                }
            }
            ErrorReport::DeadLettered { retries } => {
                warn!(url_id = %self.url.url_id(), retries, error = %error, "crawl failed, retries exhausted");
            }
            ErrorReport::Settled { .. } => return Err(self.settle(CrawlUrlStatus::Error)),
        }
        Ok(())
    }

    async fn enqueue(&self, url: &str) -> Option<CrawlUrl> {
        let candidate = match CrawlUrl::new(
            url,
            *self.url.job_id(),
            self.url.owner_id().clone(),
            &self.policy,
        ) {
            Ok(candidate) => candidate,
            Err(e) => {
                debug!(from = %self.url.url_id(), error = %e, "discovered url rejected");
                return None;
            }
        };

        match self.syncer.enqueue(&candidate).await {
            Ok(true) => Some(candidate),
            Ok(false) => None,
            Err(e) => {
                warn!(url_id = %candidate.url_id(), error = %e, "failed to enqueue discovered url");
                None
            }
        }
    }
}
