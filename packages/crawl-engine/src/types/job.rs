//! Job identity and the derived job view.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{DecodeError, InvalidUrlError};
use crate::types::status::{CrawlJobStatus, CrawlUrlStatus};
use crate::types::url::CrawlUrl;

/// Time-ordered job identifier (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| DecodeError::InvalidJobId(s.to_string()))
    }
}

/// Identifier of the user who owns a job. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A job and its member URLs.
///
/// `started` only records that the start event was handled. The job's
/// status is always derived from the URLs, see [`CrawlJob::status`].
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub job_id: JobId,
    pub owner_id: OwnerId,
    pub started: bool,
    pub urls: HashSet<CrawlUrl>,
}

impl CrawlJob {
    pub fn new(job_id: JobId, owner_id: OwnerId) -> Self {
        Self {
            job_id,
            owner_id,
            started: false,
            urls: HashSet::new(),
        }
    }

    /// Derive status from member URLs.
    ///
    /// Any URL running makes the job running. If every URL is terminal
    /// (complete, or errored with no budget left) the job is complete.
    /// Everything else is pending. A job with no URLs is complete.
    pub fn status(&self, retry_ceiling: u32) -> CrawlJobStatus {
        if self
            .urls
            .iter()
            .any(|u| u.status == CrawlUrlStatus::Running)
        {
            CrawlJobStatus::Running
        } else if self.urls.iter().all(|u| u.is_terminal(retry_ceiling)) {
            CrawlJobStatus::Complete
        } else {
            CrawlJobStatus::Pending
        }
    }

    pub fn count(&self, status: CrawlUrlStatus) -> usize {
        self.urls.iter().filter(|u| u.status == status).count()
    }

    pub fn get(&self, url_id: &str) -> Option<&CrawlUrl> {
        self.urls.iter().find(|u| u.url_id() == url_id)
    }
}

/// Outcome of a submission: the persisted job and the URLs turned away.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub job: CrawlJob,
    pub rejected: Vec<InvalidUrlError>,
}
