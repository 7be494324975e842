//! URL and job lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DecodeError;

/// Lifecycle of a single crawl URL.
///
/// `pending → running → complete`, with `error` reachable from any
/// non-complete state and retried until the budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlUrlStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl CrawlUrlStatus {
    pub const ALL: [CrawlUrlStatus; 4] = [
        CrawlUrlStatus::Pending,
        CrawlUrlStatus::Running,
        CrawlUrlStatus::Complete,
        CrawlUrlStatus::Error,
    ];

    /// Wire and column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlUrlStatus::Pending => "pending",
            CrawlUrlStatus::Running => "running",
            CrawlUrlStatus::Complete => "complete",
            CrawlUrlStatus::Error => "error",
        }
    }

    /// Whether the state machine allows `self -> next`.
    ///
    /// `running -> running` is allowed so a redelivered URL whose previous
    /// worker died mid-crawl can be picked up again.
    pub fn can_transition_to(&self, next: CrawlUrlStatus) -> bool {
        use CrawlUrlStatus::*;
        match (self, next) {
            (Complete, _) => false,
            (Pending | Error | Running, Running) => true,
            (Running, Complete) => true,
            (_, Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CrawlUrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrawlUrlStatus {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CrawlUrlStatus::Pending),
            "running" => Ok(CrawlUrlStatus::Running),
            "complete" => Ok(CrawlUrlStatus::Complete),
            "error" => Ok(CrawlUrlStatus::Error),
            other => Err(DecodeError::InvalidStatus(other.to_string())),
        }
    }
}

/// Job status, derived from member URLs on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlJobStatus {
    Pending,
    Running,
    Complete,
}

impl CrawlJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlJobStatus::Pending => "pending",
            CrawlJobStatus::Running => "running",
            CrawlJobStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for CrawlJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
