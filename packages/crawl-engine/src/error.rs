//! Typed errors for the crawl engine.
//!
//! Each seam gets its own `thiserror` enum so callers can tell a bad URL
//! from a broken broker without string matching.

use thiserror::Error;

use crate::types::status::CrawlUrlStatus;

/// Which validation rule a URL broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlRule {
    /// Not parseable as an absolute URL
    Parse,
    /// Scheme outside the allowed set
    Scheme,
    /// Host outside the allowed storefronts
    Domain,
    /// No `/dp/<CODE>` product segment
    Shape,
}

impl std::fmt::Display for UrlRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rule = match self {
            UrlRule::Parse => "unparseable url",
            UrlRule::Scheme => "scheme not allowed",
            UrlRule::Domain => "domain not allowed",
            UrlRule::Shape => "not a product page",
        };
        f.write_str(rule)
    }
}

/// A URL rejected at identity derivation. It never enters the system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid url {url}: {rule}")]
pub struct InvalidUrlError {
    pub url: String,
    pub rule: UrlRule,
}

impl InvalidUrlError {
    pub fn new(url: impl Into<String>, rule: UrlRule) -> Self {
        Self {
            url: url.into(),
            rule,
        }
    }
}

/// Errors decoding a delivery payload into a typed record.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Required payload field absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Status string outside the known set
    #[error("unknown status: {0}")]
    InvalidStatus(String),

    /// Numeric field did not parse
    #[error("invalid {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },

    /// Job id is not a UUID
    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    /// Payload URL fails validation
    #[error(transparent)]
    InvalidUrl(#[from] InvalidUrlError),

    /// Carried url_id disagrees with the one derived from the URL
    #[error("url_id mismatch: payload has {carried}, url derives {derived}")]
    IdentityMismatch { carried: String, derived: String },

    /// Event tag not understood by this consumer
    #[error("unexpected event: {0}")]
    UnexpectedEvent(String),

    /// JSON body did not parse
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Transient store or broker failure inside a syncer.
///
/// Contexts and the worker log these and move on: the delivery stays
/// unacknowledged and comes back after its visibility timeout.
#[derive(Debug, Error)]
pub enum SyncPersistenceError {
    /// Redis command or script failed
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Postgres query or transaction failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload could not be serialized for the wire
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable record could not be read back
    #[error("corrupt record {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: DecodeError,
    },

    /// Record expected to exist is gone
    #[error("record not found: {0}")]
    Missing(String),
}

/// Errors from the job-facing queue surface.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying persistence failed
    #[error(transparent)]
    Sync(#[from] SyncPersistenceError),

    /// Job does not exist for this owner
    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Submission carried no URLs at all
    #[error("job has no urls")]
    EmptyJob,
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        QueueError::Sync(e.into())
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Sync(e.into())
    }
}

/// Errors from storage of extracted payloads.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem write or read failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Database write or read failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored payload is not valid JSON
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend refused the write
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A move the URL state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition for {url_id}: {from} -> {to}")]
pub struct TransitionError {
    pub url_id: String,
    pub from: CrawlUrlStatus,
    pub to: CrawlUrlStatus,
}

/// Failure raised by an extractor while fetching or parsing a page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExtractionError {
    pub message: String,
}

impl ExtractionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for ExtractionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ExtractionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Errors surfaced to extractors by a crawl context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Payload was not stored, so the delivery was left unresolved
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for syncer operations.
pub type SyncResult<T> = std::result::Result<T, SyncPersistenceError>;

/// Result type for queue operations.
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
