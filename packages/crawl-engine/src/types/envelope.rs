//! Delivery envelopes and explicit payload decoding.
//!
//! Brokers hand out loosely typed string maps. Nothing downstream of the
//! worker sees one: payloads are decoded into a [`CrawlUrl`] or a
//! [`JobEvent`] here, or rejected with a [`DecodeError`].

use std::collections::BTreeMap;
use std::fmt;

use crate::error::DecodeError;
use crate::types::job::{JobId, OwnerId};
use crate::types::url::{CrawlUrl, UrlPolicy};

pub const EVENT_NEW_URL: &str = "new_url";
pub const EVENT_START_JOB: &str = "start_job";

/// Broker-assigned receipt for one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Flat string payload carried by every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryPayload(BTreeMap<String, String>);

impl DeliveryPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload announcing a URL to crawl.
    pub fn new_url(url: &CrawlUrl) -> Self {
        let mut payload = Self::new();
        payload.insert("event", EVENT_NEW_URL);
        payload.insert("job_id", url.job_id().to_string());
        payload.insert("owner_id", url.owner_id().as_str());
        payload.insert("url_id", url.url_id());
        payload.insert("url", url.url());
        payload.insert("status", url.status.as_str());
        payload.insert("retries", url.retries.to_string());
        payload
    }

    /// Payload asking workers to start a job.
    pub fn start_job(job_id: &JobId, owner_id: &OwnerId) -> Self {
        let mut payload = Self::new();
        payload.insert("event", EVENT_START_JOB);
        payload.insert("job_id", job_id.to_string());
        payload.insert("owner_id", owner_id.as_str());
        payload
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    fn field(&self, key: &'static str) -> Result<&str, DecodeError> {
        self.get(key).ok_or(DecodeError::MissingField(key))
    }

    fn event(&self) -> Result<&str, DecodeError> {
        self.field("event")
    }

    /// Decode a `new_url` payload, re-deriving and checking its identity.
    ///
    /// `status` and `retries` default to a fresh record when absent.
    pub fn decode_crawl_url(&self, policy: &UrlPolicy) -> Result<CrawlUrl, DecodeError> {
        let event = self.event()?;
        if event != EVENT_NEW_URL {
            return Err(DecodeError::UnexpectedEvent(event.to_string()));
        }

        let job_id: JobId = self.field("job_id")?.parse()?;
        let owner_id = OwnerId::new(self.field("owner_id")?);
        let raw = self.field("url")?;
        let carried = self.field("url_id")?;

        let mut url = CrawlUrl::new(raw, job_id, owner_id, policy)?;
        if url.url_id() != carried {
            return Err(DecodeError::IdentityMismatch {
                carried: carried.to_string(),
                derived: url.url_id().to_string(),
            });
        }

        if let Some(status) = self.get("status") {
            url.status = status.parse()?;
        }
        if let Some(retries) = self.get("retries") {
            url.retries = retries.parse().map_err(|_| DecodeError::InvalidNumber {
                field: "retries",
                value: retries.to_string(),
            })?;
        }
        Ok(url)
    }

    /// Decode a `start_job` payload.
    pub fn decode_job_event(&self) -> Result<JobEvent, DecodeError> {
        let event = self.event()?;
        if event != EVENT_START_JOB {
            return Err(DecodeError::UnexpectedEvent(event.to_string()));
        }
        Ok(JobEvent {
            job_id: self.field("job_id")?.parse()?,
            owner_id: OwnerId::new(self.field("owner_id")?),
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeliveryPayload {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One unit of work handed to a consumer.
///
/// `attempt` counts broker deliveries of this message, starting at 1.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: MessageId,
    pub payload: DeliveryPayload,
    pub attempt: u32,
}

/// Request to (re)start a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub owner_id: OwnerId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::status::CrawlUrlStatus;

    fn sample() -> CrawlUrl {
        CrawlUrl::new(
            "https://www.amazon.com/dp/B0931VRJT5?ref=x",
            JobId::new(),
            OwnerId::new("user-1"),
            &UrlPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_crawl_url_keeps_state() {
        let mut url = sample();
        url.status = CrawlUrlStatus::Error;
        url.retries = 2;

        let decoded = DeliveryPayload::new_url(&url)
            .decode_crawl_url(&UrlPolicy::default())
            .unwrap();
        assert_eq!(decoded.url_id(), url.url_id());
        assert_eq!(decoded.status, CrawlUrlStatus::Error);
        assert_eq!(decoded.retries, 2);
        assert_eq!(decoded.owner_id().as_str(), "user-1");
    }

    #[test]
    fn test_decode_rejects_tampered_identity() {
        let mut payload = DeliveryPayload::new_url(&sample());
        payload.insert("url_id", "someone-else:B0931VRJT5");
        let err = payload.decode_crawl_url(&UrlPolicy::default()).unwrap_err();
        assert!(matches!(err, DecodeError::IdentityMismatch { .. }));
    }

    #[test]
    fn test_decode_reports_missing_field() {
        let mut payload = DeliveryPayload::new_url(&sample());
        payload.remove("url");
        let err = payload.decode_crawl_url(&UrlPolicy::default()).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("url")));
    }

    #[test]
    fn test_decode_rejects_bad_retries() {
        let mut payload = DeliveryPayload::new_url(&sample());
        payload.insert("retries", "many");
        let err = payload.decode_crawl_url(&UrlPolicy::default()).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidNumber { field: "retries", .. }));
    }

    #[test]
    fn test_job_event_and_url_events_are_distinct() {
        let url = sample();
        let start = DeliveryPayload::start_job(url.job_id(), url.owner_id());
        assert_eq!(start.decode_job_event().unwrap().job_id, *url.job_id());
        assert!(matches!(
            start.decode_crawl_url(&UrlPolicy::default()),
            Err(DecodeError::UnexpectedEvent(_))
        ));
        assert!(DeliveryPayload::new_url(&url).decode_job_event().is_err());
    }
}
