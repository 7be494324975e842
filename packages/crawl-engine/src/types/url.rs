//! URL identity and the crawl URL record.
//!
//! A URL's identity is `"{job_id}:{product_code}"`. Query strings,
//! fragments and path prefixes are ignored, so two links to the same
//! product page within one job collapse to a single record.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use url::Url;

use crate::error::{DecodeError, InvalidUrlError, UrlRule};
use crate::types::job::{JobId, OwnerId};
use crate::types::status::CrawlUrlStatus;

lazy_static! {
    static ref PRODUCT_CODE: Regex = Regex::new(r"^[A-Z0-9]{10}$").unwrap();
}

/// Storefront hosts accepted by default.
pub const AMAZON_HOSTS: [&str; 23] = [
    "www.amazon.com.au",
    "www.amazon.com.be",
    "www.amazon.com.br",
    "www.amazon.ca",
    "www.amazon.cn",
    "www.amazon.eg",
    "www.amazon.fr",
    "www.amazon.de",
    "www.amazon.in",
    "www.amazon.it",
    "www.amazon.co.jp",
    "www.amazon.com.mx",
    "www.amazon.nl",
    "www.amazon.pl",
    "www.amazon.sa",
    "www.amazon.sg",
    "www.amazon.co.za",
    "www.amazon.es",
    "www.amazon.se",
    "www.amazon.com.tr",
    "www.amazon.ae",
    "www.amazon.co.uk",
    "www.amazon.com",
];

/// Which schemes and hosts a deployment accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPolicy {
    pub schemes: HashSet<String>,
    pub allowed_hosts: HashSet<String>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            schemes: HashSet::from(["https".to_string()]),
            allowed_hosts: AMAZON_HOSTS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

impl UrlPolicy {
    /// Replace the allowed host set.
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the allowed scheme set.
    pub fn with_schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schemes = schemes.into_iter().map(Into::into).collect();
        self
    }

    /// Check `raw` against the policy and return its product code.
    pub fn product_code(&self, raw: &str) -> Result<String, InvalidUrlError> {
        let parsed = Url::parse(raw).map_err(|_| InvalidUrlError::new(raw, UrlRule::Parse))?;

        if !self.schemes.contains(parsed.scheme()) {
            return Err(InvalidUrlError::new(raw, UrlRule::Scheme));
        }

        let host = parsed.host_str().unwrap_or_default();
        if !self.allowed_hosts.contains(host) {
            return Err(InvalidUrlError::new(raw, UrlRule::Domain));
        }

        product_code_of(&parsed).ok_or_else(|| InvalidUrlError::new(raw, UrlRule::Shape))
    }
}

/// Product code from a `/dp/<CODE>` path, if the path has exactly one.
fn product_code_of(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    let mut dp = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == "dp")
        .map(|(i, _)| i);

    let index = dp.next()?;
    if dp.next().is_some() {
        return None;
    }

    let code = segments.get(index + 1)?;
    PRODUCT_CODE.is_match(code).then(|| code.to_string())
}

/// Derive the deduplicating identity of `raw` within `job_id`.
pub fn derive_url_id(
    raw: &str,
    job_id: &JobId,
    policy: &UrlPolicy,
) -> Result<String, InvalidUrlError> {
    let code = policy.product_code(raw)?;
    Ok(format_url_id(job_id, &code))
}

fn format_url_id(job_id: &JobId, code: &str) -> String {
    format!("{job_id}:{code}")
}

/// Kind of page a URL points at; selects the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlClass {
    AmazonProduct,
}

impl UrlClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlClass::AmazonProduct => "amazon_product",
        }
    }
}

impl fmt::Display for UrlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One URL inside one job.
///
/// Identity fields are fixed at construction. Equality and hashing use
/// `url_id` only.
#[derive(Debug, Clone)]
pub struct CrawlUrl {
    url: String,
    job_id: JobId,
    owner_id: OwnerId,
    url_id: String,
    product_code: String,
    class: UrlClass,
    pub status: CrawlUrlStatus,
    pub retries: u32,
}

impl CrawlUrl {
    /// Validate `raw` and build a fresh `pending` record.
    pub fn new(
        raw: &str,
        job_id: JobId,
        owner_id: OwnerId,
        policy: &UrlPolicy,
    ) -> Result<Self, InvalidUrlError> {
        let product_code = policy.product_code(raw)?;
        Ok(Self {
            url: raw.to_string(),
            url_id: format_url_id(&job_id, &product_code),
            job_id,
            owner_id,
            product_code,
            class: UrlClass::AmazonProduct,
            status: CrawlUrlStatus::Pending,
            retries: 0,
        })
    }

    /// Rebuild a record read back from a durable store.
    ///
    /// Host and scheme were checked when the record was created, so only
    /// the shape is re-derived here, and the stored id must agree with it.
    pub fn restore(
        raw: &str,
        job_id: JobId,
        owner_id: OwnerId,
        url_id: &str,
        status: CrawlUrlStatus,
        retries: u32,
    ) -> Result<Self, DecodeError> {
        let parsed = Url::parse(raw).map_err(|_| InvalidUrlError::new(raw, UrlRule::Parse))?;
        let product_code =
            product_code_of(&parsed).ok_or_else(|| InvalidUrlError::new(raw, UrlRule::Shape))?;
        let derived = format_url_id(&job_id, &product_code);
        if derived != url_id {
            return Err(DecodeError::IdentityMismatch {
                carried: url_id.to_string(),
                derived,
            });
        }

        Ok(Self {
            url: raw.to_string(),
            url_id: derived,
            job_id,
            owner_id,
            product_code,
            class: UrlClass::AmazonProduct,
            status,
            retries,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    pub fn url_id(&self) -> &str {
        &self.url_id
    }

    pub fn product_code(&self) -> &str {
        &self.product_code
    }

    pub fn class(&self) -> UrlClass {
        self.class
    }

    /// Errored with no retry budget left.
    pub fn is_exhausted(&self, retry_ceiling: u32) -> bool {
        self.status == CrawlUrlStatus::Error && self.retries >= retry_ceiling
    }

    /// Complete, or exhausted.
    pub fn is_terminal(&self, retry_ceiling: u32) -> bool {
        self.status == CrawlUrlStatus::Complete || self.is_exhausted(retry_ceiling)
    }
}

impl PartialEq for CrawlUrl {
    fn eq(&self, other: &Self) -> bool {
        self.url_id == other.url_id
    }
}

impl Eq for CrawlUrl {}

impl Hash for CrawlUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url_id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_policy() -> UrlPolicy {
        UrlPolicy::default()
            .with_hosts(["localhost"])
            .with_schemes(["http"])
    }

    #[test]
    fn test_identity_ignores_query_and_prefix() {
        let job = JobId::new();
        let policy = UrlPolicy::default();
        let a = derive_url_id("https://www.amazon.com/dp/B0931VRJT5", &job, &policy).unwrap();
        let b = derive_url_id(
            "https://www.amazon.com/Some-Product-Name/dp/B0931VRJT5/ref=sr_1_1?th=1#reviews",
            &job,
            &policy,
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a, format!("{job}:B0931VRJT5"));
    }

    #[test]
    fn test_identity_is_scoped_by_job() {
        let policy = UrlPolicy::default();
        let raw = "https://www.amazon.de/dp/B0931VRJT5";
        let a = derive_url_id(raw, &JobId::new(), &policy).unwrap();
        let b = derive_url_id(raw, &JobId::new(), &policy).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_by_rule() {
        let policy = UrlPolicy::default();
        let job = JobId::new();
        let cases = [
            ("not a url", UrlRule::Parse),
            ("http://www.amazon.com/dp/B0931VRJT5", UrlRule::Scheme),
            ("https://www.ebay.com/dp/B0931VRJT5", UrlRule::Domain),
            ("https://www.amazon.com/gp/B0931VRJT5", UrlRule::Shape),
            ("https://www.amazon.com/dp/b0931vrjt5", UrlRule::Shape),
            ("https://www.amazon.com/dp/B0931VRJT", UrlRule::Shape),
            ("https://www.amazon.com/dp/B0931VRJT5/dp/B0931VRJT6", UrlRule::Shape),
        ];
        for (raw, rule) in cases {
            let err = derive_url_id(raw, &job, &policy).unwrap_err();
            assert_eq!(err.rule, rule, "{raw}");
            assert_eq!(err.url, raw);
        }
    }

    #[test]
    fn test_local_policy_accepts_test_server() {
        let url = CrawlUrl::new(
            "http://localhost:8080/dp/B01GFPWTI4?x=foo&bar=y",
            JobId::new(),
            OwnerId::new("u1"),
            &local_policy(),
        )
        .unwrap();
        assert_eq!(url.product_code(), "B01GFPWTI4");
        assert_eq!(url.status, CrawlUrlStatus::Pending);
        assert_eq!(url.retries, 0);
    }

    #[test]
    fn test_equality_uses_url_id_only() {
        let job = JobId::new();
        let policy = UrlPolicy::default();
        let a = CrawlUrl::new("https://www.amazon.com/dp/B0931VRJT5", job, "u1".into(), &policy)
            .unwrap();
        let mut b = CrawlUrl::new(
            "https://www.amazon.com/x/dp/B0931VRJT5?a=1",
            job,
            "u1".into(),
            &policy,
        )
        .unwrap();
        b.status = CrawlUrlStatus::Error;
        assert_eq!(a, b);
    }

    #[test]
    fn test_restore_rejects_foreign_id() {
        let job = JobId::new();
        let err = CrawlUrl::restore(
            "https://www.amazon.com/dp/B0931VRJT5",
            job,
            "u1".into(),
            &format!("{job}:B0931VRJT6"),
            CrawlUrlStatus::Pending,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::IdentityMismatch { .. }));
    }

    #[test]
    fn test_terminal_states() {
        let mut url = CrawlUrl::new(
            "https://www.amazon.com/dp/B0931VRJT5",
            JobId::new(),
            "u1".into(),
            &UrlPolicy::default(),
        )
        .unwrap();
        assert!(!url.is_terminal(3));
        url.status = CrawlUrlStatus::Error;
        url.retries = 2;
        assert!(!url.is_terminal(3));
        url.retries = 3;
        assert!(url.is_exhausted(3));
        url.status = CrawlUrlStatus::Complete;
        assert!(url.is_terminal(3));
    }
}
