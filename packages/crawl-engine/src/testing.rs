//! Testing utilities: in-memory storage and a scripted extractor.
//!
//! Pair these with [`crate::brokers::memory::MemoryBroker`] to drive the
//! full worker without Redis, Postgres or a browser.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::warn;

use crate::brokers::memory::{Trace, TraceEvent};
use crate::context::CrawlContext;
use crate::error::{ExtractionError, StorageError, StorageResult};
use crate::traits::extractor::Extractor;
use crate::traits::storage::{CrawledRecord, Storage};
use crate::types::job::JobId;
use crate::types::url::CrawlUrl;

/// Storage held in process memory.
#[derive(Default)]
pub struct MemoryStorage {
    records: RwLock<BTreeMap<(JobId, String), Value>>,
    trace: Option<Trace>,
    fail: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a [`TraceEvent::Stored`] for every successful append.
    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Make subsequent appends fail until switched off.
    pub fn fail_appends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn append(&self, url: &CrawlUrl, data: &Value) -> StorageResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("appends disabled".into()));
        }
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                (*url.job_id(), url.product_code().to_string()),
                data.clone(),
            );
        if let Some(trace) = &self.trace {
            trace.record(TraceEvent::Stored {
                url_id: url.url_id().to_string(),
            });
        }
        Ok(())
    }

    async fn crawled_data(&self, job_id: &JobId) -> StorageResult<Vec<CrawledRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|((job, _), _)| job == job_id)
            .map(|((_, code), data)| BTreeMap::from([(code.clone(), data.clone())]))
            .collect())
    }
}

/// What a scripted extractor does for one product code.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Complete with `{"asin": code}`
    Succeed,
    /// Fail the first `n` attempts, then succeed
    FailTimes(u32),
    /// Fail every attempt
    AlwaysFail,
    /// Enqueue these URLs, then succeed
    Discover(Vec<String>),
    /// Complete with this payload
    Complete(Value),
}

#[derive(Default)]
struct ScriptState {
    outcomes: RwLock<HashMap<String, Outcome>>,
    attempts: RwLock<HashMap<String, u32>>,
    discovered: RwLock<Vec<String>>,
    delay: RwLock<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

/// Shared script driving every [`ScriptedExtractor`] a factory builds.
///
/// Codes without an outcome succeed.
#[derive(Clone, Default)]
pub struct ExtractorScript {
    state: Arc<ScriptState>,
}

impl ExtractorScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(self, code: impl Into<String>, outcome: Outcome) -> Self {
        self.state
            .outcomes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(code.into(), outcome);
        self
    }

    /// Hold each crawl open this long before resolving it.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self
            .state
            .delay
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
        self
    }

    /// Builder to register with an [`crate::factory::ExtractorFactory`].
    pub fn builder(
        &self,
    ) -> impl Fn(Box<dyn CrawlContext>) -> Box<dyn Extractor> + Send + Sync + 'static {
        let script = self.clone();
        move |ctx: Box<dyn CrawlContext>| -> Box<dyn Extractor> {
            Box::new(ScriptedExtractor {
                ctx,
                script: script.clone(),
            })
        }
    }

    /// Crawl attempts seen for `code`.
    pub fn attempts(&self, code: &str) -> u32 {
        self.state
            .attempts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(code)
            .copied()
            .unwrap_or_default()
    }

    /// Most crawls observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Crawls that ran to the end.
    pub fn finished(&self) -> usize {
        self.state.finished.load(Ordering::SeqCst)
    }

    /// `url_id`s of URLs the extractors enqueued successfully.
    pub fn discovered(&self) -> Vec<String> {
        self.state
            .discovered
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn begin(&self, code: &str) -> (u32, Outcome, Duration) {
        let attempt = {
            let mut attempts = self
                .state
                .attempts
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let entry = attempts.entry(code.to_string()).or_default();
            *entry += 1;
            *entry
        };
        let outcome = self
            .state
            .outcomes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(code)
            .cloned()
            .unwrap_or(Outcome::Succeed);
        let delay = *self
            .state
            .delay
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now, Ordering::SeqCst);
        (attempt, outcome, delay)
    }

    fn end(&self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Extractor that follows an [`ExtractorScript`] instead of fetching pages.
pub struct ScriptedExtractor {
    ctx: Box<dyn CrawlContext>,
    script: ExtractorScript,
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn crawl(&mut self) {
        if let Err(e) = self.ctx.set_running().await {
            warn!(error = %e, "scripted crawl refused");
            return;
        }

        let code = self.ctx.crawl_url().product_code().to_string();
        let (attempt, outcome, delay) = self.script.begin(&code);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = match outcome {
            Outcome::Succeed => Ok(json!({ "asin": code })),
            Outcome::FailTimes(n) if attempt <= n => {
                Err(ExtractionError::new(format!("attempt {attempt} failed")))
            }
            Outcome::FailTimes(_) => Ok(json!({ "asin": code })),
            Outcome::AlwaysFail => Err(ExtractionError::new(format!("attempt {attempt} failed"))),
            Outcome::Discover(urls) => {
                for url in urls {
                    if let Some(found) = self.ctx.enqueue(&url).await {
                        self.script
                            .state
                            .discovered
                            .write()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .push(found.url_id().to_string());
                    }
                }
                Ok(json!({ "asin": code }))
            }
            Outcome::Complete(data) => Ok(data),
        };

        match result {
            Ok(data) => {
                if let Err(e) = self.ctx.complete(data).await {
                    warn!(error = %e, "scripted completion failed");
                }
            }
            Err(error) => {
                if let Err(e) = self.ctx.fail(error).await {
                    warn!(error = %e, "scripted failure rejected");
                }
            }
        }
        self.script.end();
    }
}
