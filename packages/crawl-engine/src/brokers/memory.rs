//! In-process broker for tests and single-process development.
//!
//! Implements both [`Queue`] and [`CrawlSyncer`] over one mutex-guarded
//! state. Deliveries get a visibility timeout like the real backends: a
//! lease that expires goes back to the front of the stream under a new
//! message id with its attempt count bumped.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{EngineConfig, StreamConfig};
use crate::error::{QueueError, QueueResult, SyncPersistenceError, SyncResult};
use crate::traits::queue::Queue;
use crate::traits::syncer::{CrawlSyncer, ErrorReport, SyncOutcome};
use crate::types::envelope::{Delivery, DeliveryPayload, JobEvent, MessageId};
use crate::types::job::{CrawlJob, JobId, OwnerId, SubmittedJob};
use crate::types::status::CrawlUrlStatus;
use crate::types::url::{CrawlUrl, UrlPolicy};

/// Something observable a backend or store did, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Published { url_id: String, message_id: MessageId },
    Synced { url_id: String, status: CrawlUrlStatus },
    ErrorRecorded { url_id: String, retries: u32 },
    Completed { url_id: String },
    Stored { url_id: String },
    Acked { message_id: MessageId },
    Archived { message_id: MessageId },
}

/// Shared, append-only event log.
#[derive(Debug, Clone, Default)]
pub struct Trace(Arc<StdMutex<Vec<TraceEvent>>>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: TraceEvent) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Index of the first event matching `pred`.
    pub fn position(&self, pred: impl Fn(&TraceEvent) -> bool) -> Option<usize> {
        self.events().iter().position(pred)
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    payload: DeliveryPayload,
    attempt: u32,
}

#[derive(Debug, Default)]
struct Stream {
    ready: VecDeque<StoredMessage>,
    leased: HashMap<MessageId, (StoredMessage, Instant)>,
    archive: Vec<StoredMessage>,
}

impl Stream {
    fn lease(&mut self, config: StreamConfig, next_id: &mut u64) -> Option<Delivery> {
        let now = Instant::now();
        let expired: Vec<MessageId> = self
            .leased
            .iter()
            .filter(|(_, (_, until))| *until <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some((mut message, _)) = self.leased.remove(&id) {
                *next_id += 1;
                message.id = MessageId::new(format!("{next_id}-0"));
                self.ready.push_front(message);
            }
        }

        let mut message = self.ready.pop_front()?;
        message.attempt += 1;
        let delivery = Delivery {
            message_id: message.id.clone(),
            payload: message.payload.clone(),
            attempt: message.attempt,
        };
        self.leased
            .insert(message.id.clone(), (message, now + config.visibility_timeout));
        Some(delivery)
    }

    /// Drop a lease. Returns whether `id` was outstanding.
    fn resolve(&mut self, id: &MessageId, archive: bool) -> bool {
        match self.leased.remove(id) {
            Some((message, _)) => {
                if archive {
                    self.archive.push(message);
                }
                true
            }
            None => false,
        }
    }

    fn outstanding(&self) -> usize {
        self.ready.len() + self.leased.len()
    }
}

#[derive(Debug)]
struct UrlRecord {
    url: CrawlUrl,
    data: Option<Value>,
    errors: Vec<String>,
}

#[derive(Debug)]
struct JobRecord {
    owner_id: OwnerId,
    started: bool,
    members: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct State {
    urls: HashMap<String, UrlRecord>,
    jobs: HashMap<JobId, JobRecord>,
    by_status: HashMap<(JobId, CrawlUrlStatus), BTreeSet<String>>,
    url_stream: Stream,
    job_stream: Stream,
    published: HashMap<String, usize>,
    next_id: u64,
}

impl State {
    fn message_id(&mut self) -> MessageId {
        self.next_id += 1;
        MessageId::new(format!("{}-0", self.next_id))
    }

    fn publish_url(&mut self, url: &CrawlUrl, trace: Option<&Trace>) -> MessageId {
        let id = self.message_id();
        self.url_stream.ready.push_back(StoredMessage {
            id: id.clone(),
            payload: DeliveryPayload::new_url(url),
            attempt: 0,
        });
        *self.published.entry(url.url_id().to_string()).or_default() += 1;
        if let Some(trace) = trace {
            trace.record(TraceEvent::Published {
                url_id: url.url_id().to_string(),
                message_id: id.clone(),
            });
        }
        id
    }

    /// Insert a record and index it. No-op if the id is known.
    fn insert_url(&mut self, url: &CrawlUrl) -> bool {
        if self.urls.contains_key(url.url_id()) {
            return false;
        }
        self.urls.insert(
            url.url_id().to_string(),
            UrlRecord {
                url: url.clone(),
                data: None,
                errors: Vec::new(),
            },
        );
        self.jobs
            .entry(*url.job_id())
            .or_insert_with(|| JobRecord {
                owner_id: url.owner_id().clone(),
                started: false,
                members: BTreeSet::new(),
            })
            .members
            .insert(url.url_id().to_string());
        self.by_status
            .entry((*url.job_id(), url.status))
            .or_default()
            .insert(url.url_id().to_string());
        true
    }

    fn record_mut(&mut self, url_id: &str) -> SyncResult<&mut UrlRecord> {
        self.urls
            .get_mut(url_id)
            .ok_or_else(|| SyncPersistenceError::Missing(url_id.to_string()))
    }

    /// Set status and retries on the durable record and move its index entry.
    /// A complete record only accepts another `complete`.
    fn write_state(
        &mut self,
        url_id: &str,
        status: CrawlUrlStatus,
        retries: u32,
    ) -> SyncResult<SyncOutcome> {
        let record = self.record_mut(url_id)?;
        let previous = record.url.status;
        if previous == CrawlUrlStatus::Complete && status != CrawlUrlStatus::Complete {
            return Ok(SyncOutcome::Settled);
        }
        let job_id = *record.url.job_id();
        record.url.status = status;
        record.url.retries = retries;

        if let Some(set) = self.by_status.get_mut(&(job_id, previous)) {
            set.remove(url_id);
        }
        self.by_status
            .entry((job_id, status))
            .or_default()
            .insert(url_id.to_string());
        Ok(SyncOutcome::Written)
    }

    fn is_complete(&self, url_id: &str) -> SyncResult<bool> {
        self.urls
            .get(url_id)
            .map(|r| r.url.status == CrawlUrlStatus::Complete)
            .ok_or_else(|| SyncPersistenceError::Missing(url_id.to_string()))
    }
}

/// Queue and syncer backed by process memory.
pub struct MemoryBroker {
    state: Mutex<State>,
    url_ready: Notify,
    job_ready: Notify,
    url_stream: StreamConfig,
    job_stream: StreamConfig,
    retry_ceiling: u32,
    policy: UrlPolicy,
    trace: Option<Trace>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl MemoryBroker {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            url_ready: Notify::new(),
            job_ready: Notify::new(),
            url_stream: config.url_stream.clone(),
            job_stream: config.job_stream.clone(),
            retry_ceiling: config.retry_ceiling,
            policy: config.policy.clone(),
            trace: None,
        }
    }

    /// Record every durable write and delivery resolution into `trace`.
    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = Some(trace);
        self
    }

    fn record(&self, event: TraceEvent) {
        if let Some(trace) = &self.trace {
            trace.record(event);
        }
    }

    /// Archive a delivery whose URL already completed.
    fn settle(&self, state: &mut State, message_id: &MessageId) {
        if state.url_stream.resolve(message_id, true) {
            self.record(TraceEvent::Archived {
                message_id: message_id.clone(),
            });
        }
        debug!(message_id = %message_id, "delivery settled by completed url");
    }

    /// URL deliveries not yet resolved, leased or not.
    pub async fn outstanding(&self) -> usize {
        self.state.lock().await.url_stream.outstanding()
    }

    /// How many times a delivery for `url_id` was published.
    pub async fn publish_count(&self, url_id: &str) -> usize {
        self.state
            .lock()
            .await
            .published
            .get(url_id)
            .copied()
            .unwrap_or_default()
    }

    /// Payloads of archived URL deliveries, oldest first.
    pub async fn archived(&self) -> Vec<DeliveryPayload> {
        self.state
            .lock()
            .await
            .url_stream
            .archive
            .iter()
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Stored extraction data on the durable record.
    pub async fn data(&self, url_id: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .urls
            .get(url_id)
            .and_then(|r| r.data.clone())
    }

    async fn pull(&self, jobs: bool) -> Option<Delivery> {
        let (config, notify) = if jobs {
            (&self.job_stream, &self.job_ready)
        } else {
            (&self.url_stream, &self.url_ready)
        };
        let deadline = Instant::now() + config.max_poll;

        loop {
            let notified = notify.notified();
            {
                let mut state = self.state.lock().await;
                let state = &mut *state;
                let stream = if jobs {
                    &mut state.job_stream
                } else {
                    &mut state.url_stream
                };
                if let Some(delivery) = stream.lease(config.clone(), &mut state.next_id) {
                    return Some(delivery);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = (deadline - now).min(config.poll_interval);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }
}

#[async_trait]
impl Queue for MemoryBroker {
    async fn submit_job(&self, owner_id: &OwnerId, urls: &[String]) -> QueueResult<SubmittedJob> {
        if urls.is_empty() {
            return Err(QueueError::EmptyJob);
        }

        let job_id = JobId::new();
        let mut job = CrawlJob::new(job_id, owner_id.clone());
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();

        let mut state = self.state.lock().await;
        state.jobs.insert(
            job_id,
            JobRecord {
                owner_id: owner_id.clone(),
                started: false,
                members: BTreeSet::new(),
            },
        );

        for raw in urls {
            let url = match CrawlUrl::new(raw, job_id, owner_id.clone(), &self.policy) {
                Ok(url) => url,
                Err(e) => {
                    debug!(job_id = %job_id, error = %e, "rejected url");
                    rejected.push(e);
                    continue;
                }
            };
            if !seen.insert(url.url_id().to_string()) {
                continue;
            }
            state.insert_url(&url);
            state.publish_url(&url, self.trace.as_ref());
            self.url_ready.notify_one();
            job.urls.insert(url);
        }

        debug!(job_id = %job_id, accepted = job.urls.len(), rejected = rejected.len(), "job submitted");
        Ok(SubmittedJob { job, rejected })
    }

    async fn start_job(&self, owner_id: &OwnerId, job_id: &JobId) -> QueueResult<MessageId> {
        let mut state = self.state.lock().await;
        match state.jobs.get(job_id) {
            Some(job) if &job.owner_id == owner_id => {}
            _ => {
                return Err(QueueError::JobNotFound {
                    job_id: job_id.to_string(),
                })
            }
        }

        let id = state.message_id();
        state.job_stream.ready.push_back(StoredMessage {
            id: id.clone(),
            payload: DeliveryPayload::start_job(job_id, owner_id),
            attempt: 0,
        });
        self.job_ready.notify_one();
        Ok(id)
    }

    async fn consume(&self, _consumer: &str) -> QueueResult<Option<Delivery>> {
        Ok(self.pull(false).await)
    }

    async fn consume_job_event(&self, _consumer: &str) -> QueueResult<Option<Delivery>> {
        Ok(self.pull(true).await)
    }

    async fn ack(&self, message_id: &MessageId) -> QueueResult<()> {
        Ok(CrawlSyncer::ack(self, message_id).await?)
    }

    async fn ack_job_event(&self, message_id: &MessageId) -> QueueResult<()> {
        self.state.lock().await.job_stream.resolve(message_id, true);
        Ok(())
    }

    async fn get_job(&self, owner_id: &OwnerId, job_id: &JobId) -> QueueResult<Option<CrawlJob>> {
        let state = self.state.lock().await;
        let Some(record) = state.jobs.get(job_id) else {
            return Ok(None);
        };
        if &record.owner_id != owner_id {
            return Ok(None);
        }

        let mut job = CrawlJob::new(*job_id, record.owner_id.clone());
        job.started = record.started;
        job.urls = record
            .members
            .iter()
            .filter_map(|id| state.urls.get(id))
            .map(|r| r.url.clone())
            .collect();
        Ok(Some(job))
    }

    async fn urls_by_status(
        &self,
        job_id: &JobId,
        status: CrawlUrlStatus,
    ) -> QueueResult<Vec<CrawlUrl>> {
        let state = self.state.lock().await;
        Ok(state
            .by_status
            .get(&(*job_id, status))
            .into_iter()
            .flatten()
            .filter_map(|id| state.urls.get(id))
            .map(|r| r.url.clone())
            .collect())
    }
}

#[async_trait]
impl CrawlSyncer for MemoryBroker {
    fn retry_ceiling(&self) -> u32 {
        self.retry_ceiling
    }

    async fn sync(&self, url: &CrawlUrl) -> SyncResult<SyncOutcome> {
        let outcome = self
            .state
            .lock()
            .await
            .write_state(url.url_id(), url.status, url.retries)?;
        if outcome == SyncOutcome::Written {
            self.record(TraceEvent::Synced {
                url_id: url.url_id().to_string(),
                status: url.status,
            });
        }
        Ok(outcome)
    }

    async fn ack(&self, message_id: &MessageId) -> SyncResult<()> {
        if self.state.lock().await.url_stream.resolve(message_id, false) {
            self.record(TraceEvent::Acked {
                message_id: message_id.clone(),
            });
        }
        Ok(())
    }

    async fn archive(&self, message_id: &MessageId) -> SyncResult<()> {
        if self.state.lock().await.url_stream.resolve(message_id, true) {
            self.record(TraceEvent::Archived {
                message_id: message_id.clone(),
            });
        }
        Ok(())
    }

    async fn report_error(
        &self,
        url: &CrawlUrl,
        message_id: &MessageId,
        error: &str,
    ) -> SyncResult<ErrorReport> {
        let mut state = self.state.lock().await;
        if state.is_complete(url.url_id())? {
            let retries = state.record_mut(url.url_id())?.url.retries;
            self.settle(&mut state, message_id);
            return Ok(ErrorReport::Settled { retries });
        }
        let record = state.record_mut(url.url_id())?;
        let retries = record.url.retries + 1;
        record.errors.push(error.to_string());
        state.write_state(url.url_id(), CrawlUrlStatus::Error, retries)?;
        self.record(TraceEvent::ErrorRecorded {
            url_id: url.url_id().to_string(),
            retries,
        });

        if retries >= self.retry_ceiling {
            if state.url_stream.resolve(message_id, true) {
                self.record(TraceEvent::Archived {
                    message_id: message_id.clone(),
                });
            }
            warn!(url_id = %url.url_id(), retries, "url dead-lettered");
            Ok(ErrorReport::DeadLettered { retries })
        } else {
            Ok(ErrorReport::Retry { retries })
        }
    }

    async fn replay(&self, url: &CrawlUrl, message_id: &MessageId) -> SyncResult<SyncOutcome> {
        let mut state = self.state.lock().await;
        let current = state.record_mut(url.url_id())?.url.clone();
        if current.status == CrawlUrlStatus::Complete {
            self.settle(&mut state, message_id);
            return Ok(SyncOutcome::Settled);
        }
        if state.url_stream.resolve(message_id, false) {
            self.record(TraceEvent::Acked {
                message_id: message_id.clone(),
            });
        }
        state.publish_url(&current, self.trace.as_ref());
        self.url_ready.notify_one();
        Ok(SyncOutcome::Written)
    }

    async fn enqueue(&self, url: &CrawlUrl) -> SyncResult<bool> {
        let mut state = self.state.lock().await;
        if !state.insert_url(url) {
            return Ok(false);
        }
        state.publish_url(url, self.trace.as_ref());
        self.url_ready.notify_one();
        Ok(true)
    }

    async fn complete(
        &self,
        url: &CrawlUrl,
        message_id: &MessageId,
        data: &Value,
    ) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        let retries = state.record_mut(url.url_id())?.url.retries;
        state.write_state(url.url_id(), CrawlUrlStatus::Complete, retries)?;
        state.record_mut(url.url_id())?.data = Some(data.clone());
        self.record(TraceEvent::Completed {
            url_id: url.url_id().to_string(),
        });
        if state.url_stream.resolve(message_id, true) {
            self.record(TraceEvent::Archived {
                message_id: message_id.clone(),
            });
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        url: &CrawlUrl,
        message_id: &MessageId,
        reason: &str,
    ) -> SyncResult<ErrorReport> {
        let mut state = self.state.lock().await;
        if state.is_complete(url.url_id())? {
            let retries = state.record_mut(url.url_id())?.url.retries;
            self.settle(&mut state, message_id);
            return Ok(ErrorReport::Settled { retries });
        }
        let record = state.record_mut(url.url_id())?;
        let retries = (record.url.retries + 1).max(self.retry_ceiling);
        record.errors.push(reason.to_string());
        state.write_state(url.url_id(), CrawlUrlStatus::Error, retries)?;
        self.record(TraceEvent::ErrorRecorded {
            url_id: url.url_id().to_string(),
            retries,
        });
        if state.url_stream.resolve(message_id, true) {
            self.record(TraceEvent::Archived {
                message_id: message_id.clone(),
            });
        }
        Ok(ErrorReport::DeadLettered { retries })
    }

    async fn fetch(&self, url_id: &str) -> SyncResult<Option<CrawlUrl>> {
        Ok(self
            .state
            .lock()
            .await
            .urls
            .get(url_id)
            .map(|r| r.url.clone()))
    }

    async fn errors(&self, url_id: &str) -> SyncResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .await
            .urls
            .get(url_id)
            .map(|r| r.errors.clone())
            .unwrap_or_default())
    }

    async fn activate_job(&self, event: &JobEvent, message_id: &MessageId) -> SyncResult<usize> {
        let mut state = self.state.lock().await;
        let members: Vec<String> = match state.jobs.get(&event.job_id) {
            Some(job) => job.members.iter().cloned().collect(),
            None => return Err(SyncPersistenceError::Missing(event.job_id.to_string())),
        };

        let mut published = 0;
        for url_id in members {
            let Some(record) = state.urls.get(&url_id) else {
                continue;
            };
            if record.url.status != CrawlUrlStatus::Error {
                continue;
            }
            state.write_state(&url_id, CrawlUrlStatus::Pending, 0)?;
            let url = state.record_mut(&url_id)?.url.clone();
            state.publish_url(&url, self.trace.as_ref());
            self.url_ready.notify_one();
            published += 1;
        }

        if let Some(job) = state.jobs.get_mut(&event.job_id) {
            job.started = true;
        }
        state.job_stream.resolve(message_id, true);
        debug!(job_id = %event.job_id, published, "job activated");
        Ok(published)
    }
}
