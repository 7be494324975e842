//! Redis streams backend.
//!
//! # Layout
//!
//! - `crawl_url:{url_id}`: hash with `job_id owner_id url_id url status retries [data]`
//! - `crawl_url_errors:{url_id}`: list, the error log
//! - `crawl_job:{job_id}`: hash with `owner_id status created_at`
//! - `job_urls:{job_id}`: set of member `url_id`s
//! - `job_urls:{job_id}:{status}`: per-status index
//! - stream `crawl` (URL deliveries) and `crawl_jobs` (start events), both
//!   read by the `crawlers` group, each with a `{stream}:archive` stream
//!
//! Every multi-key write runs as one Lua script so it is atomic. A record
//! whose status is `complete` is never written again; scripts that would
//! move it archive the delivery and report it settled. Deliveries idle past
//! the visibility timeout are claimed back with `XCLAIM` before new entries
//! are read.
//!
//! The job activation script derives `crawl_url:*` and `job_urls:*:*` keys
//! from the member set instead of declaring them in `KEYS`, so this layout
//! assumes a single Redis node and is not cluster-safe.

use async_trait::async_trait;
use futures::future::try_join_all;
use lazy_static::lazy_static;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client, Script};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

use crate::config::{EngineConfig, StreamConfig};
use crate::error::{QueueError, QueueResult, SyncPersistenceError, SyncResult};
use crate::traits::queue::Queue;
use crate::traits::syncer::{CrawlSyncer, ErrorReport, SyncOutcome};
use crate::types::envelope::{Delivery, DeliveryPayload, JobEvent, MessageId};
use crate::types::job::{CrawlJob, JobId, OwnerId, SubmittedJob};
use crate::types::status::CrawlUrlStatus;
use crate::types::url::{CrawlUrl, UrlPolicy};

pub const URL_STREAM: &str = "crawl";
pub const JOB_STREAM: &str = "crawl_jobs";
pub const GROUP: &str = "crawlers";

/// Pending entries inspected per reclaim pass.
const RECLAIM_SCAN: usize = 10;

fn url_key(url_id: &str) -> String {
    format!("crawl_url:{url_id}")
}

fn errors_key(url_id: &str) -> String {
    format!("crawl_url_errors:{url_id}")
}

fn job_key(job_id: &JobId) -> String {
    format!("crawl_job:{job_id}")
}

fn job_urls_key(job_id: &JobId) -> String {
    format!("job_urls:{job_id}")
}

fn status_key(job_id: &JobId, status: CrawlUrlStatus) -> String {
    format!("job_urls:{job_id}:{}", status.as_str())
}

fn archive_key(stream: &str) -> String {
    format!("{stream}:archive")
}

/// Shared Lua helpers. Per-URL scripts take KEYS in the order built by
/// [`url_keys`]: hash, errors, stream, archive, the four status sets in
/// `CrawlUrlStatus::ALL` order, then the job member set.
const PRELUDE: &str = r"
local STATUSES = {'pending', 'running', 'complete', 'error'}

local function move_status(url_id, status)
    for i, s in ipairs(STATUSES) do
        if s == status then
            redis.call('SADD', KEYS[4 + i], url_id)
        else
            redis.call('SREM', KEYS[4 + i], url_id)
        end
    end
end

local function settled()
    return redis.call('HGET', KEYS[1], 'status') == 'complete'
end

local function archive(stream, archive_stream, group, id)
    local entries = redis.call('XRANGE', stream, id, id)
    redis.call('XACK', stream, group, id)
    if #entries > 0 then
        redis.call('XADD', archive_stream, '*', unpack(entries[1][2]))
        redis.call('XDEL', stream, id)
    end
end
";

const SYNC: &str = r"
-- ARGV: url_id, status, retries
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
if settled() and ARGV[2] ~= 'complete' then
    return 2
end
redis.call('HSET', KEYS[1], 'status', ARGV[2], 'retries', ARGV[3])
move_status(ARGV[1], ARGV[2])
return 1
";

const REPORT_ERROR: &str = r"
-- ARGV: group, message_id, error, ceiling, url_id
if redis.call('EXISTS', KEYS[1]) == 0 then
    return {-1, 0}
end
if settled() then
    archive(KEYS[3], KEYS[4], ARGV[1], ARGV[2])
    return {tonumber(redis.call('HGET', KEYS[1], 'retries') or '0'), 2}
end
local retries = redis.call('HINCRBY', KEYS[1], 'retries', 1)
redis.call('HSET', KEYS[1], 'status', 'error')
redis.call('RPUSH', KEYS[2], ARGV[3])
move_status(ARGV[5], 'error')
if retries >= tonumber(ARGV[4]) then
    archive(KEYS[3], KEYS[4], ARGV[1], ARGV[2])
    return {retries, 1}
end
return {retries, 0}
";

const DEAD_LETTER: &str = r"
-- ARGV: group, message_id, reason, ceiling, url_id
if redis.call('EXISTS', KEYS[1]) == 0 then
    return {-1, 0}
end
if settled() then
    archive(KEYS[3], KEYS[4], ARGV[1], ARGV[2])
    return {tonumber(redis.call('HGET', KEYS[1], 'retries') or '0'), 2}
end
local retries = tonumber(redis.call('HGET', KEYS[1], 'retries') or '0') + 1
local ceiling = tonumber(ARGV[4])
if retries < ceiling then
    retries = ceiling
end
redis.call('HSET', KEYS[1], 'status', 'error', 'retries', retries)
redis.call('RPUSH', KEYS[2], ARGV[3])
move_status(ARGV[5], 'error')
archive(KEYS[3], KEYS[4], ARGV[1], ARGV[2])
return {retries, 1}
";

const REPLAY: &str = r"
-- ARGV: group, message_id, field/value pairs
if settled() then
    archive(KEYS[3], KEYS[4], ARGV[1], ARGV[2])
    return {0, ''}
end
redis.call('XACK', KEYS[3], ARGV[1], ARGV[2])
redis.call('XDEL', KEYS[3], ARGV[2])
local fields = {}
for i = 3, #ARGV do
    fields[#fields + 1] = ARGV[i]
end
return {1, redis.call('XADD', KEYS[3], '*', unpack(fields))}
";

const ENQUEUE: &str = r"
-- ARGV: url_id, status, field/value pairs
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
local hash = {}
local entry = {}
for i = 3, #ARGV, 2 do
    if ARGV[i] ~= 'event' then
        hash[#hash + 1] = ARGV[i]
        hash[#hash + 1] = ARGV[i + 1]
    end
    entry[#entry + 1] = ARGV[i]
    entry[#entry + 1] = ARGV[i + 1]
end
redis.call('HSET', KEYS[1], unpack(hash))
redis.call('SADD', KEYS[9], ARGV[1])
move_status(ARGV[1], ARGV[2])
redis.call('XADD', KEYS[3], '*', unpack(entry))
return 1
";

const COMPLETE: &str = r"
-- ARGV: group, message_id, url_id, data
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], 'status', 'complete', 'data', ARGV[4])
move_status(ARGV[3], 'complete')
archive(KEYS[3], KEYS[4], ARGV[1], ARGV[2])
return 1
";

const ARCHIVE: &str = r"
-- KEYS: stream, archive. ARGV: group, message_id
archive(KEYS[1], KEYS[2], ARGV[1], ARGV[2])
return 1
";

/// Member keys are derived inside the script from the job's member set,
/// which keeps it off Redis Cluster.
const ACTIVATE: &str = r"
-- KEYS: job hash, job set, url stream, job stream, job archive
-- ARGV: group, message_id, job_id
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end
local prefix = 'job_urls:' .. ARGV[3] .. ':'
local published = 0
for _, url_id in ipairs(redis.call('SMEMBERS', KEYS[2])) do
    local key = 'crawl_url:' .. url_id
    local status = redis.call('HGET', key, 'status')
    if status == 'error' then
        redis.call('HSET', key, 'status', 'pending', 'retries', '0')
        redis.call('SREM', prefix .. 'error', url_id)
        redis.call('SADD', prefix .. 'pending', url_id)
        local fields = redis.call('HGETALL', key)
        redis.call('XADD', KEYS[3], '*', 'event', 'new_url', unpack(fields))
        published = published + 1
    end
end
redis.call('HSET', KEYS[1], 'status', 'running')
archive(KEYS[4], KEYS[5], ARGV[1], ARGV[2])
return published
";

lazy_static! {
    static ref SYNC_SCRIPT: Script = Script::new(&format!("{PRELUDE}{SYNC}"));
    static ref REPORT_ERROR_SCRIPT: Script = Script::new(&format!("{PRELUDE}{REPORT_ERROR}"));
    static ref DEAD_LETTER_SCRIPT: Script = Script::new(&format!("{PRELUDE}{DEAD_LETTER}"));
    static ref REPLAY_SCRIPT: Script = Script::new(&format!("{PRELUDE}{REPLAY}"));
    static ref ENQUEUE_SCRIPT: Script = Script::new(&format!("{PRELUDE}{ENQUEUE}"));
    static ref COMPLETE_SCRIPT: Script = Script::new(&format!("{PRELUDE}{COMPLETE}"));
    static ref ARCHIVE_SCRIPT: Script = Script::new(&format!("{PRELUDE}{ARCHIVE}"));
    static ref ACTIVATE_SCRIPT: Script = Script::new(&format!("{PRELUDE}{ACTIVATE}"));
}

/// KEYS for per-URL scripts.
fn url_keys(url: &CrawlUrl) -> Vec<String> {
    let mut keys = vec![
        url_key(url.url_id()),
        errors_key(url.url_id()),
        URL_STREAM.to_string(),
        archive_key(URL_STREAM),
    ];
    keys.extend(
        CrawlUrlStatus::ALL
            .iter()
            .map(|s| status_key(url.job_id(), *s)),
    );
    keys.push(job_urls_key(url.job_id()));
    keys
}

fn payload_args(payload: &DeliveryPayload) -> Vec<String> {
    payload
        .iter()
        .flat_map(|(k, v)| [k.clone(), v.clone()])
        .collect()
}

fn to_delivery(entry: StreamId, attempt: u32) -> Delivery {
    let payload = entry
        .map
        .iter()
        .filter_map(|(k, v)| {
            redis::from_redis_value::<String>(v)
                .ok()
                .map(|v| (k.clone(), v))
        })
        .collect();
    Delivery {
        message_id: MessageId::new(entry.id),
        payload,
        attempt,
    }
}

fn restore(key: &str, fields: &HashMap<String, String>) -> SyncResult<CrawlUrl> {
    let corrupt = |source| SyncPersistenceError::Corrupt {
        key: key.to_string(),
        source,
    };
    let field = |name: &'static str| {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or(crate::error::DecodeError::MissingField(name))
    };

    let decode = || -> Result<CrawlUrl, crate::error::DecodeError> {
        let retries = field("retries")?;
        CrawlUrl::restore(
            field("url")?,
            field("job_id")?.parse()?,
            OwnerId::new(field("owner_id")?),
            field("url_id")?,
            field("status")?.parse()?,
            retries
                .parse()
                .map_err(|_| crate::error::DecodeError::InvalidNumber {
                    field: "retries",
                    value: retries.to_string(),
                })?,
        )
    };
    decode().map_err(corrupt)
}

/// Queue and syncer over Redis streams.
pub struct RedisBroker {
    client: Client,
    conn: MultiplexedConnection,
    url_stream: StreamConfig,
    job_stream: StreamConfig,
    retry_ceiling: u32,
    policy: UrlPolicy,
}

impl RedisBroker {
    /// Connect and create both consumer groups if they are missing.
    ///
    /// # Example URL
    /// `redis://localhost:6379`
    pub async fn connect(redis_url: &str, config: &EngineConfig) -> SyncResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let broker = Self {
            client,
            conn,
            url_stream: config.url_stream.clone(),
            job_stream: config.job_stream.clone(),
            retry_ceiling: config.retry_ceiling,
            policy: config.policy.clone(),
        };
        broker.ensure_group(URL_STREAM).await?;
        broker.ensure_group(JOB_STREAM).await?;
        info!(url = %redis_url, "redis broker connected");
        Ok(broker)
    }

    async fn ensure_group(&self, stream: &str) -> SyncResult<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(stream, GROUP, "0").await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim one delivery idle past the visibility timeout, if any.
    async fn reclaim(
        &self,
        stream: &str,
        config: &StreamConfig,
        consumer: &str,
    ) -> SyncResult<Option<Delivery>> {
        let mut conn = self.conn.clone();
        let min_idle = config.visibility_timeout.as_millis() as usize;
        let pending: StreamPendingCountReply = conn
            .xpending_count(stream, GROUP, "-", "+", RECLAIM_SCAN)
            .await?;

        for entry in pending.ids {
            if entry.last_delivered_ms < min_idle {
                continue;
            }
            let claimed: StreamClaimReply = conn
                .xclaim(stream, GROUP, consumer, min_idle, &[entry.id.as_str()])
                .await?;
            if let Some(id) = claimed.ids.into_iter().next() {
                debug!(stream, message_id = %id.id, times_delivered = entry.times_delivered, "reclaimed idle delivery");
                return Ok(Some(to_delivery(id, entry.times_delivered as u32 + 1)));
            }
        }
        Ok(None)
    }

    async fn read(
        &self,
        stream: &str,
        config: &StreamConfig,
        consumer: &str,
    ) -> SyncResult<Option<Delivery>> {
        if let Some(delivery) = self.reclaim(stream, config, consumer).await? {
            return Ok(Some(delivery));
        }

        // Blocking reads get their own connection so they do not stall
        // commands multiplexed on the shared one.
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let options = StreamReadOptions::default()
            .group(GROUP, consumer)
            .count(1)
            .block(config.max_poll.as_millis() as usize);
        let reply: Option<StreamReadReply> =
            conn.xread_options(&[stream], &[">"], &options).await?;

        Ok(reply
            .and_then(|r| r.keys.into_iter().flat_map(|k| k.ids).next())
            .map(|entry| to_delivery(entry, 1)))
    }

    async fn archive_on(&self, stream: &str, message_id: &MessageId) -> SyncResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = ARCHIVE_SCRIPT
            .key(stream)
            .key(archive_key(stream))
            .arg(GROUP)
            .arg(message_id.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn members(&self, key: &str) -> SyncResult<Vec<CrawlUrl>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn.smembers(key).await?;
        ids.sort();
        // Reads pipeline over the multiplexed connection.
        let urls = try_join_all(ids.iter().map(|id| self.fetch(id))).await?;
        Ok(urls.into_iter().flatten().collect())
    }
}

#[async_trait]
impl Queue for RedisBroker {
    #[instrument(skip(self, owner_id, urls), fields(owner_id = %owner_id, count = urls.len()))]
    async fn submit_job(&self, owner_id: &OwnerId, urls: &[String]) -> QueueResult<SubmittedJob> {
        if urls.is_empty() {
            return Err(QueueError::EmptyJob);
        }

        let job_id = JobId::new();
        let mut conn = self.conn.clone();
        let created_at = chrono::Utc::now().to_rfc3339();
        let _: () = conn
            .hset_multiple(
                job_key(&job_id),
                &[
                    ("owner_id", owner_id.as_str()),
                    ("status", "pending"),
                    ("created_at", created_at.as_str()),
                ],
            )
            .await?;

        let mut job = CrawlJob::new(job_id, owner_id.clone());
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();
        for raw in urls {
            match CrawlUrl::new(raw, job_id, owner_id.clone(), &self.policy) {
                Ok(url) => {
                    if seen.insert(url.url_id().to_string()) {
                        self.enqueue(&url).await?;
                        job.urls.insert(url);
                    }
                }
                Err(e) => {
                    debug!(job_id = %job_id, error = %e, "rejected url");
                    rejected.push(e);
                }
            }
        }

        info!(job_id = %job_id, accepted = job.urls.len(), rejected = rejected.len(), "job submitted");
        Ok(SubmittedJob { job, rejected })
    }

    async fn start_job(&self, owner_id: &OwnerId, job_id: &JobId) -> QueueResult<MessageId> {
        let mut conn = self.conn.clone();
        let owner: Option<String> = conn.hget(job_key(job_id), "owner_id").await?;
        if owner.as_deref() != Some(owner_id.as_str()) {
            return Err(QueueError::JobNotFound {
                job_id: job_id.to_string(),
            });
        }

        let fields: Vec<(String, String)> = DeliveryPayload::start_job(job_id, owner_id)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let id: String = conn.xadd(JOB_STREAM, "*", &fields).await?;
        Ok(MessageId::new(id))
    }

    async fn consume(&self, consumer: &str) -> QueueResult<Option<Delivery>> {
        Ok(self.read(URL_STREAM, &self.url_stream, consumer).await?)
    }

    async fn consume_job_event(&self, consumer: &str) -> QueueResult<Option<Delivery>> {
        Ok(self.read(JOB_STREAM, &self.job_stream, consumer).await?)
    }

    async fn ack(&self, message_id: &MessageId) -> QueueResult<()> {
        Ok(CrawlSyncer::ack(self, message_id).await?)
    }

    async fn ack_job_event(&self, message_id: &MessageId) -> QueueResult<()> {
        Ok(self.archive_on(JOB_STREAM, message_id).await?)
    }

    async fn get_job(&self, owner_id: &OwnerId, job_id: &JobId) -> QueueResult<Option<CrawlJob>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(job_key(job_id)).await?;
        if fields.get("owner_id").map(String::as_str) != Some(owner_id.as_str()) {
            return Ok(None);
        }

        let mut job = CrawlJob::new(*job_id, owner_id.clone());
        job.started = fields.get("status").map(String::as_str) == Some("running");
        job.urls = self
            .members(&job_urls_key(job_id))
            .await?
            .into_iter()
            .collect();
        Ok(Some(job))
    }

    async fn urls_by_status(
        &self,
        job_id: &JobId,
        status: CrawlUrlStatus,
    ) -> QueueResult<Vec<CrawlUrl>> {
        Ok(self.members(&status_key(job_id, status)).await?)
    }
}

#[async_trait]
impl CrawlSyncer for RedisBroker {
    fn retry_ceiling(&self) -> u32 {
        self.retry_ceiling
    }

    #[instrument(skip(self, url), fields(url_id = %url.url_id(), status = %url.status))]
    async fn sync(&self, url: &CrawlUrl) -> SyncResult<SyncOutcome> {
        let mut conn = self.conn.clone();
        let mut invocation = SYNC_SCRIPT.prepare_invoke();
        for key in url_keys(url) {
            invocation.key(key);
        }
        let written: i64 = invocation
            .arg(url.url_id())
            .arg(url.status.as_str())
            .arg(url.retries)
            .invoke_async(&mut conn)
            .await?;
        match written {
            0 => Err(SyncPersistenceError::Missing(url.url_id().to_string())),
            2 => Ok(SyncOutcome::Settled),
            _ => Ok(SyncOutcome::Written),
        }
    }

    async fn ack(&self, message_id: &MessageId) -> SyncResult<()> {
        self.archive_on(URL_STREAM, message_id).await
    }

    async fn archive(&self, message_id: &MessageId) -> SyncResult<()> {
        self.archive_on(URL_STREAM, message_id).await
    }

    #[instrument(skip(self, url, error), fields(url_id = %url.url_id()))]
    async fn report_error(
        &self,
        url: &CrawlUrl,
        message_id: &MessageId,
        error: &str,
    ) -> SyncResult<ErrorReport> {
        let mut conn = self.conn.clone();
        let mut invocation = REPORT_ERROR_SCRIPT.prepare_invoke();
        for key in url_keys(url) {
            invocation.key(key);
        }
        let (retries, outcome): (i64, i64) = invocation
            .arg(GROUP)
            .arg(message_id.as_str())
            .arg(error)
            .arg(self.retry_ceiling)
            .arg(url.url_id())
            .invoke_async(&mut conn)
            .await?;

        if retries < 0 {
            return Err(SyncPersistenceError::Missing(url.url_id().to_string()));
        }
        let retries = retries as u32;
        match outcome {
            1 => {
                warn!(retries, "url dead-lettered");
                Ok(ErrorReport::DeadLettered { retries })
            }
            2 => Ok(ErrorReport::Settled { retries }),
            _ => Ok(ErrorReport::Retry { retries }),
        }
    }

    async fn replay(&self, url: &CrawlUrl, message_id: &MessageId) -> SyncResult<SyncOutcome> {
        let mut conn = self.conn.clone();
        let mut invocation = REPLAY_SCRIPT.prepare_invoke();
        for key in url_keys(url) {
            invocation.key(key);
        }
        invocation.arg(GROUP).arg(message_id.as_str());
        for arg in payload_args(&DeliveryPayload::new_url(url)) {
            invocation.arg(arg);
        }
        let (published, id): (i64, String) = invocation.invoke_async(&mut conn).await?;
        if published == 0 {
            return Ok(SyncOutcome::Settled);
        }
        debug!(url_id = %url.url_id(), message_id = %id, "url replayed");
        Ok(SyncOutcome::Written)
    }

    async fn enqueue(&self, url: &CrawlUrl) -> SyncResult<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = ENQUEUE_SCRIPT.prepare_invoke();
        for key in url_keys(url) {
            invocation.key(key);
        }
        invocation.arg(url.url_id()).arg(url.status.as_str());
        for arg in payload_args(&DeliveryPayload::new_url(url)) {
            invocation.arg(arg);
        }
        let created: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(created == 1)
    }

    #[instrument(skip(self, url, data), fields(url_id = %url.url_id()))]
    async fn complete(
        &self,
        url: &CrawlUrl,
        message_id: &MessageId,
        data: &Value,
    ) -> SyncResult<()> {
        let mut conn = self.conn.clone();
        let mut invocation = COMPLETE_SCRIPT.prepare_invoke();
        for key in url_keys(url) {
            invocation.key(key);
        }
        let found: i64 = invocation
            .arg(GROUP)
            .arg(message_id.as_str())
            .arg(url.url_id())
            .arg(serde_json::to_string(data)?)
            .invoke_async(&mut conn)
            .await?;
        if found == 0 {
            return Err(SyncPersistenceError::Missing(url.url_id().to_string()));
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        url: &CrawlUrl,
        message_id: &MessageId,
        reason: &str,
    ) -> SyncResult<ErrorReport> {
        let mut conn = self.conn.clone();
        let mut invocation = DEAD_LETTER_SCRIPT.prepare_invoke();
        for key in url_keys(url) {
            invocation.key(key);
        }
        let (retries, outcome): (i64, i64) = invocation
            .arg(GROUP)
            .arg(message_id.as_str())
            .arg(reason)
            .arg(self.retry_ceiling)
            .arg(url.url_id())
            .invoke_async(&mut conn)
            .await?;
        if retries < 0 {
            return Err(SyncPersistenceError::Missing(url.url_id().to_string()));
        }
        let retries = retries as u32;
        if outcome == 2 {
            Ok(ErrorReport::Settled { retries })
        } else {
            Ok(ErrorReport::DeadLettered { retries })
        }
    }

    async fn fetch(&self, url_id: &str) -> SyncResult<Option<CrawlUrl>> {
        let mut conn = self.conn.clone();
        let key = url_key(url_id);
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        restore(&key, &fields).map(Some)
    }

    async fn errors(&self, url_id: &str) -> SyncResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(errors_key(url_id), 0, -1).await?)
    }

    #[instrument(skip(self, event), fields(job_id = %event.job_id))]
    async fn activate_job(&self, event: &JobEvent, message_id: &MessageId) -> SyncResult<usize> {
        let mut conn = self.conn.clone();
        let published: i64 = ACTIVATE_SCRIPT
            .key(job_key(&event.job_id))
            .key(job_urls_key(&event.job_id))
            .key(URL_STREAM)
            .key(JOB_STREAM)
            .key(archive_key(JOB_STREAM))
            .arg(GROUP)
            .arg(message_id.as_str())
            .arg(event.job_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        if published < 0 {
            return Err(SyncPersistenceError::Missing(event.job_id.to_string()));
        }
        Ok(published as usize)
    }
}
