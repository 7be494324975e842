//! Engine configuration.
//!
//! Defaults match a single-worker deployment: one crawl task, three
//! attempts per URL, six second visibility on URL deliveries and ten on
//! job events.

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::types::url::UrlPolicy;

/// Timing for one delivery stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// How long a delivery stays invisible after being handed out
    pub visibility_timeout: Duration,
    /// Longest a single consume call waits for work
    pub max_poll: Duration,
    /// Sleep between empty reads while polling
    pub poll_interval: Duration,
}

impl StreamConfig {
    pub fn urls() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(6),
            max_poll: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1000),
        }
    }

    pub fn jobs() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(10),
            ..Self::urls()
        }
    }
}

/// Which broker substrate backs the queue and syncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Redis { url: String },
    Postgres { url: String },
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis { .. } => "redis",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend: Backend,
    pub retry_ceiling: u32,
    pub max_crawl_tasks: usize,
    pub consumer_name: String,
    pub url_stream: StreamConfig,
    pub job_stream: StreamConfig,
    pub policy: UrlPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            retry_ceiling: 3,
            max_crawl_tasks: 1,
            consumer_name: format!("crawler-{}", Uuid::new_v4()),
            url_stream: StreamConfig::urls(),
            job_stream: StreamConfig::jobs(),
            policy: UrlPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_retry_ceiling(mut self, retry_ceiling: u32) -> Self {
        self.retry_ceiling = retry_ceiling;
        self
    }

    pub fn with_max_crawl_tasks(mut self, max_crawl_tasks: usize) -> Self {
        self.max_crawl_tasks = max_crawl_tasks;
        self
    }

    pub fn with_consumer_name(mut self, consumer_name: impl Into<String>) -> Self {
        self.consumer_name = consumer_name.into();
        self
    }

    pub fn with_policy(mut self, policy: UrlPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply `f` to both stream configs. Handy for shortening timeouts in tests.
    pub fn with_streams(mut self, f: impl Fn(&mut StreamConfig)) -> Self {
        f(&mut self.url_stream);
        f(&mut self.job_stream);
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = Self::default();

        let backend = match env::var("CRAWLER_BACKEND")
            .unwrap_or_else(|_| "redis".to_string())
            .as_str()
        {
            "memory" => Backend::Memory,
            "redis" => Backend::Redis {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            "postgres" => Backend::Postgres {
                url: env::var("DATABASE_URL")
                    .context("DATABASE_URL must be set for the postgres backend")?,
            },
            other => bail!("CRAWLER_BACKEND must be memory, redis or postgres, got {other}"),
        };

        let mut policy = defaults.policy.clone();
        if let Some(hosts) = list_var("CRAWLER_ALLOWED_HOSTS") {
            policy = policy.with_hosts(hosts);
        }
        if let Some(schemes) = list_var("CRAWLER_ALLOWED_SCHEMES") {
            policy = policy.with_schemes(schemes);
        }

        let retry_ceiling = parsed_var("CRAWLER_RETRY_CEILING", defaults.retry_ceiling)?;
        if retry_ceiling == 0 {
            bail!("CRAWLER_RETRY_CEILING must be at least 1");
        }

        Ok(Self {
            backend,
            retry_ceiling,
            max_crawl_tasks: parsed_var("CRAWLER_MAX_CRAWL_TASKS", defaults.max_crawl_tasks)?,
            consumer_name: env::var("CRAWLER_CONSUMER_NAME").unwrap_or(defaults.consumer_name),
            url_stream: stream_from_env("CRAWLER_URL", StreamConfig::urls())?,
            job_stream: stream_from_env("CRAWLER_JOB", StreamConfig::jobs())?,
            policy,
        })
    }
}

fn stream_from_env(prefix: &str, defaults: StreamConfig) -> Result<StreamConfig> {
    Ok(StreamConfig {
        visibility_timeout: Duration::from_secs(parsed_var(
            &format!("{prefix}_VT"),
            defaults.visibility_timeout.as_secs(),
        )?),
        max_poll: Duration::from_secs(parsed_var(
            &format!("{prefix}_MAX_POLL_SECONDS"),
            defaults.max_poll.as_secs(),
        )?),
        poll_interval: Duration::from_millis(parsed_var(
            &format!("{prefix}_POLL_INTERVAL_MS"),
            defaults.poll_interval.as_millis() as u64,
        )?),
    })
}

fn parsed_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        Err(_) => Ok(default),
    }
}

fn list_var(key: &str) -> Option<Vec<String>> {
    let value = env::var(key).ok()?;
    let items: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.retry_ceiling, 3);
        assert_eq!(config.max_crawl_tasks, 1);
        assert_eq!(config.url_stream.visibility_timeout, Duration::from_secs(6));
        assert_eq!(config.job_stream.visibility_timeout, Duration::from_secs(10));
        assert_eq!(config.job_stream.max_poll, Duration::from_secs(5));
        assert_eq!(config.url_stream.poll_interval, Duration::from_millis(1000));
        assert!(config.consumer_name.starts_with("crawler-"));
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_max_crawl_tasks(5)
            .with_consumer_name("c1")
            .with_streams(|s| s.max_poll = Duration::from_millis(50));
        assert_eq!(config.max_crawl_tasks, 5);
        assert_eq!(config.consumer_name, "c1");
        assert_eq!(config.url_stream.max_poll, Duration::from_millis(50));
        assert_eq!(config.job_stream.max_poll, Duration::from_millis(50));
    }
}
