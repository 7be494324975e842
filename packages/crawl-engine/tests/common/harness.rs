//! Shared containers for the Redis and Postgres backend tests.
//!
//! Containers start once per test binary. Each test context gets its own
//! Postgres database and its own Redis logical database so tests in the
//! same binary do not read each other's deliveries.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crawl_engine::{Broker, EngineConfig, PostgresBroker, RedisBroker};

struct SharedTestInfra {
    db_url: String,
    redis_url: String,
    _postgres: ContainerAsync<Postgres>,
    _redis: ContainerAsync<Redis>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

/// Redis ships 16 logical databases; hand them out in turn.
static NEXT_REDIS_DB: AtomicUsize = AtomicUsize::new(0);

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        super::init_tracing();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;
        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{}:{}", pg_host, pg_port);

        let redis = Redis::default()
            .start()
            .await
            .context("Failed to start Redis container")?;
        let redis_host = redis.get_host().await?;
        let redis_port = redis.get_host_port_ipv4(6379).await?;
        let redis_url = format!("redis://{}:{}", redis_host, redis_port);

        Ok(Self {
            db_url,
            redis_url,
            _postgres: postgres,
            _redis: redis,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Fresh Redis logical database per test.
pub struct RedisHarness {
    pub redis_url: String,
}

impl AsyncTestContext for RedisHarness {
    async fn setup() -> Self {
        let infra = SharedTestInfra::get().await;
        let db = NEXT_REDIS_DB.fetch_add(1, Ordering::SeqCst) % 16;
        Self {
            redis_url: format!("{}/{}", infra.redis_url, db),
        }
    }
}

impl RedisHarness {
    pub async fn broker(&self, config: &EngineConfig) -> Broker {
        let redis = RedisBroker::connect(&self.redis_url, config)
            .await
            .expect("Failed to connect redis broker");
        Broker::new(redis)
    }
}

/// Fresh Postgres database per test.
pub struct PostgresHarness {
    pub db_pool: PgPool,
}

impl AsyncTestContext for PostgresHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create postgres harness")
    }
}

impl PostgresHarness {
    async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;
        let admin = PgPool::connect(&format!("{}/postgres", infra.db_url))
            .await
            .context("Failed to connect to test database")?;

        let name = format!("crawl_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE DATABASE {name}"))
            .execute(&admin)
            .await
            .context("Failed to create test database")?;

        let db_pool = PgPool::connect(&format!("{}/{}", infra.db_url, name))
            .await
            .context("Failed to connect to fresh database")?;
        Ok(Self { db_pool })
    }

    pub async fn broker(&self, config: &EngineConfig) -> Broker {
        let postgres = PostgresBroker::from_pool(self.db_pool.clone(), config)
            .await
            .expect("Failed to create postgres broker");
        Broker::new(postgres)
    }
}
