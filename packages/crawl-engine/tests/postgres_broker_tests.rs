//! Broker behaviour against PostgreSQL.
//!
//! Run with: cargo test --test postgres_broker_tests -- --ignored

mod common;

use crate::common::{fast_config, scenarios, PostgresHarness};
use test_context::test_context;

#[test_context(PostgresHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn test_submit_validates_and_dedupes(ctx: &mut PostgresHarness) {
    let broker = ctx.broker(&fast_config(3, 1)).await;
    scenarios::submit_validates_and_dedupes(&broker).await;
}

#[test_context(PostgresHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn test_retry_then_dead_letter_then_restart(ctx: &mut PostgresHarness) {
    let broker = ctx.broker(&fast_config(2, 1)).await;
    scenarios::retry_then_dead_letter_then_restart(&broker).await;
}

#[test_context(PostgresHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn test_complete_and_enqueue(ctx: &mut PostgresHarness) {
    let broker = ctx.broker(&fast_config(3, 1)).await;
    scenarios::complete_and_enqueue(&broker).await;
}

#[test_context(PostgresHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn test_worker_end_to_end(ctx: &mut PostgresHarness) {
    let config = fast_config(3, 2);
    let broker = ctx.broker(&config).await;
    scenarios::worker_end_to_end(&broker, &config).await;
}

#[test_context(PostgresHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn test_postgres_storage_upserts(ctx: &mut PostgresHarness) {
    use crawl_engine::{CrawlUrl, JobId, OwnerId, PostgresStorage, Storage, UrlPolicy};
    use serde_json::json;

    let storage = PostgresStorage::new(ctx.db_pool.clone()).await.unwrap();
    let job = JobId::new();
    let url = CrawlUrl::new(
        &common::product_url("B0931VRJT5"),
        job,
        OwnerId::new("u1"),
        &UrlPolicy::default(),
    )
    .unwrap();

    storage.append(&url, &json!({ "v": 1 })).await.unwrap();
    storage.append(&url, &json!({ "v": 2 })).await.unwrap();

    let data = storage.crawled_data(&job).await.unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["B0931VRJT5"]["v"], 2);
}
