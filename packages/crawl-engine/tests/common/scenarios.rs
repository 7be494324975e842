//! Behaviour every broker must share. Each backend's test file runs these
//! against its own broker.

use serde_json::json;
use std::sync::Arc;

use crawl_engine::testing::{ExtractorScript, MemoryStorage, Outcome};
use crawl_engine::{
    Broker, CrawlUrl, CrawlUrlStatus, EngineConfig, ErrorReport, JobId, OwnerId, QueueError,
    Storage, SyncOutcome, UrlPolicy,
};

use super::{product_url, spawn_scripted, wait_for_job};

pub async fn submit_validates_and_dedupes(broker: &Broker) {
    let owner = OwnerId::new("u1");
    let submitted = broker
        .queue
        .submit_job(
            &owner,
            &[
                product_url("B0931VRJT5"),
                product_url("B0931VRJT5"),
                product_url("B0931VRJT6"),
                "https://example.com/dp/B0931VRJT7".to_string(),
            ],
        )
        .await
        .unwrap();
    let job_id = submitted.job.job_id;

    assert_eq!(submitted.job.urls.len(), 2);
    assert_eq!(submitted.rejected.len(), 1);

    let pending = broker
        .queue
        .urls_by_status(&job_id, CrawlUrlStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);

    let delivery = broker.queue.consume("c1").await.unwrap().expect("delivery");
    assert_eq!(delivery.attempt, 1);
    let url = delivery
        .payload
        .decode_crawl_url(&UrlPolicy::default())
        .unwrap();
    assert!(submitted.job.get(url.url_id()).is_some());

    let job = broker.queue.get_job(&owner, &job_id).await.unwrap().unwrap();
    assert_eq!(job.urls.len(), 2);
    assert!(!job.started);
    assert!(broker
        .queue
        .get_job(&OwnerId::new("someone-else"), &job_id)
        .await
        .unwrap()
        .is_none());

    let empty = broker.queue.submit_job(&owner, &[]).await;
    assert!(matches!(empty, Err(QueueError::EmptyJob)));
}

async fn running(broker: &Broker, url_id: &str) -> CrawlUrl {
    let mut url = broker.syncer.fetch(url_id).await.unwrap().expect("record");
    url.status = CrawlUrlStatus::Running;
    broker.syncer.sync(&url).await.unwrap();
    url
}

/// Needs a broker built with a retry ceiling of 2.
pub async fn retry_then_dead_letter_then_restart(broker: &Broker) {
    assert_eq!(broker.syncer.retry_ceiling(), 2);
    let owner = OwnerId::new("u1");
    let submitted = broker
        .queue
        .submit_job(&owner, &[product_url("B0931VRJT5")])
        .await
        .unwrap();
    let job_id = submitted.job.job_id;
    let url_id = format!("{job_id}:B0931VRJT5");

    let first = broker.queue.consume("c1").await.unwrap().expect("first delivery");
    let mut url = running(broker, &url_id).await;
    let report = broker
        .syncer
        .report_error(&url, &first.message_id, "timeout")
        .await
        .unwrap();
    assert_eq!(report, ErrorReport::Retry { retries: 1 });
    url.retries = report.retries();
    url.status = CrawlUrlStatus::Error;
    assert_eq!(
        broker.syncer.replay(&url, &first.message_id).await.unwrap(),
        SyncOutcome::Written
    );

    let second = broker.queue.consume("c1").await.unwrap().expect("replayed delivery");
    assert_ne!(second.message_id, first.message_id);
    let url = running(broker, &url_id).await;
    let report = broker
        .syncer
        .report_error(&url, &second.message_id, "captcha")
        .await
        .unwrap();
    assert_eq!(report, ErrorReport::DeadLettered { retries: 2 });

    let stored = broker.syncer.fetch(&url_id).await.unwrap().unwrap();
    assert_eq!(stored.status, CrawlUrlStatus::Error);
    assert_eq!(stored.retries, 2);
    assert_eq!(
        broker.syncer.errors(&url_id).await.unwrap(),
        vec!["timeout".to_string(), "captcha".to_string()]
    );
    assert!(broker.queue.consume("c1").await.unwrap().is_none());

    let job = broker.queue.get_job(&owner, &job_id).await.unwrap().unwrap();
    assert!(job.urls.iter().all(|u| u.is_terminal(2)));

    // Restarting resets the exhausted URL and publishes it again.
    assert!(matches!(
        broker.queue.start_job(&OwnerId::new("someone-else"), &job_id).await,
        Err(QueueError::JobNotFound { .. })
    ));
    broker.queue.start_job(&owner, &job_id).await.unwrap();
    let event_delivery = broker
        .queue
        .consume_job_event("c1")
        .await
        .unwrap()
        .expect("job event");
    let event = event_delivery.payload.decode_job_event().unwrap();
    assert_eq!(event.job_id, job_id);
    let published = broker
        .syncer
        .activate_job(&event, &event_delivery.message_id)
        .await
        .unwrap();
    assert_eq!(published, 1);

    let reset = broker.syncer.fetch(&url_id).await.unwrap().unwrap();
    assert_eq!(reset.status, CrawlUrlStatus::Pending);
    assert_eq!(reset.retries, 0);
    assert!(broker.queue.consume("c1").await.unwrap().is_some());
    assert!(broker.queue.get_job(&owner, &job_id).await.unwrap().unwrap().started);
}

pub async fn complete_and_enqueue(broker: &Broker) {
    let owner = OwnerId::new("u1");
    let submitted = broker
        .queue
        .submit_job(&owner, &[product_url("B0931VRJT5")])
        .await
        .unwrap();
    let job_id = submitted.job.job_id;
    let url_id = format!("{job_id}:B0931VRJT5");

    let delivery = broker.queue.consume("c1").await.unwrap().expect("delivery");
    let mut url = running(broker, &url_id).await;
    url.status = CrawlUrlStatus::Complete;
    broker
        .syncer
        .complete(&url, &delivery.message_id, &json!({ "asin": "B0931VRJT5" }))
        .await
        .unwrap();
    let stored = broker.syncer.fetch(&url_id).await.unwrap().unwrap();
    assert_eq!(stored.status, CrawlUrlStatus::Complete);

    // A stale copy of the delivery cannot move the record off complete.
    let mut stale = stored.clone();
    stale.status = CrawlUrlStatus::Running;
    assert_eq!(broker.syncer.sync(&stale).await.unwrap(), SyncOutcome::Settled);
    assert_eq!(
        broker
            .syncer
            .report_error(&stale, &delivery.message_id, "timeout")
            .await
            .unwrap(),
        ErrorReport::Settled { retries: 0 }
    );
    assert_eq!(
        broker
            .syncer
            .dead_letter(&stale, &delivery.message_id, "poison")
            .await
            .unwrap(),
        ErrorReport::Settled { retries: 0 }
    );
    assert_eq!(
        broker.syncer.replay(&stale, &delivery.message_id).await.unwrap(),
        SyncOutcome::Settled
    );
    let stored = broker.syncer.fetch(&url_id).await.unwrap().unwrap();
    assert_eq!(stored.status, CrawlUrlStatus::Complete);
    assert!(broker.syncer.errors(&url_id).await.unwrap().is_empty());

    let discovered = CrawlUrl::new(
        &product_url("B0931VRJT6"),
        job_id,
        owner.clone(),
        &UrlPolicy::default(),
    )
    .unwrap();
    assert!(broker.syncer.enqueue(&discovered).await.unwrap());
    assert!(!broker.syncer.enqueue(&discovered).await.unwrap());

    let next = broker.queue.consume("c1").await.unwrap().expect("discovered delivery");
    let decoded = next.payload.decode_crawl_url(&UrlPolicy::default()).unwrap();
    assert_eq!(decoded.url_id(), discovered.url_id());

    let completed = broker
        .queue
        .urls_by_status(&job_id, CrawlUrlStatus::Complete)
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert!(broker.syncer.fetch("nope:B0931VRJT5").await.unwrap().is_none());
}

/// A worker crawls a product, follows the URL it discovers, and stores both.
pub async fn worker_end_to_end(broker: &Broker, config: &EngineConfig) {
    let storage = Arc::new(MemoryStorage::new());
    let script = ExtractorScript::new().with_outcome(
        "B0931VRJT5",
        Outcome::Discover(vec![
            product_url("B0931VRJT6"),
            product_url("B0931VRJT6"),
            "https://www.amazon.com/gp/help".to_string(),
        ]),
    );
    let handle = spawn_scripted(broker, storage.clone(), config, &script);

    let owner = OwnerId::new("u1");
    let submitted = broker
        .queue
        .submit_job(&owner, &[product_url("B0931VRJT5")])
        .await
        .unwrap();
    let job_id: JobId = submitted.job.job_id;

    let job = wait_for_job(&*broker.queue, &owner, &job_id, config.retry_ceiling).await;
    handle.stop().await;

    assert_eq!(job.urls.len(), 2);
    assert_eq!(job.count(CrawlUrlStatus::Complete), 2);
    assert_eq!(script.discovered(), vec![format!("{job_id}:B0931VRJT6")]);
    assert_eq!(script.attempts("B0931VRJT5"), 1);
    assert_eq!(script.attempts("B0931VRJT6"), 1);

    let data = storage.crawled_data(&job_id).await.unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["B0931VRJT5"]["asin"], "B0931VRJT5");
    assert_eq!(data[1]["B0931VRJT6"]["asin"], "B0931VRJT6");
}
