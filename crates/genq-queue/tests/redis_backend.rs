//! Job store integration tests against a live Redis.

use std::sync::Arc;

use serde_json::json;

use genq_models::{JobId, JobStatus, JobType};
use genq_queue::{JobStore, QueueBackend, QueueConfig, RedisBackend};

/// Store on an isolated key prefix so runs never see each other's jobs.
async fn isolated_store() -> JobStore<RedisBackend> {
    dotenvy::dotenv().ok();

    let mut config = QueueConfig::from_env();
    config.key_prefix = format!("genq_test:{}", JobId::new());

    JobStore::connect(&config)
        .await
        .expect("Failed to connect to Redis")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let store = isolated_store().await;
    store.backend().ping().await.expect("Ping failed");

    let stats = store.stats().await.expect("Failed to get stats");
    assert_eq!(stats.total, 0);
    assert_eq!(stats.queue_length, 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_priority_and_fifo_order() {
    let store = isolated_store().await;
    let params = json!({"prompt": "test"}).as_object().cloned().unwrap();

    let low = store.create(JobType::TextToImage, params.clone(), 1).await.unwrap();
    let high_first = store.create(JobType::TextToImage, params.clone(), 10).await.unwrap();
    let high_second = store.create(JobType::TextToImage, params, 10).await.unwrap();

    for expected in [high_first, high_second, low] {
        let job = store.claim("it-worker").await.unwrap().expect("Queue empty");
        assert_eq!(job.id, expected);
        assert_eq!(job.status, JobStatus::Processing);
    }
    assert!(store.claim("it-worker").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_concurrent_claims_single_winner() {
    let store = Arc::new(isolated_store().await);
    let job_id = store
        .create(JobType::TextToVideo, Default::default(), 0)
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim(&format!("it-worker-{}", i)).await.unwrap() })
        })
        .collect();

    let winners: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap())
        .collect();

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, job_id);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_full_lifecycle_and_cleanup() {
    let store = isolated_store().await;
    let job_id = store
        .create(JobType::TextToImage, Default::default(), 0)
        .await
        .unwrap();

    store.claim("it-worker").await.unwrap().unwrap();
    assert!(store.update_progress(&job_id, 50, "it-worker").await.unwrap());
    assert!(!store.update_progress(&job_id, 60, "someone-else").await.unwrap());
    assert!(store
        .complete(&job_id, json!({"status": "completed"}), "it-worker")
        .await
        .unwrap());

    let job = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.active_workers, 1);

    assert_eq!(store.cleanup(0).await.unwrap(), 1);
    assert!(store.get(&job_id).await.unwrap().is_none());

    store
        .prune_heartbeats(std::time::Duration::ZERO)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_cancel_removes_queue_entry() {
    let store = isolated_store().await;
    let job_id = store
        .create(JobType::TextToImage, Default::default(), 0)
        .await
        .unwrap();

    assert!(store.cancel(&job_id).await.unwrap());
    assert_eq!(store.backend().queue_len().await.unwrap(), 0);
    assert!(store.claim("it-worker").await.unwrap().is_none());
    assert!(!store.cancel(&job_id).await.unwrap());
}
