//! End-to-end tests against a mock backend
//!
//! Records are buffered while the probe fails, then replayed in order once
//! the backend answers again.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use offline_sync::app::OfflineSync;
use offline_sync::config::Settings;
use offline_sync::connectivity::{ConnectivityState, ConnectivityWatcher, HttpProbe, WatcherConfig};
use offline_sync::queue::{FileQueue, QueueConfig, QueueRecord};
use offline_sync::replay::{HttpReplayer, ReplayCoordinator};

fn record(value: Value) -> QueueRecord {
    value.as_object().cloned().unwrap()
}

/// Wait until the mock server has seen `count` POST requests
async fn wait_for_posts(server: &MockServer, count: usize) -> Vec<Value> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let posts: Vec<Value> = server
                .received_requests()
                .await
                .unwrap_or_default()
                .into_iter()
                .filter(|r| r.method.as_str() == "POST")
                .map(|r| serde_json::from_slice(&r.body).unwrap())
                .collect();
            if posts.len() >= count {
                return posts;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("replay did not reach the backend in time")
}

#[tokio::test]
async fn test_buffered_records_replayed_after_reconnect() {
    let server = MockServer::start().await;

    // Backend is down for the first two probes
    Mock::given(method("HEAD"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let queue = Arc::new(FileQueue::new(QueueConfig::new(temp.path().join("queue.jsonl"))));
    for id in 1..=3 {
        tokio_test::assert_ok!(queue.push(&record(json!({"op": "insert", "id": id}))).await);
    }

    let probe = Arc::new(HttpProbe::new(&server.uri(), "/rest/v1/", Duration::from_secs(2)).unwrap());
    let watcher = ConnectivityWatcher::new(
        probe,
        WatcherConfig {
            probe_interval: Duration::from_millis(50),
            max_backoff: Duration::from_millis(200),
            jitter_factor: 0.0,
        },
    );

    let replayer = HttpReplayer::new(format!("{}/sync", server.uri()), None, Duration::from_secs(2)).unwrap();
    let coordinator = Arc::new(ReplayCoordinator::new(queue.clone(), Arc::new(replayer)));
    watcher.register_callback(coordinator.into_callback());

    watcher.start();
    let posts = wait_for_posts(&server, 3).await;
    watcher.stop().await;

    let ids: Vec<i64> = posts.iter().map(|p| p["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(watcher.state(), ConnectivityState::Online);
    assert_eq!(watcher.stats().total_reconnections, 1);
    assert!(!queue.path().exists());
    assert_eq!(queue.size().await, 0);
}

#[tokio::test]
async fn test_rejected_replay_keeps_records_queued() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let queue = Arc::new(FileQueue::new(QueueConfig::new(temp.path().join("queue.jsonl"))));
    queue.push(&record(json!({"id": 1}))).await.unwrap();
    queue.push(&record(json!({"id": 2}))).await.unwrap();

    let replayer = HttpReplayer::new(server.uri(), None, Duration::from_secs(2)).unwrap();
    let coordinator = ReplayCoordinator::new(queue.clone(), Arc::new(replayer));

    let report = coordinator.replay_pending().await.unwrap();
    assert_eq!(report.replayed, 0);
    assert_eq!(report.requeued, 2);

    let left: Vec<i64> = queue
        .pop_all()
        .await
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    assert_eq!(left, vec![1, 2]);
}

#[tokio::test]
async fn test_service_final_replay_on_shutdown() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.queue.data_dir = temp.path().display().to_string();
    settings.connectivity.base_url = server.uri();
    settings.connectivity.probe_interval_secs = 3600;
    settings.replay.endpoint = Some(format!("{}/sync", server.uri()));

    let service = OfflineSync::from_settings(settings).unwrap();
    assert!(service.coordinator.is_some());
    assert_eq!(service.watcher.callback_count(), 1);

    service.queue.push(&record(json!({"id": 1}))).await.unwrap();
    service.queue.push(&record(json!({"id": 2}))).await.unwrap();
    assert_eq!(service.queue.path(), temp.path().join("queue.jsonl"));

    service.start().await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.watcher.is_online() != Some(true) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // The first successful probe is not a reconnect, so nothing was replayed yet
    assert!(service.queue.size().await > 0);

    let report = service.shutdown().await.unwrap().unwrap();
    assert_eq!(report.replayed, 2);
    assert!(report.is_complete());
    assert!(!service.watcher.is_running());
}

#[tokio::test]
async fn test_service_without_endpoint_skips_replay() {
    let temp = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.queue.data_dir = temp.path().display().to_string();

    let service = OfflineSync::from_settings(settings).unwrap();
    assert!(service.coordinator.is_none());
    assert_eq!(service.watcher.callback_count(), 0);
    assert!(service.shutdown().await.unwrap().is_none());
}
