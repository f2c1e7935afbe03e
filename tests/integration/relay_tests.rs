//! End-to-end runs of the coordinator loops with real fetch workers
//!
//! Pages are served by wiremock; workers and coordinator talk over the
//! in-process channel.

use crawl_relay::channel::{
    publish_json, worker_task_topic, Channel, HeartbeatMessage, MemoryChannel, Subscription,
    HEARTBEATS_TOPIC,
};
use crawl_relay::config::{CoordinatorConfig, WorkerConfig};
use crawl_relay::coordinator::{DashboardSnapshot, RunningCoordinator};
use crawl_relay::worker::{FetchWorker, HttpFetcher};
use crawl_relay::{Coordinator, Frontier};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig {
        heartbeat_timeout: 2,
        sweep_interval: 1,
        dispatch_interval: 50,
        dashboard_interval: 1,
        ..CoordinatorConfig::default()
    }
}

fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        request_timeout: 5,
        heartbeat_interval: 1,
        ..WorkerConfig::default()
    }
}

async fn mount_page(server: &MockServer, route: &str, title: &str, links: &[&str]) {
    let anchors: String = links
        .iter()
        .map(|link| format!(r#"<a href="{}">{}</a>"#, link, link))
        .collect();
    let body = format!(
        "<html><head><title>{}</title></head><body><p>{} body</p>{}</body></html>",
        title, title, anchors
    );

    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .expect(1)
        .mount(server)
        .await;
}

async fn start_worker(
    id: &str,
    channel: &MemoryChannel,
    shutdown: &CancellationToken,
) -> JoinHandle<()> {
    let config = fast_worker_config();
    let fetcher = Arc::new(HttpFetcher::new(&config).unwrap());
    FetchWorker::new(id, Arc::new(channel.clone()), fetcher, config)
        .spawn(shutdown.clone())
        .await
        .unwrap()
}

/// Polls the coordinator until `done` holds, panicking after ten seconds
async fn wait_until<F>(coordinator: &Coordinator, done: F) -> DashboardSnapshot
where
    F: Fn(&DashboardSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = coordinator.snapshot(chrono::Utc::now());
        if done(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached, last snapshot: {:?}", snapshot);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_crawl_visits_each_page_once() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "Home", &["/a", "/b"]).await;
    mount_page(&server, "/a", "A", &["/", "/b", "/a/"]).await;
    mount_page(&server, "/b", "B", &["/a", "/b#top"]).await;

    let channel = MemoryChannel::new(Duration::from_secs(30));
    let coordinator = Arc::new(Coordinator::new(
        fast_coordinator_config(),
        Frontier::in_memory(),
        Arc::new(channel.clone()),
    ));
    coordinator.seed([format!("{}/", server.uri())]).unwrap();

    let shutdown = CancellationToken::new();
    let running = RunningCoordinator::spawn(Arc::clone(&coordinator), &channel, &shutdown)
        .await
        .unwrap();
    let workers = vec![
        start_worker("w1", &channel, &shutdown).await,
        start_worker("w2", &channel, &shutdown).await,
    ];

    let snapshot = wait_until(&coordinator, |s| s.crawled_urls == 3).await;
    assert_eq!(snapshot.frontier_size, 3);
    assert_eq!(snapshot.indexed_urls, 3);
    assert_eq!(snapshot.error_count, 0);

    shutdown.cancel();
    for worker in workers {
        worker.await.unwrap();
    }
    let final_snapshot = running.shutdown().await;
    assert_eq!(final_snapshot.queued, 0);
    assert_eq!(final_snapshot.in_flight, 0);
    // MockServer verifies each page was fetched exactly once on drop
}

#[tokio::test]
async fn test_task_of_silent_worker_moves_to_live_worker() {
    let server = MockServer::start().await;
    mount_page(&server, "/one", "One", &[]).await;
    mount_page(&server, "/two", "Two", &[]).await;

    let channel = MemoryChannel::new(Duration::from_secs(30));
    let coordinator = Arc::new(Coordinator::new(
        fast_coordinator_config(),
        Frontier::in_memory(),
        Arc::new(channel.clone()),
    ));

    let shutdown = CancellationToken::new();
    let running = RunningCoordinator::spawn(Arc::clone(&coordinator), &channel, &shutdown)
        .await
        .unwrap();

    // A worker that announces itself once and then never answers
    let mut ghost_tasks: Box<dyn Subscription> =
        channel.subscribe(&worker_task_topic("ghost")).await.unwrap();
    let heartbeat = HeartbeatMessage {
        crawler_id: "ghost".to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        task_id: None,
    };
    publish_json(&channel, HEARTBEATS_TOPIC, &heartbeat)
        .await
        .unwrap();

    let live = start_worker("live", &channel, &shutdown).await;
    wait_until(&coordinator, |s| s.active_crawlers.len() == 2).await;

    coordinator
        .seed([
            format!("{}/one", server.uri()),
            format!("{}/two", server.uri()),
        ])
        .unwrap();

    // The ghost receives one task and holds it
    let held = tokio::time::timeout(Duration::from_secs(2), ghost_tasks.next_delivery())
        .await
        .unwrap()
        .unwrap();

    let snapshot = wait_until(&coordinator, |s| s.crawled_urls == 2).await;
    assert!(snapshot.timeout_count >= 1);
    assert_eq!(snapshot.failed_crawlers, vec!["ghost"]);
    assert_eq!(snapshot.active_crawlers, vec!["live"]);

    drop(held);
    shutdown.cancel();
    live.await.unwrap();
    running.shutdown().await;
}
