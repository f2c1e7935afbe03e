//! Coordinator behavior driven step by step with explicit clocks
//!
//! These tests call the coordinator's cycle methods directly instead of
//! running its loops, so timeouts can be crossed without sleeping.

use chrono::{DateTime, Duration, Utc};
use crawl_relay::channel::{
    decode, worker_task_topic, Channel, HeartbeatMessage, MemoryChannel, ResultMessage,
    ResultStatus, Subscription, TaskMessage,
};
use crawl_relay::config::CoordinatorConfig;
use crawl_relay::coordinator::ResultOutcome;
use crawl_relay::{Coordinator, Frontier, TaskId, TaskState};
use std::sync::Arc;
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn setup(config: CoordinatorConfig) -> (Coordinator, MemoryChannel) {
    let channel = MemoryChannel::new(std::time::Duration::from_secs(30));
    let coordinator = Coordinator::new(config, Frontier::in_memory(), Arc::new(channel.clone()));
    (coordinator, channel)
}

fn idle_heartbeat(worker: &str) -> HeartbeatMessage {
    HeartbeatMessage {
        crawler_id: worker.to_string(),
        timestamp: 0,
        task_id: None,
    }
}

fn crawled(task: &TaskMessage, worker: &str, links: &[&str]) -> ResultMessage {
    ResultMessage {
        task_id: task.task_id.clone(),
        status: ResultStatus::Crawled,
        crawler_id: worker.to_string(),
        url: Some(task.url.clone()),
        attempt: task.attempt,
        links: links.iter().map(|link| link.to_string()).collect(),
        error: None,
        indexed: true,
    }
}

fn failed(task: &TaskMessage, worker: &str) -> ResultMessage {
    ResultMessage {
        status: ResultStatus::Error,
        error: Some("HTTP 500".to_string()),
        indexed: false,
        ..crawled(task, worker, &[])
    }
}

async fn drain_tasks(sub: &mut Box<dyn Subscription>, count: usize) -> Vec<TaskMessage> {
    let mut tasks = Vec::with_capacity(count);
    for _ in 0..count {
        let delivery = tokio::time::timeout(std::time::Duration::from_secs(1), sub.next_delivery())
            .await
            .expect("task message not published")
            .expect("channel closed");
        tasks.push(decode::<TaskMessage>(delivery.payload()).unwrap());
        delivery.ack();
    }
    tasks
}

fn id_of(task: &TaskMessage) -> TaskId {
    task.task_id.parse().unwrap()
}

#[tokio::test]
async fn test_timed_out_task_is_redispatched_with_next_attempt() {
    let (coordinator, channel) = setup(CoordinatorConfig::default());
    let mut w1_tasks = channel.subscribe(&worker_task_topic("w1")).await.unwrap();

    coordinator
        .seed(["https://a.test", "https://b.test"])
        .unwrap();
    coordinator.record_heartbeat(&idle_heartbeat("w1"), t0());

    // Both tasks go to the only worker
    assert_eq!(coordinator.dispatch_pending(t0()).await, 2);
    let tasks = drain_tasks(&mut w1_tasks, 2).await;
    for task in &tasks {
        let state = coordinator.task(id_of(task)).unwrap();
        assert_eq!(state.state, TaskState::Dispatched);
        assert_eq!(state.assigned_worker.as_deref(), Some("w1"));
        assert_eq!(state.attempt, 1);
    }

    // Task 1 completes
    let outcome = coordinator
        .ingest_result(&crawled(&tasks[0], "w1", &[]), t0() + Duration::seconds(5))
        .unwrap();
    assert_eq!(
        outcome,
        ResultOutcome::Completed {
            task_id: id_of(&tasks[0])
        }
    );
    assert!(coordinator.task(id_of(&tasks[0])).is_none());

    // Task 2 hears nothing for longer than the timeout
    let reassigned = coordinator.sweep(t0() + Duration::seconds(61));
    assert_eq!(reassigned.len(), 1);
    let second = coordinator.task(id_of(&tasks[1])).unwrap();
    assert_eq!(second.state, TaskState::Queued);
    assert_eq!(second.attempt, 2);
    assert!(second.assigned_worker.is_none());

    // The worker comes back and the next cycle redispatches task 2
    let later = t0() + Duration::seconds(62);
    coordinator.record_heartbeat(&idle_heartbeat("w1"), later);
    assert_eq!(coordinator.dispatch_pending(later).await, 1);

    let redispatched = drain_tasks(&mut w1_tasks, 1).await;
    assert_eq!(redispatched[0].task_id, tasks[1].task_id);
    assert_eq!(redispatched[0].attempt, Some(2));

    let snapshot = coordinator.snapshot(later);
    assert_eq!(snapshot.crawled_urls, 1);
    assert_eq!(snapshot.indexed_urls, 1);
    assert_eq!(snapshot.timeout_count, 1);
    assert_eq!(snapshot.in_flight, 1);
}

#[tokio::test]
async fn test_late_result_from_first_attempt_is_ignored() {
    let (coordinator, channel) = setup(CoordinatorConfig::default());
    let mut w1_tasks = channel.subscribe(&worker_task_topic("w1")).await.unwrap();
    let mut w2_tasks = channel.subscribe(&worker_task_topic("w2")).await.unwrap();

    coordinator.seed(["https://a.test/slow"]).unwrap();
    coordinator.record_heartbeat(&idle_heartbeat("w1"), t0());
    coordinator.dispatch_pending(t0()).await;
    let first = drain_tasks(&mut w1_tasks, 1).await.remove(0);

    coordinator.sweep(t0() + Duration::seconds(61));
    let later = t0() + Duration::seconds(62);
    coordinator.record_heartbeat(&idle_heartbeat("w2"), later);
    coordinator.dispatch_pending(later).await;
    let second = drain_tasks(&mut w2_tasks, 1).await.remove(0);
    assert_eq!(second.attempt, Some(2));

    // w1 finally reports an error for its abandoned attempt
    let outcome = coordinator.ingest_result(&failed(&first, "w1"), later).unwrap();
    assert!(matches!(outcome, ResultOutcome::Stale { .. }));

    let task = coordinator.task(id_of(&second)).unwrap();
    assert_eq!(task.state, TaskState::Dispatched);
    assert_eq!(task.assigned_worker.as_deref(), Some("w2"));
}

#[tokio::test]
async fn test_redelivered_error_in_plain_wire_shape_is_applied_once() {
    let (coordinator, channel) = setup(CoordinatorConfig::default());
    let mut w1_tasks = channel.subscribe(&worker_task_topic("w1")).await.unwrap();

    coordinator.seed(["https://a.test/"]).unwrap();
    coordinator.record_heartbeat(&idle_heartbeat("w1"), t0());
    coordinator.dispatch_pending(t0()).await;
    let task = drain_tasks(&mut w1_tasks, 1).await.remove(0);

    // No attempt number, as sent by workers that only know the basic schema
    let raw = format!(
        r#"{{"task_id":"{}","status":"error","crawler_id":"w1","url":"https://a.test/"}}"#,
        task.task_id
    );
    let report: ResultMessage = decode(raw.as_bytes()).unwrap();
    assert_eq!(report.attempt, None);

    let first = coordinator.ingest_result(&report, t0()).unwrap();
    assert!(matches!(first, ResultOutcome::Requeued { attempt: 2, .. }));

    // The only worker gets the task back, then the transport redelivers
    assert_eq!(coordinator.dispatch_pending(t0()).await, 1);
    drain_tasks(&mut w1_tasks, 1).await;
    let again = coordinator.ingest_result(&report, t0()).unwrap();
    assert!(matches!(again, ResultOutcome::Stale { .. }));

    let state = coordinator.task(id_of(&task)).unwrap();
    assert_eq!(state.state, TaskState::Dispatched);
    assert_eq!(state.attempt, 2);
    assert_eq!(coordinator.snapshot(t0()).error_count, 1);
}

#[tokio::test]
async fn test_redelivered_error_with_attempt_is_applied_once() {
    let (coordinator, channel) = setup(CoordinatorConfig::default());
    let mut w1_tasks = channel.subscribe(&worker_task_topic("w1")).await.unwrap();

    coordinator.seed(["https://a.test/"]).unwrap();
    coordinator.record_heartbeat(&idle_heartbeat("w1"), t0());
    coordinator.dispatch_pending(t0()).await;
    let first = drain_tasks(&mut w1_tasks, 1).await.remove(0);

    let report = failed(&first, "w1");
    coordinator.ingest_result(&report, t0()).unwrap();
    coordinator.dispatch_pending(t0()).await;
    let second = drain_tasks(&mut w1_tasks, 1).await.remove(0);
    assert_eq!(second.attempt, Some(2));

    let again = coordinator.ingest_result(&report, t0()).unwrap();
    assert!(matches!(again, ResultOutcome::Stale { .. }));

    let state = coordinator.task(id_of(&second)).unwrap();
    assert_eq!(state.state, TaskState::Dispatched);
    assert_eq!(state.attempt, 2);
}

#[tokio::test]
async fn test_discovered_links_create_tasks_only_once() {
    let (coordinator, channel) = setup(CoordinatorConfig::default());
    let mut w1_tasks = channel.subscribe(&worker_task_topic("w1")).await.unwrap();

    coordinator.seed(["https://a.test", "https://b.test"]).unwrap();
    coordinator.record_heartbeat(&idle_heartbeat("w1"), t0());
    coordinator.dispatch_pending(t0()).await;
    let tasks = drain_tasks(&mut w1_tasks, 2).await;

    // b.test is already known; a.test/page is new
    let result = crawled(&tasks[0], "w1", &["https://b.test/", "https://a.test/page"]);
    coordinator.ingest_result(&result, t0()).unwrap();

    assert_eq!(coordinator.queued_len(), 1);
    let created = coordinator.task_for_url("https://a.test/page").unwrap();
    assert_eq!(created.state, TaskState::Queued);
    assert_eq!(created.attempt, 0);

    // The same link reported again by another page creates nothing
    let result = crawled(&tasks[1], "w1", &["https://A.TEST/page#intro"]);
    coordinator.ingest_result(&result, t0()).unwrap();
    assert_eq!(coordinator.queued_len(), 1);
    assert_eq!(coordinator.frontier().len().unwrap(), 3);
}

#[tokio::test]
async fn test_failures_dead_letter_at_attempt_ceiling() {
    let config = CoordinatorConfig {
        max_attempts: Some(2),
        ..CoordinatorConfig::default()
    };
    let (coordinator, channel) = setup(config);
    let mut w1_tasks = channel.subscribe(&worker_task_topic("w1")).await.unwrap();

    coordinator.seed(["https://broken.test/"]).unwrap();
    coordinator.record_heartbeat(&idle_heartbeat("w1"), t0());

    coordinator.dispatch_pending(t0()).await;
    let first = drain_tasks(&mut w1_tasks, 1).await.remove(0);
    let outcome = coordinator.ingest_result(&failed(&first, "w1"), t0()).unwrap();
    assert!(matches!(outcome, ResultOutcome::Requeued { attempt: 2, .. }));

    coordinator.dispatch_pending(t0()).await;
    let second = drain_tasks(&mut w1_tasks, 1).await.remove(0);
    let outcome = coordinator.ingest_result(&failed(&second, "w1"), t0()).unwrap();
    assert!(matches!(outcome, ResultOutcome::DeadLettered { .. }));

    let snapshot = coordinator.snapshot(t0());
    assert_eq!(snapshot.dead_lettered, 1);
    assert_eq!(snapshot.error_count, 2);
    assert_eq!(snapshot.queued, 0);
    assert!(snapshot.task_status.is_empty());

    // The URL stays known and is never recreated
    assert_eq!(coordinator.seed(["https://broken.test/"]).unwrap(), 0);
}

#[tokio::test]
async fn test_in_flight_limit_holds_back_dispatch() {
    let config = CoordinatorConfig {
        max_in_flight_per_worker: 1,
        ..CoordinatorConfig::default()
    };
    let (coordinator, channel) = setup(config);
    let mut w1_tasks = channel.subscribe(&worker_task_topic("w1")).await.unwrap();

    coordinator
        .seed(["https://a.test/1", "https://a.test/2"])
        .unwrap();
    coordinator.record_heartbeat(&idle_heartbeat("w1"), t0());

    assert_eq!(coordinator.dispatch_pending(t0()).await, 1);
    assert_eq!(coordinator.dispatch_pending(t0()).await, 0);
    assert_eq!(coordinator.queued_len(), 1);

    let first = drain_tasks(&mut w1_tasks, 1).await.remove(0);
    coordinator
        .ingest_result(&crawled(&first, "w1", &[]), t0())
        .unwrap();
    assert_eq!(coordinator.dispatch_pending(t0()).await, 1);
}

#[tokio::test]
async fn test_sqlite_frontier_dedups_across_restarts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("frontier.db");
    let channel = MemoryChannel::new(std::time::Duration::from_secs(30));
    let mut w1_tasks = channel.subscribe(&worker_task_topic("w1")).await.unwrap();

    {
        let frontier = Frontier::open_sqlite(&path).unwrap();
        let coordinator =
            Coordinator::new(CoordinatorConfig::default(), frontier, Arc::new(channel.clone()));
        assert_eq!(
            coordinator
                .seed(["https://a.test/", "https://a.test/pending"])
                .unwrap(),
            2
        );

        // Only the first URL finishes before the coordinator goes away
        coordinator.record_heartbeat(&idle_heartbeat("w1"), t0());
        coordinator.dispatch_pending(t0()).await;
        let tasks = drain_tasks(&mut w1_tasks, 2).await;
        let done = tasks
            .iter()
            .find(|task| task.url == "https://a.test/")
            .unwrap();
        coordinator
            .ingest_result(&crawled(done, "w1", &[]), t0())
            .unwrap();
    }

    let frontier = Frontier::open_sqlite(&path).unwrap();
    let coordinator =
        Coordinator::new(CoordinatorConfig::default(), frontier, Arc::new(channel.clone()));
    assert_eq!(coordinator.resume().unwrap(), 1);
    assert_eq!(
        coordinator
            .seed(["https://a.test/", "https://a.test/pending", "https://b.test/"])
            .unwrap(),
        1
    );

    assert!(coordinator.task_for_url("https://a.test/").is_none());
    let resumed = coordinator.task_for_url("https://a.test/pending").unwrap();
    assert_eq!(resumed.state, TaskState::Queued);
    assert_eq!(resumed.attempt, 0);
    assert_eq!(coordinator.queued_len(), 2);
}
