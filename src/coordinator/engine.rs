//! Coordinator engine
//!
//! Owns the task table, the heartbeat table and the dispatch planner behind a
//! single lock. Every state change (result ingestion, heartbeat, sweep,
//! dispatch reservation) happens under that lock, so a task can never be
//! completed and timed out at the same time.
//!
//! Publishing never happens under the lock: dispatch reserves tasks, releases
//! the lock, publishes, and rolls a reservation back if its publish fails.

use crate::channel::{
    decode, publish_json, worker_task_topic, Channel, ChannelResult, Delivery, HeartbeatMessage,
    ResultMessage, ResultStatus, TaskMessage, DASHBOARD_TOPIC,
};
use crate::config::CoordinatorConfig;
use crate::coordinator::dashboard::DashboardSnapshot;
use crate::coordinator::liveness::WorkerRegistry;
use crate::coordinator::scheduler::{DispatchLimits, Scheduler};
use crate::coordinator::task::{Task, TaskId};
use crate::coordinator::task_table::{Reassignment, ResultOutcome, TaskTable};
use crate::frontier::Frontier;
use crate::url::{normalize_url, NormalizedUrl};
use crate::{CrawlError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

struct CoordinatorState {
    tasks: TaskTable,
    workers: WorkerRegistry,
    scheduler: Scheduler,
}

impl CoordinatorState {
    /// Admits a URL into the frontier and creates its task if it is new
    fn admit(&mut self, frontier: &Frontier, raw: &str, now: DateTime<Utc>) -> Result<Option<TaskId>> {
        let url = normalize_url(raw)?;
        if !frontier.admit(&url)? {
            return Ok(None);
        }
        let id = self.tasks.create(url, now);
        Ok(Some(id))
    }
}

/// The crawl task coordinator
///
/// Sole owner of task state. Workers only ever see task messages and are
/// expected to answer with results and heartbeats on their own topics.
pub struct Coordinator {
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    frontier: Frontier,
    channel: Arc<dyn Channel>,
    dispatch_wakeup: Notify,
}

impl Coordinator {
    /// Creates a coordinator over a frontier and a channel
    ///
    /// # Arguments
    ///
    /// * `config` - Timeouts, intervals and in-flight limits
    /// * `frontier` - The dedup store; URLs already in it never become tasks
    /// * `channel` - Transport for task, result, heartbeat and dashboard topics
    pub fn new(config: CoordinatorConfig, frontier: Frontier, channel: Arc<dyn Channel>) -> Self {
        let limits = DispatchLimits {
            per_worker: config.max_in_flight_per_worker as usize,
            global: config.max_in_flight.map(|limit| limit as usize),
        };

        Self {
            state: Mutex::new(CoordinatorState {
                tasks: TaskTable::new(config.max_attempts),
                workers: WorkerRegistry::new(),
                scheduler: Scheduler::new(limits),
            }),
            config,
            frontier,
            channel,
            dispatch_wakeup: Notify::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.heartbeat_timeout())
            .unwrap_or_else(|_| chrono::Duration::weeks(52))
    }

    /// Asks the dispatch loop to run a cycle without waiting for its next tick
    pub fn wake_dispatcher(&self) {
        self.dispatch_wakeup.notify_one();
    }

    /// Resolves when a dispatch cycle has been requested
    pub(crate) async fn dispatch_requested(&self) {
        self.dispatch_wakeup.notified().await;
    }

    /// Admits one URL, creating a queued task if it was not known
    ///
    /// # Returns
    ///
    /// * `Ok(Some(id))` - New task created
    /// * `Ok(None)` - URL already in the frontier
    /// * `Err(CrawlError)` - URL invalid or the frontier failed
    pub fn admit(&self, raw: &str) -> Result<Option<TaskId>> {
        let id = self.state().admit(&self.frontier, raw, Utc::now())?;
        if id.is_some() {
            self.wake_dispatcher();
        }
        Ok(id)
    }

    /// Admits seed URLs, skipping invalid ones
    ///
    /// Returns the number of tasks created.
    pub fn seed<I, S>(&self, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut created = 0;
        for url in urls {
            let url = url.as_ref();
            match self.admit(url) {
                Ok(Some(id)) => {
                    tracing::debug!("Seeded task {} for {}", id, url);
                    created += 1;
                }
                Ok(None) => tracing::debug!("Seed {} already in frontier", url),
                Err(CrawlError::UrlError(e)) => tracing::warn!("Skipping seed {}: {}", url, e),
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    /// Requeues frontier URLs whose task never finished in an earlier run
    ///
    /// Call once at startup, before seeding. URLs that already have a task
    /// here are skipped. Returns the number of tasks created.
    pub fn resume(&self) -> Result<usize> {
        let unfinished = self.frontier.unfinished()?;
        if unfinished.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut state = self.state();
        let known: HashSet<NormalizedUrl> =
            state.tasks.iter().map(|task| task.url.clone()).collect();

        let mut resumed = 0;
        for url in unfinished {
            if known.contains(&url) {
                continue;
            }
            let id = state.tasks.create(url.clone(), now);
            tracing::debug!("Resumed task {} for {}", id, url);
            resumed += 1;
        }
        drop(state);

        if resumed > 0 {
            tracing::info!("Resumed {} unfinished URLs from an earlier run", resumed);
            self.wake_dispatcher();
        }
        Ok(resumed)
    }

    /// Records a heartbeat received at `now`
    ///
    /// A heartbeat naming a task resets that task's timeout clock if the
    /// sender holds it; a heartbeat without a task resets the clocks of every
    /// task the sender holds. Returns the number of clocks reset.
    pub fn record_heartbeat(&self, heartbeat: &HeartbeatMessage, now: DateTime<Utc>) -> usize {
        let worker = heartbeat.crawler_id.as_str();
        let (joined, touched) = {
            let mut state = self.state();
            let joined = state.workers.record(worker, now, Some(heartbeat.timestamp));

            let touched = match heartbeat.task_id.as_deref() {
                Some(raw) => match raw.parse::<TaskId>() {
                    Ok(id) if state.tasks.touch_task(id, worker, now) => 1,
                    _ => {
                        tracing::debug!(
                            "Heartbeat from {} for task {} it does not hold",
                            worker,
                            raw
                        );
                        0
                    }
                },
                None => state.tasks.touch_worker(worker, now),
            };
            (joined, touched)
        };

        if joined {
            tracing::info!("Worker {} joined", worker);
            self.wake_dispatcher();
        }
        touched
    }

    /// Applies a result received at `now`
    ///
    /// Discovered links are admitted before the task transition, so a frontier
    /// failure leaves the task untouched and the result can be redelivered.
    pub fn ingest_result(&self, result: &ResultMessage, now: DateTime<Utc>) -> Result<ResultOutcome> {
        let Ok(id) = result.task_id.parse::<TaskId>() else {
            tracing::warn!(
                "Result from {} names unknown task {}",
                result.crawler_id,
                result.task_id
            );
            return Ok(ResultOutcome::UnknownTask);
        };
        let success = result.status == ResultStatus::Crawled;

        let (outcome, discovered, url) = {
            let mut state = self.state();
            state.workers.record(&result.crawler_id, now, None);

            if let Some(rejection) =
                state
                    .tasks
                    .check_result(id, &result.crawler_id, result.attempt, success)
            {
                drop(state);
                self.log_rejection(result, &rejection);
                return Ok(rejection);
            }

            let mut discovered = 0;
            for link in &result.links {
                match state.admit(&self.frontier, link, now) {
                    Ok(Some(_)) => discovered += 1,
                    Ok(None) => {}
                    Err(CrawlError::UrlError(e)) => {
                        tracing::debug!("Ignoring link {} from task {}: {}", link, id, e)
                    }
                    Err(e) => return Err(e),
                }
            }

            let url = state.tasks.get(id).map(|task| task.url.clone());
            let outcome = state
                .tasks
                .apply_result(id, &result.crawler_id, result.attempt, success)?;
            if success && result.indexed {
                state.tasks.record_indexed();
            }
            (outcome, discovered, url)
        };

        if let (ResultOutcome::Completed { .. } | ResultOutcome::DeadLettered { .. }, Some(url)) =
            (&outcome, &url)
        {
            self.record_finished(url);
        }

        match &outcome {
            ResultOutcome::Completed { task_id } => tracing::info!(
                "Task {} completed by {} ({} new links)",
                task_id,
                result.crawler_id,
                discovered
            ),
            ResultOutcome::Requeued { task_id, attempt } => tracing::warn!(
                "Task {} failed on {}: {}; requeued as attempt {}",
                task_id,
                result.crawler_id,
                result.error.as_deref().unwrap_or("unknown error"),
                attempt
            ),
            ResultOutcome::DeadLettered { task_id } => tracing::error!(
                "Task {} failed on {}: {}; attempts exhausted, dead-lettered",
                task_id,
                result.crawler_id,
                result.error.as_deref().unwrap_or("unknown error")
            ),
            _ => {}
        }

        self.wake_dispatcher();
        Ok(outcome)
    }

    fn record_finished(&self, url: &NormalizedUrl) {
        if let Err(e) = self.frontier.mark_finished(url) {
            tracing::warn!("Failed to mark {} finished in frontier: {}", url, e);
        }
    }

    fn log_rejection(&self, result: &ResultMessage, outcome: &ResultOutcome) {
        match outcome {
            ResultOutcome::UnknownTask => tracing::debug!(
                "Discarding result for unknown or finished task {} from {}",
                result.task_id,
                result.crawler_id
            ),
            ResultOutcome::Stale { task_id, reason } => tracing::debug!(
                "Discarding result for task {} from {}: {}",
                task_id,
                result.crawler_id,
                reason
            ),
            _ => {}
        }
    }

    /// Runs one dispatch cycle at `now`
    ///
    /// Returns the number of task messages published.
    pub async fn dispatch_pending(&self, now: DateTime<Utc>) -> usize {
        let orders = {
            let mut state = self.state();
            let CoordinatorState {
                tasks,
                workers,
                scheduler,
            } = &mut *state;
            match scheduler.plan(tasks, workers, now, self.timeout()) {
                Ok(orders) => orders,
                Err(e) => {
                    tracing::error!("Dispatch planning failed: {}", e);
                    return 0;
                }
            }
        };

        let mut published = 0;
        for order in orders {
            let message = TaskMessage {
                task_id: order.task_id.to_string(),
                url: order.url.to_string(),
                attempt: Some(order.attempt),
            };
            let topic = worker_task_topic(&order.worker);

            match publish_json(self.channel.as_ref(), &topic, &message).await {
                Ok(()) => {
                    tracing::info!(
                        "Dispatched task {} ({}) to {}, attempt {}",
                        order.task_id,
                        order.url,
                        order.worker,
                        order.attempt
                    );
                    published += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to publish task {} to {}: {}; returning it to the queue",
                        order.task_id,
                        order.worker,
                        e
                    );
                    self.state().tasks.revert_dispatch(&order);
                }
            }
        }
        published
    }

    /// Runs one liveness sweep at `now`
    ///
    /// Every dispatched task silent for longer than the heartbeat timeout is
    /// timed out and requeued, or dead-lettered if it has no attempts left.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<Reassignment> {
        let swept = self.state().tasks.sweep(now, self.timeout());
        let reassigned = match swept {
            Ok(reassigned) => reassigned,
            Err(e) => {
                tracing::error!("Liveness sweep failed: {}", e);
                return Vec::new();
            }
        };

        for reassignment in &reassigned {
            match reassignment.next_attempt {
                Some(attempt) => tracing::info!(
                    "Task {} ({}) timed out on {}; requeued as attempt {}",
                    reassignment.task_id,
                    reassignment.url,
                    reassignment.worker,
                    attempt
                ),
                None => {
                    tracing::error!(
                        "Task {} ({}) timed out on {}; attempts exhausted, dead-lettered",
                        reassignment.task_id,
                        reassignment.url,
                        reassignment.worker
                    );
                    self.record_finished(&reassignment.url);
                }
            }
        }

        if !reassigned.is_empty() {
            self.wake_dispatcher();
        }
        reassigned
    }

    /// Builds a dashboard snapshot at `now`
    pub fn snapshot(&self, now: DateTime<Utc>) -> DashboardSnapshot {
        let mut snapshot = {
            let state = self.state();
            DashboardSnapshot::capture(&state.tasks, &state.workers, now, self.timeout())
        };

        snapshot.frontier_size = self.frontier.len().unwrap_or_else(|e| {
            tracing::warn!("Failed to count frontier: {}", e);
            0
        });
        snapshot
    }

    /// Publishes a snapshot on the dashboard topic
    pub async fn publish_dashboard(&self, now: DateTime<Utc>) -> ChannelResult<DashboardSnapshot> {
        let snapshot = self.snapshot(now);
        publish_json(self.channel.as_ref(), DASHBOARD_TOPIC, &snapshot).await?;
        Ok(snapshot)
    }

    /// Decodes and applies one delivery from the results topic
    ///
    /// Malformed payloads are acknowledged and dropped. A frontier failure
    /// leaves the message unacknowledged so it is redelivered.
    pub fn handle_result_delivery(&self, delivery: Delivery) {
        let result = match decode::<ResultMessage>(delivery.payload()) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Dropping malformed result: {}", e);
                delivery.ack();
                return;
            }
        };

        match self.ingest_result(&result, Utc::now()) {
            Ok(_) => delivery.ack(),
            Err(e) => {
                tracing::error!(
                    "Failed to apply result for task {}: {}",
                    result.task_id,
                    e
                );
                delivery.nack();
            }
        }
    }

    /// Decodes and applies one delivery from the heartbeats topic
    pub fn handle_heartbeat_delivery(&self, delivery: Delivery) {
        match decode::<HeartbeatMessage>(delivery.payload()) {
            Ok(heartbeat) => {
                self.record_heartbeat(&heartbeat, Utc::now());
            }
            Err(e) => tracing::warn!("Dropping malformed heartbeat: {}", e),
        }
        delivery.ack();
    }

    /// Copy of a non-terminal task
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.state().tasks.get(id).cloned()
    }

    /// Copy of the non-terminal task for a URL, if any
    pub fn task_for_url(&self, raw: &str) -> Option<Task> {
        let url = normalize_url(raw).ok()?;
        self.state().tasks.iter().find(|task| task.url == url).cloned()
    }

    /// Number of tasks waiting for dispatch
    pub fn queued_len(&self) -> usize {
        self.state().tasks.queued_len()
    }

    /// Number of dispatched tasks
    pub fn in_flight(&self) -> usize {
        self.state().tasks.in_flight(None)
    }
}
