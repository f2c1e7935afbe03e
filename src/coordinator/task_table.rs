//! Task table and lifecycle transitions
//!
//! The table owns every non-terminal task plus the FIFO queue of tasks waiting
//! for dispatch. Terminal tasks (completed or dead-lettered) are dropped from
//! the map and only survive as counters; their URLs stay in the frontier so they
//! are never recreated.
//!
//! Every method takes `now` explicitly so callers decide the clock source.

use crate::coordinator::task::{Task, TaskId};
use crate::state::TaskState;
use crate::url::NormalizedUrl;
use crate::{CrawlError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// A task reserved for a worker, not yet published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOrder {
    pub task_id: TaskId,
    pub url: NormalizedUrl,
    pub worker: String,
    pub attempt: u32,
    /// Attempt number to restore if the publish fails
    pub previous_attempt: u32,
}

/// What applying a worker result did to the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultOutcome {
    /// Task finished successfully and left the table
    Completed { task_id: TaskId },

    /// Task failed and is queued again under a new attempt number
    Requeued { task_id: TaskId, attempt: u32 },

    /// Task failed on its last allowed attempt
    DeadLettered { task_id: TaskId },

    /// No such task (already terminal, or never created here)
    UnknownTask,

    /// Result does not describe the task's current dispatch
    Stale { task_id: TaskId, reason: &'static str },
}

impl ResultOutcome {
    /// Returns true if the result changed the table
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Requeued { .. } | Self::DeadLettered { .. }
        )
    }
}

/// A task taken away from a silent worker by the liveness sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassignment {
    pub task_id: TaskId,
    pub url: NormalizedUrl,
    pub worker: String,
    /// Attempt number for the next dispatch; `None` if the task was dead-lettered
    pub next_attempt: Option<u32>,
}

/// Lifetime counters for tasks that have left the table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounters {
    pub created: u64,
    pub completed: u64,
    pub dead_lettered: u64,
    pub error_results: u64,
    pub timeouts: u64,
    pub indexed: u64,
}

/// The coordinator's task table
#[derive(Debug)]
pub struct TaskTable {
    tasks: HashMap<TaskId, Task>,
    queue: VecDeque<TaskId>,
    next_id: u64,
    max_attempts: Option<u32>,
    counters: TaskCounters,
}

impl TaskTable {
    /// Creates an empty table
    ///
    /// With `max_attempts` set, a task failing or timing out on that attempt is
    /// dead-lettered instead of requeued.
    pub fn new(max_attempts: Option<u32>) -> Self {
        Self {
            tasks: HashMap::new(),
            queue: VecDeque::new(),
            next_id: 1,
            max_attempts,
            counters: TaskCounters::default(),
        }
    }

    /// Creates a queued task for a URL the frontier just admitted
    pub fn create(&mut self, url: NormalizedUrl, now: DateTime<Utc>) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;

        self.tasks.insert(id, Task::new(id, url, now));
        self.queue.push_back(id);
        self.counters.created += 1;
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Iterates over every non-terminal task
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Number of non-terminal tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Next task waiting for dispatch, in FIFO order
    pub fn next_queued(&self) -> Option<TaskId> {
        self.queue.front().copied()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of dispatched tasks, optionally restricted to one worker
    pub fn in_flight(&self, worker: Option<&str>) -> usize {
        self.tasks
            .values()
            .filter(|task| match worker {
                Some(worker) => task.is_held_by(worker),
                None => task.state == TaskState::Dispatched,
            })
            .count()
    }

    /// In-flight count for every worker currently holding a task
    pub fn in_flight_by_worker(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for task in self.tasks.values() {
            if task.state == TaskState::Dispatched {
                if let Some(worker) = &task.assigned_worker {
                    *counts.entry(worker.clone()).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    pub fn counters(&self) -> TaskCounters {
        self.counters
    }

    /// Records that a worker handed a completed page to the document index
    pub fn record_indexed(&mut self) {
        self.counters.indexed += 1;
    }

    /// Task count per state, terminal states included
    pub fn state_counts(&self) -> BTreeMap<TaskState, u64> {
        let mut counts: BTreeMap<TaskState, u64> = TaskState::all_states()
            .into_iter()
            .map(|state| (state, 0))
            .collect();

        for task in self.tasks.values() {
            *counts.entry(task.state).or_insert(0) += 1;
        }
        counts.insert(TaskState::Completed, self.counters.completed);
        counts.insert(TaskState::DeadLettered, self.counters.dead_lettered);
        counts
    }

    /// Moves a queued task to `Dispatched` for `worker`
    ///
    /// The first dispatch sets the attempt number to 1; a task requeued after a
    /// failure keeps the number it was requeued with.
    pub fn dispatch(
        &mut self,
        id: TaskId,
        worker: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchOrder> {
        let task = self.transition(id, TaskState::Dispatched)?;

        let previous_attempt = task.attempt;
        if task.attempt == 0 {
            task.attempt = 1;
        }
        task.assigned_worker = Some(worker.to_string());
        task.dispatched_at = Some(now);
        task.last_heartbeat_at = Some(now);

        let order = DispatchOrder {
            task_id: id,
            url: task.url.clone(),
            worker: worker.to_string(),
            attempt: task.attempt,
            previous_attempt,
        };
        if self.queue.front() == Some(&id) {
            self.queue.pop_front();
        } else {
            self.queue.retain(|queued| *queued != id);
        }
        Ok(order)
    }

    /// Undoes a dispatch whose task message could not be published
    ///
    /// The task goes back to the head of the queue with its earlier attempt
    /// number. Does nothing if the task has moved on since.
    pub fn revert_dispatch(&mut self, order: &DispatchOrder) -> bool {
        let still_pending = self
            .tasks
            .get(&order.task_id)
            .map(|task| task.is_held_by(&order.worker) && task.attempt == order.attempt)
            .unwrap_or(false);
        if !still_pending {
            return false;
        }

        if let Ok(task) = self.transition(order.task_id, TaskState::Queued) {
            task.attempt = order.previous_attempt;
            task.assigned_worker = None;
            task.dispatched_at = None;
            task.last_heartbeat_at = None;
            self.queue.push_front(order.task_id);
            return true;
        }
        false
    }

    /// Returns the outcome of a result that would not be applied, or `None`
    /// if [`TaskTable::apply_result`] would change the table
    pub fn check_result(
        &self,
        id: TaskId,
        worker: &str,
        attempt: Option<u32>,
        success: bool,
    ) -> Option<ResultOutcome> {
        let Some(task) = self.tasks.get(&id) else {
            return Some(ResultOutcome::UnknownTask);
        };

        let reason = if task.state != TaskState::Dispatched {
            "task is not dispatched"
        } else if attempt.is_some_and(|attempt| attempt != task.attempt) {
            "result is for an earlier attempt"
        } else if !success && task.assigned_worker.as_deref() != Some(worker) {
            "error reported by a worker not holding the task"
        } else if !success
            && attempt.is_none()
            && task.error_reporters.iter().any(|reporter| reporter == worker)
        {
            // Without an attempt number a repeat can't be told apart from a redelivery
            "worker already reported an error for this task"
        } else {
            return None;
        };

        Some(ResultOutcome::Stale {
            task_id: id,
            reason,
        })
    }

    /// Applies a worker's result for a task
    ///
    /// Discards results for unknown tasks, for tasks that are not dispatched,
    /// for an attempt other than the current one, and error reports from a
    /// worker other than the assignee. A success report from another worker is
    /// accepted since the page was fetched either way.
    ///
    /// Results carrying no attempt number are deduplicated per worker: once an
    /// error from `worker` has been applied, a later attempt-less error from the
    /// same worker is treated as a redelivery of it.
    pub fn apply_result(
        &mut self,
        id: TaskId,
        worker: &str,
        attempt: Option<u32>,
        success: bool,
    ) -> Result<ResultOutcome> {
        if let Some(rejection) = self.check_result(id, worker, attempt, success) {
            return Ok(rejection);
        }

        if success {
            self.retire(id, TaskState::Completed)?;
            self.counters.completed += 1;
            return Ok(ResultOutcome::Completed { task_id: id });
        }

        self.counters.error_results += 1;
        let task = self.transition(id, TaskState::Failed)?;
        if attempt.is_none() {
            task.error_reporters.push(worker.to_string());
        }
        match self.retry_or_dead_letter(id)? {
            Some(attempt) => Ok(ResultOutcome::Requeued {
                task_id: id,
                attempt,
            }),
            None => Ok(ResultOutcome::DeadLettered { task_id: id }),
        }
    }

    /// Resets the timeout clock of one task held by `worker`
    ///
    /// Returns false if the task is unknown or not dispatched to that worker.
    pub fn touch_task(&mut self, id: TaskId, worker: &str, now: DateTime<Utc>) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) if task.is_held_by(worker) => {
                task.last_heartbeat_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Resets the timeout clock of every task held by `worker`
    pub fn touch_worker(&mut self, worker: &str, now: DateTime<Utc>) -> usize {
        let mut touched = 0;
        for task in self.tasks.values_mut() {
            if task.is_held_by(worker) {
                task.last_heartbeat_at = Some(now);
                touched += 1;
            }
        }
        touched
    }

    /// Times out every dispatched task silent for longer than `timeout`
    ///
    /// Each timed-out task is requeued under a new attempt number, or
    /// dead-lettered once it has used its last attempt.
    pub fn sweep(&mut self, now: DateTime<Utc>, timeout: Duration) -> Result<Vec<Reassignment>> {
        let mut expired: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|task| task.state == TaskState::Dispatched)
            .filter(|task| task.silence(now).is_some_and(|silence| silence > timeout))
            .map(|task| task.id)
            .collect();
        expired.sort();

        let mut reassigned = Vec::with_capacity(expired.len());
        for id in expired {
            let task = self.transition(id, TaskState::TimedOut)?;
            let url = task.url.clone();
            let worker = task.assigned_worker.clone().unwrap_or_default();

            self.counters.timeouts += 1;
            let next_attempt = self.retry_or_dead_letter(id)?;
            reassigned.push(Reassignment {
                task_id: id,
                url,
                worker,
                next_attempt,
            });
        }
        Ok(reassigned)
    }

    /// Requeues a failed or timed-out task, or dead-letters it
    ///
    /// Returns the new attempt number, or `None` if the task was dead-lettered.
    fn retry_or_dead_letter(&mut self, id: TaskId) -> Result<Option<u32>> {
        let exhausted = match (self.max_attempts, self.tasks.get(&id)) {
            (Some(max), Some(task)) => task.attempt >= max,
            _ => false,
        };

        if exhausted {
            self.retire(id, TaskState::DeadLettered)?;
            self.counters.dead_lettered += 1;
            return Ok(None);
        }

        let task = self.transition(id, TaskState::Queued)?;
        task.attempt += 1;
        task.assigned_worker = None;
        task.dispatched_at = None;
        task.last_heartbeat_at = None;
        let attempt = task.attempt;
        self.queue.push_back(id);
        Ok(Some(attempt))
    }

    /// Moves a task to a terminal state and drops it from the table
    fn retire(&mut self, id: TaskId, terminal: TaskState) -> Result<()> {
        debug_assert!(terminal.is_terminal());
        self.transition(id, terminal)?;
        self.tasks.remove(&id);
        Ok(())
    }

    /// Checks and applies a state change, returning the task for further edits
    fn transition(&mut self, id: TaskId, next: TaskState) -> Result<&mut Task> {
        let task = self.tasks.get_mut(&id).ok_or(CrawlError::InvalidTransition {
            task_id: id,
            from: TaskState::Completed,
            to: next,
        })?;

        if !task.state.can_transition_to(next) {
            return Err(CrawlError::InvalidTransition {
                task_id: id,
                from: task.state,
                to: next,
            });
        }
        task.state = next;
        Ok(task)
    }
}
