//! Dispatch planning
//!
//! This module decides which queued task goes to which worker:
//! - Tasks leave the queue in FIFO order
//! - Workers are chosen round-robin among the currently active ones
//! - A worker at its in-flight limit is skipped
//! - A global in-flight ceiling, when set, stops the cycle early
//!
//! Planning only reserves tasks in the table; publishing the task messages is
//! the caller's job, done after the table lock is released.

use crate::coordinator::liveness::WorkerRegistry;
use crate::coordinator::task_table::{DispatchOrder, TaskTable};
use crate::Result;
use chrono::{DateTime, Duration, Utc};

/// In-flight limits applied while planning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    /// Maximum tasks dispatched to one worker at a time
    pub per_worker: usize,
    /// Maximum tasks dispatched across all workers, if bounded
    pub global: Option<usize>,
}

/// Round-robin dispatch planner
///
/// The cursor survives between cycles so that consecutive cycles continue the
/// rotation instead of always starting with the same worker.
#[derive(Debug)]
pub struct Scheduler {
    limits: DispatchLimits,
    cursor: usize,
}

impl Scheduler {
    pub fn new(limits: DispatchLimits) -> Self {
        Self { limits, cursor: 0 }
    }

    pub fn limits(&self) -> DispatchLimits {
        self.limits
    }

    /// Reserves as many queued tasks as the limits allow
    ///
    /// # Arguments
    ///
    /// * `tasks` - The task table; reserved tasks move to `Dispatched`
    /// * `workers` - The heartbeat table used to find active workers
    /// * `now` - Dispatch time recorded on each task
    /// * `timeout` - Silence after which a worker no longer receives work
    ///
    /// # Returns
    ///
    /// The dispatch orders to publish, in queue order. Empty if there are no
    /// queued tasks or no active worker with spare capacity.
    pub fn plan(
        &mut self,
        tasks: &mut TaskTable,
        workers: &WorkerRegistry,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<DispatchOrder>> {
        if tasks.queued_len() == 0 {
            return Ok(Vec::new());
        }

        let active = workers.active(now, timeout);
        if active.is_empty() {
            tracing::debug!(
                "{} tasks queued but no active workers, deferring dispatch",
                tasks.queued_len()
            );
            return Ok(Vec::new());
        }

        let mut loads = tasks.in_flight_by_worker();
        let mut total: usize = loads.values().sum();
        let mut orders = Vec::new();

        while let Some(task_id) = tasks.next_queued() {
            if self.limits.global.is_some_and(|global| total >= global) {
                tracing::trace!("Global in-flight limit reached ({})", total);
                break;
            }

            let Some(index) = self.next_worker(&active, |worker| {
                loads.get(worker).copied().unwrap_or(0) < self.limits.per_worker
            }) else {
                tracing::trace!("All active workers at capacity");
                break;
            };

            let worker = &active[index];
            let order = tasks.dispatch(task_id, worker, now)?;
            *loads.entry(worker.clone()).or_insert(0) += 1;
            total += 1;
            self.cursor = (index + 1) % active.len();
            orders.push(order);
        }

        Ok(orders)
    }

    /// Finds the first worker at or after the cursor that has capacity
    fn next_worker<F>(&self, active: &[String], has_capacity: F) -> Option<usize>
    where
        F: Fn(&str) -> bool,
    {
        let len = active.len();
        (0..len)
            .map(|offset| (self.cursor + offset) % len)
            .find(|&index| has_capacity(&active[index]))
    }
}
