//! Worker heartbeat table
//!
//! Tracks when each worker was last heard from. A worker is active while its
//! last signal is within the heartbeat timeout and suspected once it is not;
//! suspected workers receive no new tasks but come back as soon as they speak.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Last known liveness of one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    /// Coordinator receipt time of the latest heartbeat or result
    pub last_seen_at: DateTime<Utc>,
    /// Timestamp the worker put in its latest heartbeat, seconds since the epoch
    pub reported_at: Option<i64>,
}

/// Heartbeat table keyed by worker id
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, WorkerHeartbeat>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a signal from `worker_id`
    ///
    /// Returns true if the worker was not known before.
    pub fn record(
        &mut self,
        worker_id: &str,
        now: DateTime<Utc>,
        reported_at: Option<i64>,
    ) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(entry) => {
                if now > entry.last_seen_at {
                    entry.last_seen_at = now;
                }
                if reported_at.is_some() {
                    entry.reported_at = reported_at;
                }
                false
            }
            None => {
                self.workers.insert(
                    worker_id.to_string(),
                    WorkerHeartbeat {
                        worker_id: worker_id.to_string(),
                        last_seen_at: now,
                        reported_at,
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerHeartbeat> {
        self.workers.get(worker_id)
    }

    /// Returns true if the worker was heard from within `timeout`
    pub fn is_active(&self, worker_id: &str, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.workers
            .get(worker_id)
            .is_some_and(|entry| now - entry.last_seen_at <= timeout)
    }

    /// Active worker ids, sorted
    pub fn active(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        self.workers
            .values()
            .filter(|entry| now - entry.last_seen_at <= timeout)
            .map(|entry| entry.worker_id.clone())
            .collect()
    }

    /// Suspected worker ids, sorted
    pub fn suspected(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        self.workers
            .values()
            .filter(|entry| now - entry.last_seen_at > timeout)
            .map(|entry| entry.worker_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
