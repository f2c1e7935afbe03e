//! Task records owned by the coordinator

use crate::state::TaskState;
use crate::url::NormalizedUrl;
use chrono::{DateTime, Utc};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Unique task identifier, assigned at creation and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(TaskId)
    }
}

/// One unit of crawl work
///
/// Workers never touch a `Task`; they emit messages and the coordinator applies
/// the resulting transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub url: NormalizedUrl,
    pub state: TaskState,
    /// Worker holding the task; `None` unless dispatched
    pub assigned_worker: Option<String>,
    /// Attempt number of the current or next dispatch (0 before the first dispatch)
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Workers whose error reports without an attempt number were applied
    pub(crate) error_reporters: Vec<String>,
}

impl Task {
    pub(crate) fn new(id: TaskId, url: NormalizedUrl, now: DateTime<Utc>) -> Self {
        Self {
            id,
            url,
            state: TaskState::Queued,
            assigned_worker: None,
            attempt: 0,
            created_at: now,
            dispatched_at: None,
            last_heartbeat_at: None,
            error_reporters: Vec::new(),
        }
    }

    /// Returns true if the task is dispatched to `worker`
    pub fn is_held_by(&self, worker: &str) -> bool {
        self.state == TaskState::Dispatched && self.assigned_worker.as_deref() == Some(worker)
    }

    /// Time since the task's timeout clock was last reset
    pub fn silence(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_heartbeat_at.map(|at| now - at)
    }
}
