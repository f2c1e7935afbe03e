/// Task state definitions for tracking crawl work
///
/// This module defines the closed set of states a task can be in and the
/// transitions the coordinator is allowed to apply between them.
use std::fmt;

/// Represents the current lifecycle state of a crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskState {
    // ===== Active States =====
    /// Task is waiting in the dispatch queue
    Queued,

    /// Task message has been sent to a worker and a result is pending
    Dispatched,

    // ===== Transient States =====
    /// The worker reported an error; the task is requeued immediately
    Failed,

    /// The liveness sweep found no heartbeat within the timeout; requeued immediately
    TimedOut,

    // ===== Terminal States =====
    /// The worker reported success
    Completed,

    /// The task exhausted the configured attempt ceiling
    DeadLettered,
}

impl TaskState {
    /// Returns true if this is a terminal state (no further processing)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLettered)
    }

    /// Returns true if the state machine permits moving from `self` to `next`
    ///
    /// | From | To |
    /// |------|----|
    /// | Queued | Dispatched |
    /// | Dispatched | Completed, Failed, TimedOut, Queued (send rolled back) |
    /// | Failed, TimedOut | Queued, DeadLettered |
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, Dispatched)
                | (Dispatched, Completed)
                | (Dispatched, Failed)
                | (Dispatched, TimedOut)
                | (Dispatched, Queued)
                | (Failed, Queued)
                | (Failed, DeadLettered)
                | (TimedOut, Queued)
                | (TimedOut, DeadLettered)
        )
    }

    /// Converts the task state to its wire/database string representation
    ///
    /// This is the form used in the dashboard's `task_status` map.
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Completed => "completed",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Parses a task state from its string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "dispatched" => Some(Self::Dispatched),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            "completed" => Some(Self::Completed),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }

    /// Returns all possible task states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Dispatched,
            Self::Failed,
            Self::TimedOut,
            Self::Completed,
            Self::DeadLettered,
        ]
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
