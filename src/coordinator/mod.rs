//! Crawl task coordinator
//!
//! This module contains the coordinator side of the crawl:
//! - Task table and lifecycle transitions (`task_table`)
//! - Worker heartbeat table (`liveness`)
//! - Round-robin dispatch planning (`scheduler`)
//! - Result/heartbeat ingestion, dispatch and sweep (`engine`)
//! - Background loops and ordered shutdown (`lifecycle`)
//! - Dashboard snapshots (`dashboard`)

mod dashboard;
mod engine;
mod lifecycle;
mod liveness;
mod scheduler;
mod task;
mod task_table;

pub use dashboard::{print_dashboard, DashboardSnapshot};
pub use engine::Coordinator;
pub use lifecycle::RunningCoordinator;
pub use liveness::{WorkerHeartbeat, WorkerRegistry};
pub use scheduler::{DispatchLimits, Scheduler};
pub use task::{Task, TaskId};
pub use task_table::{DispatchOrder, Reassignment, ResultOutcome, TaskCounters, TaskTable};
