//! Dashboard snapshots of coordinator state
//!
//! A snapshot is built under the coordinator lock in one pass and then
//! published or printed without holding it.

use crate::coordinator::liveness::WorkerRegistry;
use crate::coordinator::task_table::TaskTable;
use crate::state::TaskState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time view of the crawl, published on `crawler-dashboard`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: i64,

    /// Workers heard from within the heartbeat timeout
    pub active_crawlers: Vec<String>,

    /// Workers silent for longer than the heartbeat timeout
    pub failed_crawlers: Vec<String>,

    /// State of every non-terminal task, keyed by task id
    pub task_status: BTreeMap<String, String>,

    /// Task count per state, terminal states included
    pub state_counts: BTreeMap<String, u64>,

    pub crawled_urls: u64,
    pub indexed_urls: u64,
    pub error_count: u64,
    pub timeout_count: u64,
    pub dead_lettered: u64,
    pub queued: usize,
    pub in_flight: usize,

    /// Number of URLs ever admitted to the frontier
    pub frontier_size: u64,
}

impl DashboardSnapshot {
    /// Builds a snapshot from the task and heartbeat tables
    pub fn capture(
        tasks: &TaskTable,
        workers: &WorkerRegistry,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Self {
        let counters = tasks.counters();

        let task_status = tasks
            .iter()
            .map(|task| (task.id.to_string(), task.state.to_string()))
            .collect();

        let state_counts = tasks
            .state_counts()
            .into_iter()
            .map(|(state, count)| (state.to_string(), count))
            .collect();

        Self {
            generated_at: now.timestamp(),
            active_crawlers: workers.active(now, timeout),
            failed_crawlers: workers.suspected(now, timeout),
            task_status,
            state_counts,
            crawled_urls: counters.completed,
            indexed_urls: counters.indexed,
            error_count: counters.error_results,
            timeout_count: counters.timeouts,
            dead_lettered: counters.dead_lettered,
            queued: tasks.queued_len(),
            in_flight: tasks.in_flight(None),
            frontier_size: 0,
        }
    }

    /// Count for one state, zero if absent
    pub fn count(&self, state: TaskState) -> u64 {
        self.state_counts
            .get(&state.to_string())
            .copied()
            .unwrap_or(0)
    }
}

/// Prints a snapshot to stdout in a formatted manner
pub fn print_dashboard(snapshot: &DashboardSnapshot) {
    println!("=== Crawl Dashboard ===\n");

    println!("Workers:");
    println!("  Active: {}", format_list(&snapshot.active_crawlers));
    println!("  Failed: {}", format_list(&snapshot.failed_crawlers));
    println!();

    println!("Tasks by State:");
    let total: u64 = snapshot.state_counts.values().sum();
    for state in TaskState::all_states() {
        let count = snapshot.count(state);
        let percentage = if total > 0 {
            (count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!();

    println!("Totals:");
    println!("  URLs in frontier: {}", snapshot.frontier_size);
    println!("  Crawled: {}", snapshot.crawled_urls);
    println!("  Indexed: {}", snapshot.indexed_urls);
    println!("  Error reports: {}", snapshot.error_count);
    println!("  Timeouts: {}", snapshot.timeout_count);
    println!("  Dead-lettered: {}", snapshot.dead_lettered);
}

fn format_list(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::normalize_url;

    #[test]
    fn test_capture_reflects_tables() {
        let now = Utc::now();
        let timeout = Duration::seconds(60);

        let mut tasks = TaskTable::new(None);
        let done = tasks.create(normalize_url("https://a.test/1").unwrap(), now);
        let pending = tasks.create(normalize_url("https://a.test/2").unwrap(), now);
        tasks.dispatch(done, "w1", now).unwrap();
        tasks.apply_result(done, "w1", Some(1), true).unwrap();
        tasks.record_indexed();

        let mut workers = WorkerRegistry::new();
        workers.record("w1", now, None);
        workers.record("w2", now - Duration::seconds(120), None);

        let snapshot = DashboardSnapshot::capture(&tasks, &workers, now, timeout);

        assert_eq!(snapshot.active_crawlers, vec!["w1"]);
        assert_eq!(snapshot.failed_crawlers, vec!["w2"]);
        assert_eq!(snapshot.crawled_urls, 1);
        assert_eq!(snapshot.indexed_urls, 1);
        assert_eq!(snapshot.queued, 1);
        assert_eq!(snapshot.task_status.len(), 1);
        assert_eq!(snapshot.task_status[&pending.to_string()], "queued");
        assert_eq!(snapshot.count(TaskState::Completed), 1);
        assert_eq!(snapshot.count(TaskState::Queued), 1);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = DashboardSnapshot {
            active_crawlers: vec!["w1".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["active_crawlers"], serde_json::json!(["w1"]));
        assert!(json.get("task_status").is_some());
        assert!(json.get("crawled_urls").is_some());
        assert!(json.get("indexed_urls").is_some());
    }
}
