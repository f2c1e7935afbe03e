use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Crawl-Relay
///
/// Every section is optional; missing keys fall back to the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
}

/// Coordinator behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Seconds without a heartbeat before a dispatched task is reassigned
    #[serde(rename = "heartbeat-timeout")]
    pub heartbeat_timeout: u64,

    /// Seconds between liveness sweeps
    #[serde(rename = "sweep-interval")]
    pub sweep_interval: u64,

    /// Milliseconds between dispatch cycles when nothing wakes the dispatcher earlier
    #[serde(rename = "dispatch-interval")]
    pub dispatch_interval: u64,

    /// Seconds between dashboard snapshots
    #[serde(rename = "dashboard-interval")]
    pub dashboard_interval: u64,

    /// Maximum number of tasks concurrently dispatched to one worker
    #[serde(rename = "max-in-flight-per-worker")]
    pub max_in_flight_per_worker: u32,

    /// Maximum number of tasks concurrently dispatched across all workers
    #[serde(rename = "max-in-flight")]
    pub max_in_flight: Option<u32>,

    /// Attempt ceiling after which a task is dead-lettered (unbounded when absent)
    #[serde(rename = "max-attempts")]
    pub max_attempts: Option<u32>,
}

impl CoordinatorConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval)
    }

    pub fn dashboard_interval(&self) -> Duration {
        Duration::from_secs(self.dashboard_interval)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: 60,
            sweep_interval: 10,
            dispatch_interval: 250,
            dashboard_interval: 5,
            max_in_flight_per_worker: 4,
            max_in_flight: None,
            max_attempts: None,
        }
    }
}

/// Fetch worker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Upper bound on a single page fetch (seconds)
    #[serde(rename = "request-timeout")]
    pub request_timeout: u64,

    /// Seconds between heartbeats, both idle and while a fetch is in flight
    #[serde(rename = "heartbeat-interval")]
    pub heartbeat_interval: u64,

    /// Maximum number of discovered links reported per page
    #[serde(rename = "max-links-per-page")]
    pub max_links_per_page: usize,

    /// User-Agent header sent with every fetch
    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

impl WorkerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            request_timeout: 10,
            heartbeat_interval: 5,
            max_links_per_page: 10,
            user_agent: format!(
                "Mozilla/5.0 (compatible; CrawlRelay/{})",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

/// Frontier configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FrontierConfig {
    /// Seed URLs admitted at startup
    pub seeds: Vec<String>,

    /// Path to a SQLite database backing the frontier; in-memory when absent
    #[serde(rename = "database-path")]
    pub database_path: Option<String>,
}

/// In-memory channel configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Seconds an unacknowledged delivery stays leased before redelivery
    #[serde(rename = "ack-deadline")]
    pub ack_deadline: u64,
}

impl ChannelConfig {
    pub fn ack_deadline(&self) -> Duration {
        Duration::from_secs(self.ack_deadline)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { ack_deadline: 30 }
    }
}
