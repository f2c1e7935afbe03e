//! Crawl-Relay: a crawl task coordinator
//!
//! This crate distributes URL-fetch work across a pool of crawler workers over an
//! at-least-once publish/subscribe channel, tracks worker liveness through heartbeats,
//! reassigns work that appears stuck, and deduplicates discovered URLs so the crawl
//! frontier never dispatches the same page twice.

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod frontier;
pub mod state;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Main error type for Crawl-Relay operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Frontier error: {0}")]
    Frontier(#[from] frontier::FrontierError),

    #[error("Channel error: {0}")]
    Channel(#[from] channel::ChannelError),

    #[error("Message error: {0}")]
    Message(#[from] channel::MessageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid state transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: coordinator::TaskId,
        from: state::TaskState,
        to: state::TaskState,
    },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Crawl-Relay operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{Coordinator, DashboardSnapshot, TaskId};
pub use frontier::Frontier;
pub use state::TaskState;
pub use url::{normalize_url, NormalizedUrl};
