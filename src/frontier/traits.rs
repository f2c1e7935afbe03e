//! Frontier store trait and error types
//!
//! This module defines the trait interface for frontier backends and
//! associated error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during frontier operations
#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("Corrupt frontier entry for {url}: {message}")]
    CorruptEntry { url: String, message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for frontier operations
pub type FrontierResult<T> = Result<T, FrontierError>;

/// Trait for frontier backend implementations
///
/// Keys are canonical URL strings produced by `normalize_url`. Implementations
/// must be safe to share across tasks: every method takes `&self` and
/// `insert_if_absent` must decide and insert as one atomic step.
pub trait FrontierStore: Send + Sync {
    /// Records `url` if it has never been seen
    ///
    /// # Returns
    ///
    /// `true` if the URL was newly recorded, `false` if it was already present
    fn insert_if_absent(&self, url: &str, first_seen_at: DateTime<Utc>) -> FrontierResult<bool>;

    /// Checks whether `url` has been recorded
    fn contains(&self, url: &str) -> FrontierResult<bool>;

    /// Gets the time `url` was first recorded
    fn first_seen(&self, url: &str) -> FrontierResult<Option<DateTime<Utc>>>;

    /// Marks `url` as finished (completed or dead-lettered)
    ///
    /// Does nothing if the URL is unknown or already finished.
    fn mark_finished(&self, url: &str, finished_at: DateTime<Utc>) -> FrontierResult<()>;

    /// Lists recorded URLs not yet finished, oldest first
    fn unfinished(&self) -> FrontierResult<Vec<String>>;

    /// Counts recorded URLs
    fn count(&self) -> FrontierResult<u64>;

    /// Forgets every recorded URL
    ///
    /// Only used to start a fresh crawl; never called while a coordinator runs.
    fn clear(&self) -> FrontierResult<()>;
}
