//! Frontier & dedup store
//!
//! The frontier is the set of every URL the crawl has ever been aware of. Its
//! `admit` operation is the single dedup decision point: a URL present in the
//! frontier is never admitted again, whatever the outcome of its crawl.
//!
//! Entries are marked finished once their task completes or is dead-lettered.
//! A coordinator restarted over a durable backing requeues the unfinished ones.
//!
//! Backends:
//! - `MemoryFrontier`: process-local map (default)
//! - `SqliteFrontier`: durable set that survives coordinator restarts

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryFrontier;
pub use sqlite::SqliteFrontier;
pub use traits::{FrontierError, FrontierResult, FrontierStore};

use crate::url::{normalize_url, NormalizedUrl};
use chrono::{DateTime, Utc};
use std::path::Path;

/// A URL known to the crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub url: NormalizedUrl,
    pub first_seen_at: DateTime<Utc>,
}

/// Dedup guard over a pluggable backend
///
/// Accepts only [`NormalizedUrl`] keys, so normalization always happens before
/// an admit or contains check.
pub struct Frontier {
    store: Box<dyn FrontierStore>,
}

impl Frontier {
    /// Wraps an existing backend
    pub fn new(store: Box<dyn FrontierStore>) -> Self {
        Self { store }
    }

    /// Creates a frontier backed by process memory
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryFrontier::new()))
    }

    /// Opens a frontier backed by a SQLite file
    pub fn open_sqlite(path: &Path) -> FrontierResult<Self> {
        Ok(Self::new(Box::new(SqliteFrontier::new(path)?)))
    }

    /// Admits a URL into the frontier
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The URL was newly admitted and should become a task
    /// * `Ok(false)` - The URL was already known
    pub fn admit(&self, url: &NormalizedUrl) -> FrontierResult<bool> {
        let admitted = self.store.insert_if_absent(url.as_str(), Utc::now())?;
        if admitted {
            tracing::trace!("Admitted {} into frontier", url);
        }
        Ok(admitted)
    }

    /// Checks whether a URL is already known
    pub fn contains(&self, url: &NormalizedUrl) -> FrontierResult<bool> {
        self.store.contains(url.as_str())
    }

    /// Looks up the frontier entry for a URL
    pub fn entry(&self, url: &NormalizedUrl) -> FrontierResult<Option<FrontierEntry>> {
        Ok(self
            .store
            .first_seen(url.as_str())?
            .map(|first_seen_at| FrontierEntry {
                url: url.clone(),
                first_seen_at,
            }))
    }

    /// Records that a URL's task reached a terminal state
    pub fn mark_finished(&self, url: &NormalizedUrl) -> FrontierResult<()> {
        self.store.mark_finished(url.as_str(), Utc::now())
    }

    /// Known URLs whose task never finished, oldest first
    pub fn unfinished(&self) -> FrontierResult<Vec<NormalizedUrl>> {
        self.store
            .unfinished()?
            .into_iter()
            .map(|raw| {
                normalize_url(&raw).map_err(|e| FrontierError::CorruptEntry {
                    url: raw.clone(),
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// Returns the number of known URLs
    pub fn len(&self) -> FrontierResult<u64> {
        self.store.count()
    }

    /// Returns whether no URL has been admitted yet
    pub fn is_empty(&self) -> FrontierResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Forgets every known URL (used by `--fresh` before a coordinator starts)
    pub fn clear(&self) -> FrontierResult<()> {
        self.store.clear()
    }
}
