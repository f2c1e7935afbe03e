//! In-memory frontier backend

use crate::frontier::traits::{FrontierResult, FrontierStore};
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy)]
struct Seen {
    first_seen_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

/// Frontier backend holding every seen URL in a process-local map
#[derive(Debug, Default)]
pub struct MemoryFrontier {
    entries: Mutex<HashMap<String, Seen>>,
}

impl MemoryFrontier {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Seen>> {
        // A panic elsewhere cannot leave the map half-updated: every write is a single insert.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrontierStore for MemoryFrontier {
    fn insert_if_absent(&self, url: &str, first_seen_at: DateTime<Utc>) -> FrontierResult<bool> {
        match self.entries().entry(url.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Seen {
                    first_seen_at,
                    finished_at: None,
                });
                Ok(true)
            }
        }
    }

    fn contains(&self, url: &str) -> FrontierResult<bool> {
        Ok(self.entries().contains_key(url))
    }

    fn first_seen(&self, url: &str) -> FrontierResult<Option<DateTime<Utc>>> {
        Ok(self.entries().get(url).map(|seen| seen.first_seen_at))
    }

    fn mark_finished(&self, url: &str, finished_at: DateTime<Utc>) -> FrontierResult<()> {
        if let Some(seen) = self.entries().get_mut(url) {
            seen.finished_at.get_or_insert(finished_at);
        }
        Ok(())
    }

    fn unfinished(&self) -> FrontierResult<Vec<String>> {
        let entries = self.entries();
        let mut pending: Vec<(&String, DateTime<Utc>)> = entries
            .iter()
            .filter(|(_, seen)| seen.finished_at.is_none())
            .map(|(url, seen)| (url, seen.first_seen_at))
            .collect();
        pending.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(pending.into_iter().map(|(url, _)| url.clone()).collect())
    }

    fn count(&self) -> FrontierResult<u64> {
        Ok(self.entries().len() as u64)
    }

    fn clear(&self) -> FrontierResult<()> {
        self.entries().clear();
        Ok(())
    }
}
