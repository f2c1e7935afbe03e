//! SQLite frontier backend
//!
//! Persists the dedup set so a restarted coordinator never re-dispatches a URL
//! admitted by an earlier run.

use crate::frontier::schema::initialize_schema;
use crate::frontier::traits::{FrontierError, FrontierResult, FrontierStore};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// SQLite frontier backend
pub struct SqliteFrontier {
    conn: Mutex<Connection>,
}

impl SqliteFrontier {
    /// Opens (or creates) a frontier database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> FrontierResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> FrontierResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrontierStore for SqliteFrontier {
    fn insert_if_absent(&self, url: &str, first_seen_at: DateTime<Utc>) -> FrontierResult<bool> {
        // The primary key makes check-and-insert a single statement.
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO frontier (url, first_seen_at) VALUES (?1, ?2)",
            params![url, first_seen_at.to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }

    fn contains(&self, url: &str) -> FrontierResult<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM frontier WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn first_seen(&self, url: &str) -> FrontierResult<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT first_seen_at FROM frontier WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| FrontierError::CorruptEntry {
                    url: url.to_string(),
                    message: e.to_string(),
                })
        })
        .transpose()
    }

    fn mark_finished(&self, url: &str, finished_at: DateTime<Utc>) -> FrontierResult<()> {
        self.conn().execute(
            "UPDATE frontier SET finished_at = ?2 WHERE url = ?1 AND finished_at IS NULL",
            params![url, finished_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn unfinished(&self) -> FrontierResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT url FROM frontier WHERE finished_at IS NULL ORDER BY first_seen_at, url",
        )?;
        let urls = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    fn count(&self) -> FrontierResult<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM frontier", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn clear(&self) -> FrontierResult<()> {
        self.conn().execute("DELETE FROM frontier", [])?;
        Ok(())
    }
}
