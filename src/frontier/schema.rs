//! Database schema definitions and migrations for the SQLite frontier backing

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Every normalized URL the crawl has ever admitted
CREATE TABLE IF NOT EXISTS frontier (
    url TEXT PRIMARY KEY NOT NULL,
    first_seen_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_frontier_finished ON frontier(finished_at);

-- Schema bookkeeping
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Current schema version, recorded in `schema_meta`
pub const SCHEMA_VERSION: u32 = 2;

/// Initializes the database schema
///
/// Safe to call on an existing database. Version 1 databases lack the
/// `finished_at` column; it is added and their entries count as unfinished.
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS frontier (
            url TEXT PRIMARY KEY NOT NULL,
            first_seen_at TEXT NOT NULL
        );",
    )?;
    if !has_column(conn, "frontier", "finished_at")? {
        conn.execute_batch("ALTER TABLE frontier ADD COLUMN finished_at TEXT;")?;
    }

    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT INTO schema_meta (key, value) VALUES ('version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

fn has_column(
    conn: &rusqlite::Connection,
    table: &str,
    column: &str,
) -> Result<bool, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
