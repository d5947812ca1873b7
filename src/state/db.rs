// SQLite database setup and migrations
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Label serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Folder {0} is already in the dataset")]
    DuplicateFolder(String),
    #[error("Feature length mismatch: dataset holds {expected} values per record, got {found}")]
    FeatureLengthMismatch { expected: usize, found: usize },
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
    #[error("Invalid shuffle parameters: {0}")]
    InvalidShuffle(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Open (or create) a dataset database file.
/// With `overwrite`, an existing file is removed first.
pub fn open_db(path: &Path, overwrite: bool) -> DbResult<Connection> {
    if overwrite && path.exists() {
        log::info!("Overwriting dataset {}", path.display());
        std::fs::remove_file(path)?;
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// In-memory dataset, used by tests and dry runs
pub fn open_in_memory_db() -> DbResult<Connection> {
    let conn = Connection::open_in_memory()?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> DbResult<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version < 1 {
        log::debug!("Applying dataset schema v1");
        migration_v1(conn)?;
        conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [1])?;
    }

    Ok(())
}

fn migration_v1(conn: &Connection) -> DbResult<()> {
    // Key/value settings: feature length, config fingerprint
    conn.execute(
        "CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS folders (
            name TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            appended_at TEXT NOT NULL,
            record_count INTEGER NOT NULL
        )",
        [],
    )?;

    // position is dense 0..n and defines the on-disk order
    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            folder TEXT NOT NULL,
            position INTEGER NOT NULL,
            labels TEXT NOT NULL,
            features BLOB NOT NULL,
            FOREIGN KEY (folder) REFERENCES folders(name) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_records_position ON records(position)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_folder ON records(folder)",
        [],
    )?;

    Ok(())
}
