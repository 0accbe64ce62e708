//! Sqlite persistence. Raw SQL with rusqlite, no ORM.

pub mod tasks;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::PathBuf;

/// Handle to the task database. Cheap to clone; each operation opens its
/// own connection, so the handle can be shared across worker tasks.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path).context("Failed to open database connection")?;
        migrate(&conn)?;

        Ok(Self { path })
    }

    /// Open the database at the default platform data location.
    pub fn open_default() -> Result<Self> {
        Self::new(crate::global::db_file()?)
    }

    pub fn conn(&self) -> Result<Connection> {
        Connection::open(&self.path).context("Failed to open database connection")
    }
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_key TEXT NOT NULL UNIQUE,
            execution_id TEXT,
            created_by_user_id TEXT,
            bot_type TEXT,
            meeting_title TEXT,
            status TEXT NOT NULL DEFAULT 'received',
            retry_count INTEGER NOT NULL DEFAULT 0,
            process_started_at TEXT,
            process_completed_at TEXT,
            last_error TEXT,
            meeting_start_time TEXT,
            meeting_end_time TEXT,
            audio_file_key TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create tasks table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
        [],
    )
    .context("Failed to create index on task status")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC)",
        [],
    )
    .context("Failed to create index on created_at")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transcript_segments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            speaker TEXT NOT NULL,
            start_ms INTEGER NOT NULL,
            end_ms INTEGER NOT NULL,
            text TEXT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create transcript_segments table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_segments_task ON transcript_segments(task_id)",
        [],
    )
    .context("Failed to create index on segment task_id")?;

    Ok(())
}
