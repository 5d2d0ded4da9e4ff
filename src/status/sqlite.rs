use rusqlite::{params, Connection, Result as SqlResult};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StatusEntry, StatusError, StatusSink};

/// Status entries in the dashboard's SQLite database.
///
/// A connection is opened per entry and closed straight after, so nothing
/// is held open between phases and the dashboard can read at any time.
#[derive(Debug, Clone)]
pub struct SqliteStatusSink {
    db_path: PathBuf,
}

impl SqliteStatusSink {
    /// Open (or create) the database and make sure `updates` has every
    /// column this sink writes
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StatusError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StatusError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&db_path)?;
        init_schema(&conn)?;
        debug!(path = %db_path.display(), "status database ready");
        Ok(Self { db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

fn init_schema(conn: &Connection) -> SqlResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS updates (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            type        TEXT NOT NULL,
            status      TEXT NOT NULL,
            message     TEXT,
            created_at  TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            status_code TEXT,
            progress    REAL
        )",
        [],
    )?;

    // Older dashboards created the table without these
    let columns = table_columns(conn, "updates")?;
    if !columns.iter().any(|c| c == "status_code") {
        conn.execute("ALTER TABLE updates ADD COLUMN status_code TEXT", [])?;
    }
    if !columns.iter().any(|c| c == "progress") {
        conn.execute("ALTER TABLE updates ADD COLUMN progress REAL", [])?;
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> SqlResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<SqlResult<Vec<_>>>()?;
    Ok(columns)
}

impl StatusSink for SqliteStatusSink {
    fn record(&self, entry: &StatusEntry) -> Result<(), StatusError> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO updates (type, status, message, created_at, status_code, progress)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.phase.as_str(),
                entry.status.as_str(),
                entry.message,
                entry.at.format("%Y-%m-%d %H:%M:%S").to_string(),
                entry.status.as_str(),
                entry.progress,
            ],
        )?;
        Ok(())
    }
}
