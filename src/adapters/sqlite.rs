//! Shared read-only SQLite plumbing for DB-backed adapters.
//!
//! One connection per source, opened lazily in read-only mode. Before reuse
//! the connection is pinged; a failed ping closes and reopens it. The handle
//! mutex covers open/ping/query/close — `rusqlite::Connection` is not
//! shareable across threads without it — and is never held across anything
//! else. `busy_timeout` bounds every call so a WAL write during a rescan
//! cannot stall `sessions()` past the deadline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use notify::RecursiveMode;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use crate::error::IngestError;
use crate::model::{Event, EventKind, WatchScope};
use crate::watch::{RawKind, WatchConfig};

const QUERY_DEADLINE: Duration = Duration::from_secs(2);

pub(crate) struct SqliteSource {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteSource {
    pub fn new(path: PathBuf) -> SqliteSource {
        SqliteSource {
            path,
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Run `f` against the live connection, opening or reopening as needed.
    /// A DB that will not open is catastrophic and propagates.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();

        if let Some(conn) = guard.as_ref()
            && conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_err()
        {
            tracing::debug!(path = %self.path.display(), "sqlite ping failed, reopening");
            *guard = None;
        }

        if guard.is_none() {
            let conn = Connection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| IngestError::SourceUnavailable {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
            conn.busy_timeout(QUERY_DEADLINE)
                .map_err(|e| IngestError::SourceUnavailable {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })?;
            *guard = Some(conn);
        }

        match guard.as_ref() {
            Some(conn) => Ok(f(conn)?),
            None => Err(IngestError::SourceUnavailable {
                path: self.path.clone(),
                reason: "connection closed".into(),
            }
            .into()),
        }
    }

    /// Drop the connection. Safe to call repeatedly; the next `with_conn`
    /// reopens.
    pub fn close(&self) {
        *self.conn.lock() = None;
    }
}

/// Watch config for a SQLite source in WAL mode: observe the DB file and its
/// `-wal` sibling in the parent directory. WAL commits arrive in bursts, so
/// the debounce slot is doing real work here. The source cannot be narrowed
/// to one session, so events carry an empty session id and global scope.
pub(crate) fn wal_watch_config(db_path: &Path) -> Result<WatchConfig> {
    let parent = db_path
        .parent()
        .ok_or_else(|| IngestError::WatchSetup {
            path: db_path.to_path_buf(),
            reason: "database path has no parent directory".into(),
        })?
        .to_path_buf();

    let db_name = db_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let wal_name = format!("{db_name}-wal");

    let classify = Box::new(move |kind: RawKind, path: &Path| {
        if kind == RawKind::Remove {
            return None;
        }
        let name = path.file_name().and_then(|n| n.to_str())?;
        if name != db_name && name != wal_name {
            return None;
        }
        Some(
            Event::new(EventKind::SessionUpdated, "")
                .with_payload(serde_json::json!({ "path": path.display().to_string() })),
        )
    });

    let mut config = WatchConfig::new(vec![(parent, RecursiveMode::NonRecursive)], classify);
    config.scope = WatchScope::Global;
    Ok(config)
}
