use crate::schema::MIG_0001_INIT;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// SQLite-backed history store. Every operation opens its own connection so
/// callers on different threads never share one; WAL mode lets readers run
/// alongside the single writer.
pub struct SqliteHistory {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteHistory {
    pub fn open_or_create(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create db directory {}", parent.display()))?;
        }
        let store = SqliteHistory { path, busy_timeout };
        let conn = store.connect()?;
        migrate(&conn)?;
        debug!(path = %store.path.display(), "history database opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("open sqlite at {}", self.path.display()))?;
        conn.busy_timeout(self.busy_timeout)?;
        apply_pragmas(&conn)?;
        Ok(conn)
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "cache_size", -16384i64)?; // 16 MiB
    Ok(())
}

fn migrate(conn: &Connection) -> Result<()> {
    // naive: if port_history doesn't exist, apply 0001
    let exists: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name='port_history'",
        [],
        |r| r.get(0),
    )?;
    if exists == 0 {
        conn.execute_batch(MIG_0001_INIT).context("apply schema 0001")?;
    }
    Ok(())
}
