//! Embedded relational store.
//!
//! One SQLite database holds memory chunks (with an FTS5 mirror),
//! learner records, and the scheduler's jobs and runs. The schema is
//! evolved by a numbered migration list; the applied count lives in
//! `PRAGMA user_version`. All access goes through [`Database::call`],
//! which runs the closure on a blocking thread against the single
//! connection. SQLite serializes the writes, and explicit transactions
//! make multi-row operations atomic.
//!
//! Callers are expected to degrade gracefully when `open` fails: the
//! session log is filesystem-native anyway, the learner falls back to a
//! line-delimited append file, and the scheduler disables durable
//! scheduling.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use janus_domain::{Error, Result};

/// Ordered migration scripts. Never reorder or edit an applied entry;
/// append a new script instead.
const MIGRATIONS: &[&str] = &[
    // 001: initial schema.
    r#"
    CREATE TABLE memory_chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        heading TEXT NOT NULL,
        content TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        embedding BLOB,
        owner TEXT NOT NULL DEFAULT 'shared',
        scope TEXT NOT NULL DEFAULT 'global',
        scope_id TEXT
    );
    CREATE INDEX idx_memory_chunks_origin ON memory_chunks(source, owner, scope);

    CREATE VIRTUAL TABLE memory_fts USING fts5(
        heading, content,
        content='memory_chunks', content_rowid='id'
    );
    CREATE TRIGGER memory_chunks_ai AFTER INSERT ON memory_chunks BEGIN
        INSERT INTO memory_fts(rowid, heading, content)
        VALUES (new.id, new.heading, new.content);
    END;
    CREATE TRIGGER memory_chunks_ad AFTER DELETE ON memory_chunks BEGIN
        INSERT INTO memory_fts(memory_fts, rowid, heading, content)
        VALUES ('delete', old.id, old.heading, old.content);
    END;
    CREATE TRIGGER memory_chunks_au AFTER UPDATE ON memory_chunks BEGIN
        INSERT INTO memory_fts(memory_fts, rowid, heading, content)
        VALUES ('delete', old.id, old.heading, old.content);
        INSERT INTO memory_fts(rowid, heading, content)
        VALUES (new.id, new.heading, new.content);
    END;

    CREATE TABLE learner_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_excerpt TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        iterations INTEGER NOT NULL,
        tool_calls INTEGER NOT NULL,
        tokens_used INTEGER NOT NULL,
        outcome TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE cron_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        schedule_kind TEXT NOT NULL,
        schedule_value TEXT NOT NULL,
        timezone TEXT,
        task TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_run_at INTEGER,
        next_run_at INTEGER,
        last_status TEXT,
        last_error TEXT,
        consecutive_errors INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE cron_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL REFERENCES cron_jobs(id) ON DELETE CASCADE,
        status TEXT NOT NULL,
        error TEXT,
        started_at INTEGER NOT NULL,
        duration_ms INTEGER NOT NULL
    );
    CREATE INDEX idx_cron_runs_job ON cron_runs(job_id, started_at);
    "#,
];

/// Handle to the embedded store. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating parent directories as needed), enable WAL and
    /// foreign keys, and apply outstanding migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn, Some(path))
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;

        let mut conn = conn;
        let applied = apply_migrations(&mut conn)?;
        if applied > 0 {
            tracing::info!(
                applied,
                path = %path.map(|p| p.display().to_string()).unwrap_or_else(|| ":memory:".into()),
                "applied database migrations"
            );
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard).map_err(db_err)
        })
        .await
        .map_err(|e| Error::Database(format!("blocking task failed: {e}")))?
    }

    /// Synchronous variant for boot-time and test setup paths.
    pub fn call_sync<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R>,
    {
        let mut guard = self.conn.lock();
        f(&mut guard).map_err(db_err)
    }
}

fn apply_migrations(conn: &mut Connection) -> Result<usize> {
    let current: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(db_err)?;
    let current = current as usize;

    if current > MIGRATIONS.len() {
        return Err(Error::Database(format!(
            "database schema version {current} is newer than this build ({})",
            MIGRATIONS.len()
        )));
    }

    let mut applied = 0;
    for (idx, script) in MIGRATIONS.iter().enumerate().skip(current) {
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute_batch(script).map_err(db_err)?;
        tx.pragma_update(None, "user_version", (idx + 1) as i64)
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        applied += 1;
    }
    Ok(applied)
}

pub fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}
