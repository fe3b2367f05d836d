//! Durable job storage over the relational store.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Row;

use janus_domain::{Error, Result};
use janus_store::Database;

use crate::job::{compute_next_run, CronJob, CronRun, ScheduleKind};

/// Input for `add` / `upsert_by_name`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub schedule_kind: ScheduleKind,
    pub schedule_value: String,
    pub timezone: Option<String>,
    pub task: String,
    pub enabled: bool,
}

impl NewJob {
    pub fn new(name: &str, kind: ScheduleKind, value: &str, task: &str) -> Self {
        Self {
            name: name.to_string(),
            schedule_kind: kind,
            schedule_value: value.to_string(),
            timezone: None,
            task: task.to_string(),
            enabled: true,
        }
    }
}

/// Partial update; `None` fields are left unchanged. The next run time
/// is always recomputed.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub name: Option<String>,
    pub schedule_kind: Option<ScheduleKind>,
    pub schedule_value: Option<String>,
    pub timezone: Option<String>,
    pub task: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Clone)]
pub struct CronStore {
    db: Database,
}

fn ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<CronJob> {
    let kind_raw: String = row.get(2)?;
    Ok(CronJob {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule_kind: ScheduleKind::parse(&kind_raw).unwrap_or(ScheduleKind::At),
        schedule_value: row.get(3)?,
        timezone: row.get(4)?,
        task: row.get(5)?,
        enabled: row.get::<_, i64>(6)? != 0,
        last_run_at: row.get::<_, Option<i64>>(7)?.map(from_ms),
        next_run_at: row.get::<_, Option<i64>>(8)?.map(from_ms),
        last_status: row.get(9)?,
        last_error: row.get(10)?,
        consecutive_errors: row.get::<_, i64>(11)? as u32,
        created_at: from_ms(row.get(12)?),
    })
}

const JOB_COLUMNS: &str = "id, name, schedule_kind, schedule_value, timezone, task, enabled,
     last_run_at, next_run_at, last_status, last_error, consecutive_errors, created_at";

impl CronStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn add(&self, new: NewJob) -> Result<CronJob> {
        let now = Utc::now();
        let next = compute_next_run(
            new.schedule_kind,
            &new.schedule_value,
            new.timezone.as_deref(),
            None,
            now,
        );

        let job_name = new.name.clone();
        let id = self
            .db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO cron_jobs
                         (name, schedule_kind, schedule_value, timezone, task, enabled,
                          next_run_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        new.name,
                        new.schedule_kind.as_str(),
                        new.schedule_value,
                        new.timezone,
                        new.task,
                        new.enabled as i64,
                        next.map(ms),
                        ms(now),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        tracing::info!(id, name = %job_name, "cron job added");
        self.get(id)
            .await?
            .ok_or_else(|| Error::Database("job vanished after insert".into()))
    }

    /// Insert, or patch the existing job with the same name (same id).
    pub async fn upsert_by_name(&self, new: NewJob) -> Result<CronJob> {
        let existing_id = {
            let name = new.name.clone();
            self.db
                .call(move |conn| {
                    conn.query_row(
                        "SELECT id FROM cron_jobs WHERE name = ?1",
                        [name],
                        |row| row.get::<_, i64>(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })
                })
                .await?
        };

        match existing_id {
            Some(id) => {
                let patch = JobPatch {
                    name: None,
                    schedule_kind: Some(new.schedule_kind),
                    schedule_value: Some(new.schedule_value),
                    timezone: new.timezone,
                    task: Some(new.task),
                    enabled: Some(new.enabled),
                };
                self.update(id, patch)
                    .await?
                    .ok_or_else(|| Error::Database("job vanished during upsert".into()))
            }
            None => self.add(new).await,
        }
    }

    pub async fn update(&self, id: i64, patch: JobPatch) -> Result<Option<CronJob>> {
        let Some(current) = self.get(id).await? else {
            return Ok(None);
        };

        let kind = patch.schedule_kind.unwrap_or(current.schedule_kind);
        let value = patch
            .schedule_value
            .unwrap_or_else(|| current.schedule_value.clone());
        let timezone = patch.timezone.or_else(|| current.timezone.clone());
        let name = patch.name.unwrap_or_else(|| current.name.clone());
        let task = patch.task.unwrap_or_else(|| current.task.clone());
        let enabled = patch.enabled.unwrap_or(current.enabled);
        let next = compute_next_run(
            kind,
            &value,
            timezone.as_deref(),
            current.last_run_at,
            Utc::now(),
        );

        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE cron_jobs
                     SET name = ?1, schedule_kind = ?2, schedule_value = ?3, timezone = ?4,
                         task = ?5, enabled = ?6, next_run_at = ?7
                     WHERE id = ?8",
                    rusqlite::params![
                        name,
                        kind.as_str(),
                        value,
                        timezone,
                        task,
                        enabled as i64,
                        next.map(ms),
                        id,
                    ],
                )?;
                Ok(())
            })
            .await?;
        self.get(id).await
    }

    pub async fn remove(&self, id: i64) -> Result<bool> {
        let removed = self
            .db
            .call(move |conn| conn.execute("DELETE FROM cron_jobs WHERE id = ?1", [id]))
            .await?;
        Ok(removed > 0)
    }

    pub async fn get(&self, id: i64) -> Result<Option<CronJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM cron_jobs WHERE id = ?1");
        self.db
            .call(move |conn| {
                conn.query_row(&sql, [id], |row| row_to_job(row))
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })
            })
            .await
    }

    pub async fn list(&self, include_disabled: bool) -> Result<Vec<CronJob>> {
        let sql = if include_disabled {
            format!("SELECT {JOB_COLUMNS} FROM cron_jobs ORDER BY id")
        } else {
            format!("SELECT {JOB_COLUMNS} FROM cron_jobs WHERE enabled = 1 ORDER BY id")
        };
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| row_to_job(row))?;
                rows.collect()
            })
            .await
    }

    /// Enabled jobs whose next run time has arrived.
    pub async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<CronJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM cron_jobs
             WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at"
        );
        let cutoff = ms(now);
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([cutoff], |row| row_to_job(row))?;
                rows.collect()
            })
            .await
    }

    /// Record one firing atomically: the job-state update and the run
    /// insert share a transaction.
    pub async fn record_result(
        &self,
        job: &CronJob,
        started_at: DateTime<Utc>,
        duration: std::time::Duration,
        error: Option<String>,
    ) -> Result<()> {
        let next = compute_next_run(
            job.schedule_kind,
            &job.schedule_value,
            job.timezone.as_deref(),
            Some(started_at),
            Utc::now(),
        );
        let id = job.id;
        let ok = error.is_none();
        let consecutive = if ok { 0 } else { job.consecutive_errors + 1 };
        let duration_ms = duration.as_millis() as i64;

        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "UPDATE cron_jobs
                     SET last_run_at = ?1, next_run_at = ?2, last_status = ?3,
                         last_error = ?4, consecutive_errors = ?5
                     WHERE id = ?6",
                    rusqlite::params![
                        ms(started_at),
                        next.map(ms),
                        if ok { "ok" } else { "error" },
                        error,
                        consecutive as i64,
                        id,
                    ],
                )?;
                tx.execute(
                    "INSERT INTO cron_runs (job_id, status, error, started_at, duration_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        id,
                        if ok { "ok" } else { "error" },
                        error,
                        ms(started_at),
                        duration_ms,
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Most recent runs for a job, newest first.
    pub async fn run_history(&self, job_id: i64, limit: usize) -> Result<Vec<CronRun>> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, job_id, status, error, started_at, duration_ms
                     FROM cron_runs
                     WHERE job_id = ?1
                     ORDER BY started_at DESC, id DESC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(rusqlite::params![job_id, limit as i64], |row| {
                    Ok(CronRun {
                        id: row.get(0)?,
                        job_id: row.get(1)?,
                        status: row.get(2)?,
                        error: row.get(3)?,
                        started_at: from_ms(row.get(4)?),
                        duration_ms: row.get::<_, i64>(5)? as u64,
                    })
                })?;
                rows.collect()
            })
            .await
    }
}
