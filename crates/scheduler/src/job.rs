//! Job model and next-run computation.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::cron::{parse_tz, CronExpr};

/// Minimum wait between attempts after consecutive failures, indexed
/// by `min(consecutive_errors - 1, 4)`.
pub const BACKOFF: [Duration; 5] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(60 * 60),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    /// Fire once at an absolute timestamp.
    At,
    /// Fire every N milliseconds.
    Every,
    /// Fire on a 5-field cron expression.
    Cron,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::At => "at",
            ScheduleKind::Every => "every",
            ScheduleKind::Cron => "cron",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "at" => Some(ScheduleKind::At),
            "every" => Some(ScheduleKind::Every),
            "cron" => Some(ScheduleKind::Cron),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CronJob {
    pub id: i64,
    pub name: String,
    pub schedule_kind: ScheduleKind,
    pub schedule_value: String,
    pub timezone: Option<String>,
    pub task: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
    pub consecutive_errors: u32,
    pub created_at: DateTime<Utc>,
}

/// One row of run history.
#[derive(Debug, Clone, Serialize)]
pub struct CronRun {
    pub id: i64,
    pub job_id: i64,
    pub status: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Deterministic next-run computation.
///
/// - `at`: the timestamp itself while still in the future, else `None`.
/// - `every`: `max(now, last_run_at ?? now) + interval`.
/// - `cron`: next occurrence after `now` in the job's timezone; an
///   invalid expression logs a warning and returns `None`.
pub fn compute_next_run(
    kind: ScheduleKind,
    value: &str,
    timezone: Option<&str>,
    last_run_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match kind {
        ScheduleKind::At => {
            let at = parse_timestamp(value)?;
            (at > now).then_some(at)
        }
        ScheduleKind::Every => {
            let interval_ms: i64 = match value.parse() {
                Ok(ms) if ms > 0 => ms,
                _ => {
                    tracing::warn!(value, "invalid interval, job will not fire");
                    return None;
                }
            };
            let base = last_run_at.map_or(now, |last| last.max(now));
            Some(base + chrono::Duration::milliseconds(interval_ms))
        }
        ScheduleKind::Cron => {
            let Some(expr) = CronExpr::parse(value) else {
                tracing::warn!(value, "invalid cron expression, job will not fire");
                return None;
            };
            expr.next_after(now, parse_tz(timezone))
        }
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // Bare local-less timestamps are read as UTC.
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    tracing::warn!(value, "unparseable timestamp");
    None
}

/// Whether a job with failures has waited out its backoff window.
pub fn backoff_satisfied(job: &CronJob, now: DateTime<Utc>) -> bool {
    if job.consecutive_errors == 0 {
        return true;
    }
    let Some(last_run) = job.last_run_at else {
        return true;
    };
    let window = BACKOFF[(job.consecutive_errors as usize - 1).min(BACKOFF.len() - 1)];
    now.signed_duration_since(last_run)
        >= chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero())
}
