//! HEARTBEAT.md parsing and job synchronization.
//!
//! Format: a level-2 heading names the task, its bullet list provides
//! `- schedule: every <N><m|h|d>` (or a 5-field cron expression) and
//! `- task: <description>`. Tasks with unrecognized schedules are
//! skipped with a warning. Sync goes through upsert-by-name so edits
//! to the file update existing jobs in place.

use janus_domain::Result;

use crate::cron::CronExpr;
use crate::job::ScheduleKind;
use crate::store::{CronStore, NewJob};

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatTask {
    pub name: String,
    pub schedule_kind: ScheduleKind,
    pub schedule_value: String,
    pub task: String,
}

/// Parse `every <N><m|h|d>` into milliseconds.
fn parse_every(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let digits_end = raw.find(|c: char| !c.is_ascii_digit())?;
    let amount: u64 = raw[..digits_end].parse().ok()?;
    if amount == 0 {
        return None;
    }
    let per_unit = match &raw[digits_end..] {
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    Some(amount * per_unit)
}

fn parse_schedule(raw: &str) -> Option<(ScheduleKind, String)> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("every ") {
        return parse_every(rest).map(|ms| (ScheduleKind::Every, ms.to_string()));
    }
    if CronExpr::parse(raw).is_some() {
        return Some((ScheduleKind::Cron, raw.to_string()));
    }
    None
}

pub fn parse_heartbeat(content: &str) -> Vec<HeartbeatTask> {
    let mut tasks = Vec::new();
    let mut current: Option<(String, Option<(ScheduleKind, String)>, Option<String>)> = None;

    let mut flush = |entry: Option<(String, Option<(ScheduleKind, String)>, Option<String>)>,
                     tasks: &mut Vec<HeartbeatTask>| {
        let Some((name, schedule, task)) = entry else {
            return;
        };
        match (schedule, task) {
            (Some((kind, value)), Some(task)) => tasks.push(HeartbeatTask {
                name,
                schedule_kind: kind,
                schedule_value: value,
                task,
            }),
            _ => {
                tracing::warn!(task = %name, "heartbeat entry missing schedule or task, skipping");
            }
        }
    };

    for line in content.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            flush(current.take(), &mut tasks);
            current = Some((heading.trim().to_string(), None, None));
        } else if let Some((_, schedule, task)) = current.as_mut() {
            let trimmed = line.trim();
            if let Some(raw) = trimmed.strip_prefix("- schedule:") {
                match parse_schedule(raw) {
                    Some(parsed) => *schedule = Some(parsed),
                    None => {
                        tracing::warn!(schedule = raw.trim(), "unrecognized heartbeat schedule");
                    }
                }
            } else if let Some(raw) = trimmed.strip_prefix("- task:") {
                *task = Some(raw.trim().to_string());
            }
        }
    }
    flush(current, &mut tasks);
    tasks
}

/// Re-read HEARTBEAT.md on an interval and keep jobs in sync, so file
/// edits take effect without a restart.
pub async fn run_heartbeat_watcher(
    store: CronStore,
    heartbeat_path: std::path::PathBuf,
    interval_ms: u64,
    cancel: tokio_util::sync::CancellationToken,
) {
    let interval = std::time::Duration::from_millis(interval_ms.max(1000));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {
                match std::fs::read_to_string(&heartbeat_path) {
                    Ok(content) => {
                        if let Err(e) = sync_heartbeat(&store, &content).await {
                            tracing::warn!(error = %e, "heartbeat sync failed");
                        }
                    }
                    Err(_) => tracing::debug!("no HEARTBEAT.md to sync"),
                }
            }
        }
    }
}

/// Upsert every parsed heartbeat task; returns how many were synced.
pub async fn sync_heartbeat(store: &CronStore, content: &str) -> Result<usize> {
    let tasks = parse_heartbeat(content);
    let count = tasks.len();
    for task in tasks {
        store
            .upsert_by_name(NewJob::new(
                &task.name,
                task.schedule_kind,
                &task.schedule_value,
                &task.task,
            ))
            .await?;
    }
    tracing::info!(count, "heartbeat tasks synced");
    Ok(count)
}
