//! Execution-metric log with keyword-similarity recommendations.
//!
//! Every handled message appends an [`ExecutionRecord`]; before a new
//! task runs, the loop can ask for aggregate statistics over the most
//! similar past tasks. Records live in the relational store, or in a
//! line-delimited append file when the database is unavailable.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use janus_domain::Result;
use janus_store::Database;

/// How many similar records feed a recommendation.
const DEFAULT_TOP_N: usize = 10;

/// Only the most recent records participate in similarity ranking.
const LOAD_CAP: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
    MaxIterations,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::MaxIterations => "max_iterations",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "success" => Outcome::Success,
            "max_iterations" => Outcome::MaxIterations,
            _ => Outcome::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_excerpt: String,
    pub duration_ms: u64,
    pub iterations: u32,
    pub tool_calls: u32,
    pub tokens_used: u64,
    pub outcome: Outcome,
    pub created_at_ms: i64,
}

impl ExecutionRecord {
    pub fn new(
        task: &str,
        duration_ms: u64,
        iterations: u32,
        tool_calls: u32,
        tokens_used: u64,
        outcome: Outcome,
    ) -> Self {
        let mut task_excerpt = task.to_string();
        if task_excerpt.len() > 200 {
            let mut end = 200;
            while !task_excerpt.is_char_boundary(end) {
                end -= 1;
            }
            task_excerpt.truncate(end);
        }
        Self {
            task_excerpt,
            duration_ms,
            iterations,
            tool_calls,
            tokens_used,
            outcome,
            created_at_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Aggregate over the top similar records.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub avg_duration_ms: u64,
    pub avg_iterations: f64,
    pub avg_tool_calls: f64,
    pub success_rate: f64,
    pub sample_size: usize,
}

enum Backend {
    Db(Database),
    File(PathBuf),
}

pub struct Learner {
    backend: Backend,
}

impl Learner {
    pub fn with_database(db: Database) -> Self {
        Self {
            backend: Backend::Db(db),
        }
    }

    /// Fallback when the relational store failed to open.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(path.into()),
        }
    }

    pub async fn record(&self, rec: ExecutionRecord) -> Result<()> {
        match &self.backend {
            Backend::Db(db) => {
                db.call(move |conn| {
                    conn.execute(
                        "INSERT INTO learner_records
                             (task_excerpt, duration_ms, iterations, tool_calls,
                              tokens_used, outcome, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        rusqlite::params![
                            rec.task_excerpt,
                            rec.duration_ms as i64,
                            rec.iterations as i64,
                            rec.tool_calls as i64,
                            rec.tokens_used as i64,
                            rec.outcome.as_str(),
                            rec.created_at_ms,
                        ],
                    )?;
                    Ok(())
                })
                .await
            }
            Backend::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                use std::io::Write;
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                let mut line = serde_json::to_string(&rec)?;
                line.push('\n');
                file.write_all(line.as_bytes())?;
                Ok(())
            }
        }
    }

    async fn load_recent(&self) -> Result<Vec<ExecutionRecord>> {
        match &self.backend {
            Backend::Db(db) => {
                db.call(|conn| {
                    let mut stmt = conn.prepare(
                        "SELECT task_excerpt, duration_ms, iterations, tool_calls,
                                tokens_used, outcome, created_at
                         FROM learner_records
                         ORDER BY created_at DESC
                         LIMIT ?1",
                    )?;
                    let rows = stmt.query_map([LOAD_CAP as i64], |row| {
                        Ok(ExecutionRecord {
                            task_excerpt: row.get(0)?,
                            duration_ms: row.get::<_, i64>(1)? as u64,
                            iterations: row.get::<_, i64>(2)? as u32,
                            tool_calls: row.get::<_, i64>(3)? as u32,
                            tokens_used: row.get::<_, i64>(4)? as u64,
                            outcome: Outcome::parse(&row.get::<_, String>(5)?),
                            created_at_ms: row.get(6)?,
                        })
                    })?;
                    rows.collect()
                })
                .await
            }
            Backend::File(path) => {
                if !path.exists() {
                    return Ok(Vec::new());
                }
                let raw = std::fs::read_to_string(path)?;
                let mut records: Vec<ExecutionRecord> = raw
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .filter_map(|l| match serde_json::from_str(l) {
                        Ok(rec) => Some(rec),
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed learner record");
                            None
                        }
                    })
                    .collect();
                records.sort_by_key(|r| std::cmp::Reverse(r.created_at_ms));
                records.truncate(LOAD_CAP);
                Ok(records)
            }
        }
    }

    /// The most similar past records, best first.
    pub async fn similar(&self, task: &str, n: usize) -> Result<Vec<ExecutionRecord>> {
        let query_tokens = tokenize(task);
        let records = self.load_recent().await?;

        let mut scored: Vec<(usize, ExecutionRecord)> = records
            .into_iter()
            .filter_map(|rec| {
                let overlap = token_overlap(&query_tokens, &tokenize(&rec.task_excerpt));
                (overlap > 0).then_some((overlap, rec))
            })
            .collect();

        // Overlap first, recency breaks ties.
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.created_at_ms.cmp(&a.1.created_at_ms))
        });
        scored.truncate(n);
        Ok(scored.into_iter().map(|(_, rec)| rec).collect())
    }

    /// Aggregate statistics over the top similar records; `None` when
    /// nothing matches.
    pub async fn recommend(&self, task: &str) -> Result<Option<Recommendation>> {
        let similar = self.similar(task, DEFAULT_TOP_N).await?;
        if similar.is_empty() {
            return Ok(None);
        }

        let n = similar.len();
        let sum_duration: u64 = similar.iter().map(|r| r.duration_ms).sum();
        let sum_iterations: u64 = similar.iter().map(|r| r.iterations as u64).sum();
        let sum_tool_calls: u64 = similar.iter().map(|r| r.tool_calls as u64).sum();
        let successes = similar
            .iter()
            .filter(|r| r.outcome == Outcome::Success)
            .count();

        Ok(Some(Recommendation {
            avg_duration_ms: sum_duration / n as u64,
            avg_iterations: round1(sum_iterations as f64 / n as f64),
            avg_tool_calls: round1(sum_tool_calls as f64 / n as f64),
            success_rate: round2(successes as f64 / n as f64),
            sample_size: n,
        }))
    }
}

/// Lowercased alphanumeric tokens of length > 2.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

fn token_overlap(a: &[String], b: &[String]) -> usize {
    a.iter().filter(|t| b.contains(t)).count()
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
