//! Hybrid memory index over the embedded store.
//!
//! The keyword branch is an FTS5 match rescored with temporal decay;
//! the vector branch is cosine similarity over chunk embeddings; hybrid
//! search fuses both with Reciprocal Rank Fusion. All queries are
//! filtered by the caller's tenancy scope.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::types::ToSql;

use janus_domain::{Result, Scope, ScopeKind};
use janus_store::Database;

use crate::chunk::chunk_markdown;
use crate::embedder::{blob_to_embedding, cosine_similarity, embedding_to_blob, Embedder};

/// Half-life of the temporal decay applied to keyword scores.
const DECAY_HALF_LIFE_MS: f64 = 30.0 * 24.0 * 60.0 * 60.0 * 1000.0;

/// RRF fusion constant.
const RRF_K: f64 = 60.0;

/// Chunks from this source never decay.
const EVERGREEN_SOURCE: &str = "MEMORY.md";

/// Owner value for memory shared by every user.
pub const OWNER_SHARED: &str = "shared";

#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub id: i64,
    pub source: String,
    pub heading: String,
    pub content: String,
    pub updated_at_ms: i64,
    pub score: f64,
}

pub struct MemoryIndex {
    db: Database,
    embedder: Option<Arc<dyn Embedder>>,
}

impl MemoryIndex {
    pub fn new(db: Database, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { db, embedder }
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    // ── Indexing ──────────────────────────────────────────────────

    /// Replace all chunks for (source, owner, scope) with fresh ones
    /// from `content`, in a single transaction.
    pub async fn index_file(
        &self,
        source: &str,
        content: &str,
        owner: &str,
        scope: &str,
        scope_id: Option<&str>,
    ) -> Result<usize> {
        let chunks = chunk_markdown(content);
        let rows: Vec<(String, String, Option<Vec<u8>>)> = chunks
            .into_iter()
            .map(|c| (c.heading, c.content, None))
            .collect();
        self.replace_chunks(source, owner, scope, scope_id, rows).await
    }

    /// Like [`index_file`], but computes an embedding per chunk first.
    ///
    /// [`index_file`]: Self::index_file
    pub async fn index_file_with_embeddings(
        &self,
        source: &str,
        content: &str,
        owner: &str,
        scope: &str,
        scope_id: Option<&str>,
    ) -> Result<usize> {
        let Some(embedder) = self.embedder.clone() else {
            return self.index_file(source, content, owner, scope, scope_id).await;
        };

        let chunks = chunk_markdown(content);
        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding = embedder.embed(&chunk.content).await?;
            rows.push((chunk.heading, chunk.content, Some(embedding_to_blob(&embedding))));
        }
        self.replace_chunks(source, owner, scope, scope_id, rows).await
    }

    async fn replace_chunks(
        &self,
        source: &str,
        owner: &str,
        scope: &str,
        scope_id: Option<&str>,
        rows: Vec<(String, String, Option<Vec<u8>>)>,
    ) -> Result<usize> {
        let source = source.to_string();
        let owner = owner.to_string();
        let scope = scope.to_string();
        let scope_id = scope_id.map(str::to_string);
        let now_ms = Utc::now().timestamp_millis();
        let count = rows.len();

        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM memory_chunks WHERE source = ?1 AND owner = ?2 AND scope = ?3",
                    rusqlite::params![source, owner, scope],
                )?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO memory_chunks
                             (source, heading, content, updated_at, embedding, owner, scope, scope_id)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )?;
                    for (heading, content, embedding) in rows {
                        stmt.execute(rusqlite::params![
                            source, heading, content, now_ms, embedding, owner, scope, scope_id
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        tracing::debug!(count, "reindexed memory source");
        Ok(count)
    }

    // ── Keyword search ────────────────────────────────────────────

    /// FTS match rescored with temporal decay. Returns up to `limit`
    /// hits, best first. An empty sanitized query returns nothing.
    pub async fn search_keyword(
        &self,
        query: &str,
        limit: usize,
        scope: Option<&Scope>,
    ) -> Result<Vec<MemoryHit>> {
        let terms = sanitize_query(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR ");

        let (clause, scope_params) = scope_clause(scope);
        let fetch = (limit.max(1) * 5) as i64;
        let sql = format!(
            "SELECT c.id, c.source, c.heading, c.content, c.updated_at,
                    bm25(memory_fts) AS rank
             FROM memory_fts
             JOIN memory_chunks c ON c.id = memory_fts.rowid
             WHERE memory_fts MATCH ?1 AND ({clause})
             ORDER BY rank
             LIMIT {fetch}"
        );

        let mut hits: Vec<MemoryHit> = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut params: Vec<&dyn ToSql> = vec![&match_expr];
                for p in &scope_params {
                    params.push(p);
                }
                let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                    Ok(MemoryHit {
                        id: row.get(0)?,
                        source: row.get(1)?,
                        heading: row.get(2)?,
                        content: row.get(3)?,
                        updated_at_ms: row.get(4)?,
                        // bm25 is smaller-is-better; negate so higher wins.
                        score: -row.get::<_, f64>(5)?,
                    })
                })?;
                rows.collect()
            })
            .await?;

        let now_ms = Utc::now().timestamp_millis();
        for hit in &mut hits {
            hit.score *= decay_factor(&hit.source, hit.updated_at_ms, now_ms);
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    // ── Vector search ─────────────────────────────────────────────

    /// Cosine similarity against all embedded chunks; returns up to
    /// `max_results`, best first.
    pub async fn search_vector(
        &self,
        query: &str,
        max_results: usize,
        scope: Option<&Scope>,
    ) -> Result<Vec<MemoryHit>> {
        let embedder = self
            .embedder
            .clone()
            .ok_or_else(|| janus_domain::Error::Other("no embedder configured".into()))?;
        let query_vec = embedder.embed(query).await?;

        let (clause, scope_params) = scope_clause(scope);
        let sql = format!(
            "SELECT id, source, heading, content, updated_at, embedding
             FROM memory_chunks
             WHERE embedding IS NOT NULL AND ({clause})"
        );

        let mut hits: Vec<MemoryHit> = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let params: Vec<&dyn ToSql> = scope_params.iter().map(|p| p as &dyn ToSql).collect();
                let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                    let blob: Vec<u8> = row.get(5)?;
                    Ok(MemoryHit {
                        id: row.get(0)?,
                        source: row.get(1)?,
                        heading: row.get(2)?,
                        content: row.get(3)?,
                        updated_at_ms: row.get(4)?,
                        score: cosine_similarity(&query_vec, &blob_to_embedding(&blob)) as f64,
                    })
                })?;
                rows.collect()
            })
            .await?;

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(max_results);
        Ok(hits)
    }

    // ── Hybrid search ─────────────────────────────────────────────

    /// Keyword + vector fused with RRF (k = 60). A failing vector
    /// branch degrades to keyword-only.
    pub async fn search_hybrid(
        &self,
        query: &str,
        limit: usize,
        scope: Option<&Scope>,
    ) -> Result<Vec<MemoryHit>> {
        let branch_limit = limit.max(1) * 2;
        let keyword = self.search_keyword(query, branch_limit, scope).await?;

        let vector = if self.embedder.is_some() {
            match self.search_vector(query, branch_limit, scope).await {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(error = %e, "vector branch failed, keyword-only results");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        if vector.is_empty() {
            let mut hits = keyword;
            hits.truncate(limit);
            return Ok(hits);
        }

        let mut fused: HashMap<i64, (MemoryHit, f64)> = HashMap::new();
        for branch in [keyword, vector] {
            for (rank, hit) in branch.into_iter().enumerate() {
                let rrf = 1.0 / (RRF_K + rank as f64 + 1.0);
                fused
                    .entry(hit.id)
                    .and_modify(|(_, score)| *score += rrf)
                    .or_insert((hit, rrf));
            }
        }

        let mut hits: Vec<MemoryHit> = fused
            .into_values()
            .map(|(mut hit, score)| {
                hit.score = score;
                hit
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Lowercased alphanumeric words of length ≥ 3.
fn sanitize_query(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(str::to_string)
        .collect()
}

/// 0.5^(age/30d), except evergreen sources which never decay.
fn decay_factor(source: &str, updated_at_ms: i64, now_ms: i64) -> f64 {
    if source == EVERGREEN_SOURCE {
        return 1.0;
    }
    let age_ms = (now_ms - updated_at_ms).max(0) as f64;
    0.5f64.powf(age_ms / DECAY_HALF_LIFE_MS)
}

/// SQL fragment + bound params implementing the tenancy filter.
fn scope_clause(scope: Option<&Scope>) -> (String, Vec<String>) {
    match scope {
        None => ("1=1".to_string(), Vec::new()),
        Some(s) => match s.kind {
            ScopeKind::User => (
                "(owner = 'shared' AND scope = 'global')
                 OR (owner = ? AND scope = 'user' AND scope_id = ?)"
                    .to_string(),
                vec![s.id.clone(), s.id.clone()],
            ),
            ScopeKind::Family => (
                "(owner = 'shared' AND scope = 'global')
                 OR (owner = 'shared' AND scope = 'family' AND scope_id = ?)"
                    .to_string(),
                vec![s.id.clone()],
            ),
            ScopeKind::Unknown => (
                "owner = 'shared' AND scope = 'global'".to_string(),
                Vec::new(),
            ),
        },
    }
}
