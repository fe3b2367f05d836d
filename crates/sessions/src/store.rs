//! Session store: append-only per-conversation logs with atomic
//! replacement and an in-memory cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use janus_domain::{strip_orphan_tool_prefix, Error, LlmMessage, Result};

/// Messages retained after summarization.
pub const SUMMARY_KEEP_MESSAGES: usize = 4;

/// First line of every session file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    #[serde(rename = "_type")]
    record_type: String,
    pub key: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(rename = "messageCount")]
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl SessionMeta {
    fn new(key: &str) -> Self {
        let now = Utc::now();
        Self {
            record_type: "metadata".into(),
            key: key.to_string(),
            created: now,
            updated: now,
            message_count: 0,
            summary: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    meta: SessionMeta,
    messages: Vec<LlmMessage>,
}

impl Session {
    fn new(key: &str) -> Self {
        Self {
            meta: SessionMeta::new(key),
            messages: Vec::new(),
        }
    }
}

/// Replace path-unsafe characters so a session key maps to a file name.
/// `telegram:42` becomes `telegram_42.jsonl`.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct SessionStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", sanitize_key(key)))
    }

    /// Ensure the session exists (cache → disk → new) and return its
    /// metadata snapshot.
    pub fn get_or_create(&self, key: &str) -> SessionMeta {
        let mut cache = self.cache.lock();
        cache
            .entry(key.to_string())
            .or_insert_with(|| self.load_or_new(key))
            .meta
            .clone()
    }

    /// The last `max` messages of a session.
    pub fn history(&self, key: &str, max: usize) -> Vec<LlmMessage> {
        let mut cache = self.cache.lock();
        let session = cache
            .entry(key.to_string())
            .or_insert_with(|| self.load_or_new(key));
        let skip = session.messages.len().saturating_sub(max);
        session.messages[skip..].to_vec()
    }

    /// Full message log (tests and summarization).
    pub fn messages(&self, key: &str) -> Vec<LlmMessage> {
        let mut cache = self.cache.lock();
        cache
            .entry(key.to_string())
            .or_insert_with(|| self.load_or_new(key))
            .messages
            .clone()
    }

    pub fn message_count(&self, key: &str) -> usize {
        let mut cache = self.cache.lock();
        cache
            .entry(key.to_string())
            .or_insert_with(|| self.load_or_new(key))
            .meta
            .message_count
    }

    pub fn summary(&self, key: &str) -> Option<String> {
        let mut cache = self.cache.lock();
        cache
            .entry(key.to_string())
            .or_insert_with(|| self.load_or_new(key))
            .meta
            .summary
            .clone()
    }

    /// Extend the log and persist. The on-disk file is rewritten
    /// atomically so a crash leaves either the old or the new log.
    pub fn append(&self, key: &str, messages: &[LlmMessage]) -> Result<()> {
        let session = {
            let mut cache = self.cache.lock();
            let session = cache
                .entry(key.to_string())
                .or_insert_with(|| self.load_or_new(key));
            session.messages.extend_from_slice(messages);
            session.meta.message_count = session.messages.len();
            session.meta.updated = Utc::now();
            session.clone()
        };
        self.persist(key, &session)
    }

    /// Store a summary and trim the log to the last
    /// [`SUMMARY_KEEP_MESSAGES`] messages.
    pub fn summarize(&self, key: &str, summary: &str) -> Result<()> {
        let session = {
            let mut cache = self.cache.lock();
            let session = cache
                .entry(key.to_string())
                .or_insert_with(|| self.load_or_new(key));
            let keep_from = session.messages.len().saturating_sub(SUMMARY_KEEP_MESSAGES);
            session.messages.drain(..keep_from);
            session.meta.summary = Some(summary.to_string());
            session.meta.message_count = session.messages.len();
            session.meta.updated = Utc::now();
            session.clone()
        };
        self.persist(key, &session)
    }

    // ── Disk I/O ──────────────────────────────────────────────────

    fn load_or_new(&self, key: &str) -> Session {
        let path = self.path_for(key);
        if !path.exists() {
            return Session::new(key);
        }
        match self.load(key, &path) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(key, error = %e, "session file unreadable, starting fresh");
                Session::new(key)
            }
        }
    }

    fn load(&self, key: &str, path: &Path) -> Result<Session> {
        let raw = std::fs::read_to_string(path)?;
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty());

        let meta = match lines.next().map(serde_json::from_str::<SessionMeta>) {
            Some(Ok(meta)) => meta,
            Some(Err(e)) => {
                tracing::warn!(key, error = %e, "corrupt session metadata, starting fresh");
                return Ok(Session::new(key));
            }
            None => return Ok(Session::new(key)),
        };

        let mut messages = Vec::new();
        for line in lines {
            match serde_json::from_str::<LlmMessage>(line) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    tracing::warn!(key, error = %e, "skipping invalid session message line");
                }
            }
        }

        // Crash recovery: a log must not start with dangling tool results.
        let dropped = strip_orphan_tool_prefix(&mut messages);
        if dropped > 0 {
            tracing::warn!(key, dropped, "stripped orphan tool prefix from session log");
        }

        let mut meta = meta;
        meta.message_count = messages.len();
        Ok(Session { meta, messages })
    }

    fn persist(&self, key: &str, session: &Session) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let mut buf = serde_json::to_string(&session.meta)?;
        buf.push('\n');
        for msg in &session.messages {
            buf.push_str(&serde_json::to_string(msg)?);
            buf.push('\n');
        }

        let path = self.path_for(key);
        let tmp = self.dir.join(format!(
            "{}.{}.tmp",
            sanitize_key(key),
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::write(&tmp, buf)?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            Error::Io(e)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        (store, dir)
    }

    #[test]
    fn sanitize_replaces_path_unsafe_chars() {
        assert_eq!(sanitize_key("telegram:42"), "telegram_42");
        assert_eq!(sanitize_key("cli:../../etc"), "cli_......etc");
    }

    #[test]
    fn append_then_reload_from_disk() {
        let (store, dir) = store();
        store
            .append(
                "cli:x",
                &[LlmMessage::user("hi"), LlmMessage::assistant("hello")],
            )
            .unwrap();

        // A fresh store re-reads from disk.
        let fresh = SessionStore::new(dir.path());
        let messages = fresh.messages("cli:x");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content(), "hi");
        assert_eq!(fresh.message_count("cli:x"), 2);
    }

    #[test]
    fn history_returns_last_n() {
        let (store, _dir) = store();
        for i in 0..10 {
            store
                .append("cli:x", &[LlmMessage::user(format!("m{i}"))])
                .unwrap();
        }
        let last = store.history("cli:x", 3);
        assert_eq!(last.len(), 3);
        assert_eq!(last[0].content(), "m7");
        assert_eq!(last[2].content(), "m9");
    }

    #[test]
    fn summarize_keeps_last_four_and_stores_summary() {
        let (store, dir) = store();
        for i in 0..9 {
            store
                .append("cli:x", &[LlmMessage::user(format!("m{i}"))])
                .unwrap();
        }
        store.summarize("cli:x", "what happened so far").unwrap();

        assert_eq!(store.messages("cli:x").len(), SUMMARY_KEEP_MESSAGES);
        assert_eq!(store.summary("cli:x").as_deref(), Some("what happened so far"));
        assert_eq!(store.messages("cli:x")[0].content(), "m5");

        // Survives reload.
        let fresh = SessionStore::new(dir.path());
        assert_eq!(fresh.summary("cli:x").as_deref(), Some("what happened so far"));
        assert_eq!(fresh.messages("cli:x").len(), SUMMARY_KEEP_MESSAGES);
    }

    #[test]
    fn corrupt_metadata_restarts_empty() {
        let (store, dir) = store();
        std::fs::write(dir.path().join("cli_x.jsonl"), "not json\n").unwrap();
        assert_eq!(store.messages("cli:x").len(), 0);
    }

    #[test]
    fn invalid_message_lines_are_skipped() {
        let (_, dir) = store();
        let meta = serde_json::json!({
            "_type": "metadata",
            "key": "cli:x",
            "created": Utc::now(),
            "updated": Utc::now(),
            "messageCount": 3
        });
        let content = format!(
            "{}\n{}\ngarbage line\n{}\n",
            meta,
            r#"{"role":"user","content":"ok"}"#,
            r#"{"role":"assistant","content":"fine"}"#
        );
        std::fs::write(dir.path().join("cli_x.jsonl"), content).unwrap();

        let store = SessionStore::new(dir.path());
        let messages = store.messages("cli:x");
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn orphan_tool_prefix_is_stripped_on_load() {
        let (_, dir) = store();
        let meta = serde_json::json!({
            "_type": "metadata",
            "key": "cli:x",
            "created": Utc::now(),
            "updated": Utc::now(),
            "messageCount": 3
        });
        let content = format!(
            "{}\n{}\n{}\n{}\n",
            meta,
            r#"{"role":"tool","content":"dangling","tool_call_id":"tc_0"}"#,
            r#"{"role":"user","content":"hello"}"#,
            r#"{"role":"assistant","content":"hi"}"#
        );
        std::fs::write(dir.path().join("cli_x.jsonl"), content).unwrap();

        let store = SessionStore::new(dir.path());
        let messages = store.messages("cli:x");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role(), "user");
    }

    #[test]
    fn no_tmp_files_left_behind() {
        let (store, dir) = store();
        store.append("cli:x", &[LlmMessage::user("hi")]).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
