//! Extract-then-compact: before old conversation halves are summarized
//! away, durable facts are flushed into today's daily note.

use std::path::PathBuf;
use std::sync::Arc;

use janus_domain::{LlmMessage, Result};
use janus_memory::{append_daily_note, MemoryIndex, OWNER_SHARED};
use janus_providers::{ChatRequest, ProviderRegistry};
use janus_sessions::SessionStore;

const FLUSH_INSTRUCTION: &str = "Extract important facts, decisions, and learnings from this \
conversation that are worth remembering long-term. Write them as short markdown bullets. \
If nothing is worth remembering, respond with NONE.";

const SUMMARIZE_INSTRUCTION: &str =
    "Summarize this conversation concisely: decisions, key context, current state.";

/// Reply sentinel meaning "nothing to keep".
const NONE_SENTINEL: &str = "NONE";

pub struct Summarizer {
    providers: Arc<ProviderRegistry>,
    sessions: Arc<SessionStore>,
    memory: Option<Arc<MemoryIndex>>,
    memory_dir: PathBuf,
}

impl Summarizer {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        sessions: Arc<SessionStore>,
        memory: Option<Arc<MemoryIndex>>,
        memory_dir: PathBuf,
    ) -> Self {
        Self {
            providers,
            sessions,
            memory,
            memory_dir,
        }
    }

    /// Flush the older half to memory, then summarize and trim the
    /// session. Runs off the request path.
    pub async fn summarize_session(&self, key: &str) -> Result<()> {
        let messages = self.sessions.messages(key);
        if messages.len() < 2 {
            return Ok(());
        }
        let first_half = &messages[..messages.len() / 2];

        if self.memory.is_some() {
            if let Err(e) = self.flush_to_memory(first_half).await {
                // A failed flush must not block compaction.
                tracing::warn!(key, error = %e, "memory flush failed");
            }
        }

        let transcript = flatten_transcript(&messages);
        let req = ChatRequest {
            messages: vec![
                LlmMessage::system(SUMMARIZE_INSTRUCTION),
                LlmMessage::user(transcript),
            ],
            ..Default::default()
        };
        let summary = self.providers.chat(&req, Some("summarize")).await?;
        self.sessions.summarize(key, summary.content.trim())?;

        tracing::info!(key, "session summarized");
        Ok(())
    }

    async fn flush_to_memory(&self, messages: &[LlmMessage]) -> Result<()> {
        let req = ChatRequest {
            messages: vec![
                LlmMessage::system(FLUSH_INSTRUCTION),
                LlmMessage::user(flatten_transcript(messages)),
            ],
            ..Default::default()
        };
        let reply = self.providers.chat(&req, Some("flush")).await?;
        let extracted = reply.content.trim();
        if extracted.is_empty() || extracted == NONE_SENTINEL {
            return Ok(());
        }

        let note_path = append_daily_note(&self.memory_dir, &format!("## Session notes\n{extracted}"))?;

        // Make the flushed facts searchable right away.
        if let Some(index) = &self.memory {
            let file_name = note_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let content = std::fs::read_to_string(&note_path)?;
            index
                .index_file(&file_name, &content, OWNER_SHARED, "global", None)
                .await?;
        }
        Ok(())
    }
}

/// `role: content` lines, the flattened form both prompts consume.
fn flatten_transcript(messages: &[LlmMessage]) -> String {
    let mut out = String::new();
    for msg in messages {
        out.push_str(msg.role());
        out.push_str(": ");
        out.push_str(msg.content());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus_providers::mock::MockProvider;
    use janus_providers::ProviderEntry;
    use janus_store::Database;

    fn registry(mock: Arc<MockProvider>) -> Arc<ProviderRegistry> {
        Arc::new(ProviderRegistry::new(vec![ProviderEntry {
            name: "mock".into(),
            provider: mock,
            default_model: "mock-model".into(),
            purposes: Vec::new(),
            priority: 0,
        }]))
    }

    fn seeded_sessions(dir: &std::path::Path, key: &str, turns: usize) -> Arc<SessionStore> {
        let sessions = Arc::new(SessionStore::new(dir));
        for i in 0..turns {
            sessions
                .append(
                    key,
                    &[
                        LlmMessage::user(format!("question {i}")),
                        LlmMessage::assistant(format!("answer {i}")),
                    ],
                )
                .unwrap();
        }
        sessions
    }

    #[tokio::test]
    async fn flush_writes_daily_note_then_summary_trims_session() {
        let workdir = tempfile::tempdir().unwrap();
        let sessions = seeded_sessions(workdir.path(), "cli:x", 10);
        let memory = Arc::new(MemoryIndex::new(Database::open_in_memory().unwrap(), None));

        let mock = Arc::new(MockProvider::new("mock"));
        mock.push_text("- Decision: use SQLite for storage");
        mock.push_text("We set up storage and agreed on SQLite.");

        let memory_dir = workdir.path().join("memory");
        let summarizer = Summarizer::new(
            registry(mock.clone()),
            sessions.clone(),
            Some(memory),
            memory_dir.clone(),
        );
        summarizer.summarize_session("cli:x").await.unwrap();

        let note = std::fs::read_to_string(janus_memory::today_note_path(&memory_dir)).unwrap();
        assert!(note.contains("## Session notes"));
        assert!(note.contains("- Decision: use SQLite for storage"));

        assert_eq!(
            sessions.summary("cli:x").as_deref(),
            Some("We set up storage and agreed on SQLite.")
        );
        assert_eq!(sessions.messages("cli:x").len(), 4);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn none_reply_skips_the_daily_note() {
        let workdir = tempfile::tempdir().unwrap();
        let sessions = seeded_sessions(workdir.path(), "cli:x", 6);
        let memory = Arc::new(MemoryIndex::new(Database::open_in_memory().unwrap(), None));

        let mock = Arc::new(MockProvider::new("mock"));
        mock.push_text("NONE");
        mock.push_text("short summary");

        let memory_dir = workdir.path().join("memory");
        let summarizer = Summarizer::new(
            registry(mock),
            sessions.clone(),
            Some(memory),
            memory_dir.clone(),
        );
        summarizer.summarize_session("cli:x").await.unwrap();

        assert!(!janus_memory::today_note_path(&memory_dir).exists());
        assert_eq!(sessions.summary("cli:x").as_deref(), Some("short summary"));
    }

    #[tokio::test]
    async fn without_memory_only_summarizes() {
        let workdir = tempfile::tempdir().unwrap();
        let sessions = seeded_sessions(workdir.path(), "cli:x", 6);

        let mock = Arc::new(MockProvider::new("mock"));
        mock.push_text("summary only");

        let summarizer = Summarizer::new(
            registry(mock.clone()),
            sessions.clone(),
            None,
            workdir.path().join("memory"),
        );
        summarizer.summarize_session("cli:x").await.unwrap();

        // Single provider call: no flush happened.
        assert_eq!(mock.call_count(), 1);
        assert_eq!(sessions.summary("cli:x").as_deref(), Some("summary only"));
    }

    #[tokio::test]
    async fn tiny_sessions_are_left_alone() {
        let workdir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(workdir.path()));
        sessions.append("cli:x", &[LlmMessage::user("hi")]).unwrap();

        let mock = Arc::new(MockProvider::new("mock"));
        let summarizer = Summarizer::new(
            registry(mock.clone()),
            sessions.clone(),
            None,
            workdir.path().join("memory"),
        );
        summarizer.summarize_session("cli:x").await.unwrap();
        assert_eq!(mock.call_count(), 0);
        assert!(sessions.summary("cli:x").is_none());
    }
}
