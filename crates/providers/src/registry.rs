//! Provider registry.
//!
//! Holds named provider entries with purpose tags and priorities.
//! A call filters candidates by purpose (an empty purpose list is a
//! wildcard; no match falls back to all entries), then tries them in
//! priority order, failing over on error. The registry is stateless
//! across calls and never retries the same provider within one call;
//! transient retry is the adapter's job.

use std::sync::Arc;

use janus_domain::{BoxStream, Error, Result, StreamEvent};

use crate::traits::{ChatRequest, ChatResponse, Provider};

pub struct ProviderEntry {
    pub name: String,
    pub provider: Arc<dyn Provider>,
    pub default_model: String,
    /// Purpose tags this entry serves; empty means any purpose.
    pub purposes: Vec<String>,
    /// Lower is tried first.
    pub priority: i32,
}

pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new(mut entries: Vec<ProviderEntry>) -> Self {
        entries.sort_by_key(|e| e.priority);
        for entry in &entries {
            tracing::info!(
                name = %entry.name,
                model = %entry.default_model,
                priority = entry.priority,
                purposes = ?entry.purposes,
                "registered LLM provider"
            );
        }
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Purpose filter with fall-back-to-all: a purposeful call never
    /// fails on "no match" while any entry exists.
    fn candidates(&self, purpose: Option<&str>) -> Vec<&ProviderEntry> {
        if let Some(purpose) = purpose {
            let matched: Vec<&ProviderEntry> = self
                .entries
                .iter()
                .filter(|e| e.purposes.is_empty() || e.purposes.iter().any(|p| p == purpose))
                .collect();
            if !matched.is_empty() {
                return matched;
            }
        }
        self.entries.iter().collect()
    }

    fn request_for(&self, entry: &ProviderEntry, req: &ChatRequest) -> ChatRequest {
        let mut req = req.clone();
        if req.model.is_none() {
            req.model = Some(entry.default_model.clone());
        }
        req
    }

    /// Chat with failover. On exhaustion the last error is raised.
    pub async fn chat(&self, req: &ChatRequest, purpose: Option<&str>) -> Result<ChatResponse> {
        let candidates = self.candidates(purpose);
        if candidates.is_empty() {
            return Err(Error::Config("no LLM providers configured".into()));
        }

        let mut last_err = None;
        for entry in candidates {
            let attempt = self.request_for(entry, req);
            match entry.provider.chat(&attempt).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    tracing::warn!(
                        provider = %entry.name,
                        error = %mask_secrets(&e.to_string()),
                        "provider failed, trying next"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one candidate was tried"))
    }

    /// Streaming chat with failover. A candidate without native
    /// streaming is adapted: its full reply becomes a single chunk.
    pub async fn chat_stream(
        &self,
        req: &ChatRequest,
        purpose: Option<&str>,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let candidates = self.candidates(purpose);
        if candidates.is_empty() {
            return Err(Error::Config("no LLM providers configured".into()));
        }

        let mut last_err = None;
        for entry in candidates {
            let attempt = self.request_for(entry, req);
            let result = if entry.provider.supports_streaming() {
                entry.provider.chat_stream(&attempt).await
            } else {
                entry
                    .provider
                    .chat(&attempt)
                    .await
                    .map(|resp| response_as_stream(resp))
            };
            match result {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::warn!(
                        provider = %entry.name,
                        error = %mask_secrets(&e.to_string()),
                        "provider failed, trying next"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one candidate was tried"))
    }
}

/// Adapt a complete response into the streaming shape: one `Token`
/// chunk with the entire content, the tool calls, then `Done`.
pub fn response_as_stream(resp: ChatResponse) -> BoxStream<'static, Result<StreamEvent>> {
    let mut events = Vec::new();
    if !resp.content.is_empty() {
        events.push(Ok(StreamEvent::Token {
            text: resp.content,
        }));
    }
    for tc in resp.tool_calls {
        events.push(Ok(StreamEvent::ToolCallFinished {
            call_id: tc.id,
            tool_name: tc.name,
            arguments: tc.arguments,
        }));
    }
    events.push(Ok(StreamEvent::Done {
        usage: resp.usage,
        finish_reason: resp.finish_reason,
    }));
    Box::pin(futures_util::stream::iter(events))
}

/// Mask substrings that look like API keys or bearer tokens before an
/// error message reaches the logs.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || matches!(c, '\'' | '"' | ',')) {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use futures_util::StreamExt;

    fn entry(name: &str, provider: Arc<MockProvider>, priority: i32, purposes: &[&str]) -> ProviderEntry {
        ProviderEntry {
            name: name.into(),
            provider,
            default_model: format!("{name}-model"),
            purposes: purposes.iter().map(|s| s.to_string()).collect(),
            priority,
        }
    }

    fn req() -> ChatRequest {
        ChatRequest {
            messages: vec![janus_domain::LlmMessage::user("hi")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failover_tries_next_on_error() {
        let failing = MockProvider::new("fail");
        failing.push_error("boom");
        let failing = Arc::new(failing);

        let good = MockProvider::new("good");
        good.push_text("recovered");
        let good = Arc::new(good);

        let registry = ProviderRegistry::new(vec![
            entry("fail", failing.clone(), 0, &[]),
            entry("good", good.clone(), 1, &[]),
        ]);

        let resp = registry.chat(&req(), None).await.unwrap();
        assert_eq!(resp.content, "recovered");
        assert_eq!(failing.call_count(), 1);
        assert_eq!(good.call_count(), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error() {
        let p1 = MockProvider::new("p1");
        p1.push_error("first error");
        let p2 = MockProvider::new("p2");
        p2.push_error("second error");

        let registry = ProviderRegistry::new(vec![
            entry("p1", Arc::new(p1), 0, &[]),
            entry("p2", Arc::new(p2), 1, &[]),
        ]);

        let err = registry.chat(&req(), None).await.unwrap_err();
        assert!(err.to_string().contains("second error"));
    }

    #[tokio::test]
    async fn purpose_routes_to_tagged_entry() {
        let general = Arc::new(MockProvider::new("general"));
        general.push_text("general");
        let summarizer = Arc::new(MockProvider::new("summarizer"));
        summarizer.push_text("summary");

        let registry = ProviderRegistry::new(vec![
            entry("general", general.clone(), 0, &["chat"]),
            entry("summarizer", summarizer.clone(), 1, &["summarize"]),
        ]);

        let resp = registry.chat(&req(), Some("summarize")).await.unwrap();
        assert_eq!(resp.content, "summary");
        assert_eq!(general.call_count(), 0);
    }

    #[tokio::test]
    async fn unmatched_purpose_falls_back_to_all() {
        let only = Arc::new(MockProvider::new("only"));
        only.push_text("still works");

        let registry = ProviderRegistry::new(vec![entry("only", only.clone(), 0, &["chat"])]);
        let resp = registry.chat(&req(), Some("unknown-purpose")).await.unwrap();
        assert_eq!(resp.content, "still works");
    }

    #[tokio::test]
    async fn empty_purposes_serve_any_purpose() {
        let wildcard = Arc::new(MockProvider::new("wildcard"));
        wildcard.push_text("wild");

        let registry = ProviderRegistry::new(vec![entry("wildcard", wildcard, 0, &[])]);
        let resp = registry.chat(&req(), Some("summarize")).await.unwrap();
        assert_eq!(resp.content, "wild");
    }

    #[tokio::test]
    async fn default_model_fills_missing_request_model() {
        let p = Arc::new(MockProvider::new("p"));
        p.push_text("ok");
        let registry = ProviderRegistry::new(vec![entry("p", p.clone(), 0, &[])]);

        registry.chat(&req(), None).await.unwrap();
        assert_eq!(p.last_model().as_deref(), Some("p-model"));
    }

    #[tokio::test]
    async fn non_streaming_provider_adapts_to_single_chunk() {
        let p = Arc::new(MockProvider::new("plain"));
        p.push_text("entire reply");
        let registry = ProviderRegistry::new(vec![entry("plain", p, 0, &[])]);

        let mut stream = registry.chat_stream(&req(), None).await.unwrap();
        let mut tokens = Vec::new();
        let mut done = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::Token { text } => tokens.push(text),
                StreamEvent::Done { .. } => done = true,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(tokens, vec!["entire reply"]);
        assert!(done);
    }

    #[test]
    fn mask_secrets_hides_long_tokens() {
        let masked = mask_secrets("auth failed for sk-abcdefghijklmnopqrstuvwxyz123456");
        assert!(!masked.contains("abcdefghijklmnopqrstuvwxyz"));
        assert!(masked.contains("..."));
    }
}
