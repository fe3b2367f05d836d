//! The agent loop.
//!
//! One consumer turns each inbound message into one assistant reply
//! through zero or more tool-use iterations, persisting every step to
//! the session log and enforcing the token budget, iteration cap, and
//! recovery rules along the way.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use janus_bus::MessageBus;
use janus_context::{ContextBuilder, PromptInput};
use janus_domain::config::{Config, LlmErrorPolicy, UserConfig};
use janus_domain::user::resolve_user;
use janus_domain::{
    strip_orphan_tool_prefix, ContextMode, Error, InboundMessage, LlmMessage, OutboundKind,
    OutboundMessage, Result, Scope, StreamEvent, ToolCall, UserBinding,
};
use janus_learner::{ExecutionRecord, Learner, Outcome};
use janus_providers::{ChatRequest, ChatResponse, ProviderRegistry};
use janus_sessions::SessionStore;
use janus_tools::{ToolContext, ToolRegistry};

use crate::summarizer::Summarizer;

/// Tool results longer than this are head+tail truncated.
const TOOL_RESULT_CAP: usize = 4000;

/// Emergency compressions allowed per request.
const MAX_OVERFLOW_RETRIES: u32 = 2;

fn overflow_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)token|context|length|too long").expect("static pattern"))
}

fn noop_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(HEARTBEAT_OK|no.?op|nothing to do|all good)").expect("static pattern")
    })
}

/// Options for [`Agent::process_direct`].
#[derive(Debug, Clone)]
pub struct DirectOptions {
    pub channel: String,
    pub chat_id: String,
    pub user: Option<UserBinding>,
    pub scope: Option<Scope>,
    pub context_mode: Option<ContextMode>,
    pub max_iterations: Option<u32>,
}

impl Default for DirectOptions {
    fn default() -> Self {
        Self {
            channel: "direct".into(),
            chat_id: uuid::Uuid::new_v4().to_string(),
            user: None,
            scope: None,
            context_mode: None,
            max_iterations: None,
        }
    }
}

struct IterationResult {
    content: String,
    outcome: Outcome,
    iterations: u32,
    tool_calls: u32,
    tokens_used: u64,
    streamed: bool,
}

pub struct Agent {
    config: Config,
    bus: Arc<MessageBus>,
    sessions: Arc<SessionStore>,
    providers: Arc<ProviderRegistry>,
    tools: Arc<ToolRegistry>,
    context: Arc<ContextBuilder>,
    learner: Arc<Learner>,
    summarizer: Arc<Summarizer>,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        bus: Arc<MessageBus>,
        sessions: Arc<SessionStore>,
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        context: Arc<ContextBuilder>,
        learner: Arc<Learner>,
        summarizer: Arc<Summarizer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            sessions,
            providers,
            tools,
            context,
            learner,
            summarizer,
        })
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume inbound messages until cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("agent loop started");
        loop {
            let msg = match self.bus.consume_inbound(&cancel).await {
                Ok(msg) => msg,
                Err(e) if e.is_cancelled() => {
                    tracing::debug!("agent loop stopping");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "inbound consume failed");
                    return;
                }
            };
            if let Err(e) = self.handle_message(msg, &cancel).await {
                if e.is_cancelled() {
                    return;
                }
                tracing::error!(error = %e, "message handling failed");
            }
        }
    }

    /// Process one message synchronously and return the final text.
    /// Used by child agents, one-shot mode, and tests.
    pub async fn process_direct(&self, text: &str, opts: DirectOptions) -> Result<String> {
        let mut msg = InboundMessage::new(&opts.channel, &opts.chat_id, text, "direct");
        msg.user = opts.user;
        msg.scope = opts.scope;
        msg.context_mode = opts.context_mode;

        let max_iterations = opts.max_iterations.unwrap_or(self.config.agent.max_iterations);
        let result = self.process(&msg, max_iterations, false).await?;
        Ok(result.content)
    }

    // ── Per-message pipeline ──────────────────────────────────────

    async fn handle_message(&self, msg: InboundMessage, cancel: &CancellationToken) -> Result<()> {
        let is_system = msg.channel == "system";

        let result = self
            .process(&msg, self.config.agent.max_iterations, !is_system)
            .await;

        let (content, streamed) = match result {
            Ok(outcome) => (outcome.content, outcome.streamed),
            Err(e) => {
                tracing::error!(error = %e, channel = %msg.channel, "processing failed");
                (format!("Error: {e}"), false)
            }
        };

        if is_system {
            // No-op replies from heartbeat/cron runs are suppressed;
            // everything else is rerouted to where the user actually is.
            if noop_pattern().is_match(content.trim()) {
                tracing::debug!(chat_id = %msg.chat_id, "suppressing no-op system reply");
                return Ok(());
            }
            let (channel, chat_id) = self.config.default_user_channel();
            self.bus
                .publish_outbound(
                    OutboundMessage::new(channel, chat_id, content, OutboundKind::Message),
                    cancel,
                )
                .await?;
            return Ok(());
        }

        if !streamed {
            self.bus
                .publish_outbound(
                    OutboundMessage::new(
                        msg.channel.clone(),
                        msg.chat_id.clone(),
                        content,
                        OutboundKind::Message,
                    ),
                    cancel,
                )
                .await?;
        }
        Ok(())
    }

    async fn process(
        &self,
        msg: &InboundMessage,
        max_iterations: u32,
        allow_streaming: bool,
    ) -> Result<IterationResult> {
        let started = Instant::now();
        let key = msg.session_key();

        // Resolve the sender against configured users.
        let user_cfg: Option<&UserConfig> = msg
            .user
            .as_ref()
            .and_then(|binding| resolve_user(&self.config.users, &msg.channel, binding));

        let ctx = self.tool_context(msg, user_cfg);

        // Assemble the prompt from session + memory + skills state.
        self.sessions.get_or_create(&key);
        let tool_specs = self.tools.specs_for(
            user_cfg.and_then(|u| u.tools.allow.as_ref()),
            user_cfg.map(|u| u.tools.deny.as_slice()).unwrap_or(&[]),
        );
        let mode = msg.context_mode.unwrap_or_default();
        let prompt = self
            .context
            .build(&PromptInput {
                message: msg,
                mode,
                user: user_cfg,
                tool_specs: &tool_specs,
                session_summary: self.sessions.summary(&key),
            })
            .await;

        let mut history = self.sessions.messages(&key);
        strip_orphan_tool_prefix(&mut history);
        trim_to_budget(&mut history, self.config.agent.token_budget);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(LlmMessage::system(prompt));
        messages.extend(history);
        messages.push(LlmMessage::user(&msg.content));

        // The user message is durable before any provider call.
        self.sessions.append(&key, &[LlmMessage::user(&msg.content)])?;

        let result = self
            .iterate(&key, messages, msg, &ctx, tool_specs, max_iterations, allow_streaming)
            .await?;

        self.sessions
            .append(&key, &[LlmMessage::assistant(&result.content)])?;

        self.record_execution(msg, &result, started);
        self.maybe_summarize(&key);

        Ok(result)
    }

    fn tool_context(&self, msg: &InboundMessage, user_cfg: Option<&UserConfig>) -> ToolContext {
        ToolContext {
            workspace_dir: self.config.workspace.dir.clone().into(),
            exec_deny_patterns: self.config.tools.exec_deny_patterns.clone(),
            exec_timeout_ms: self.config.tools.exec_timeout,
            max_file_size: self.config.tools.max_file_size,
            chat_id: msg.chat_id.clone(),
            user_id: msg.user.as_ref().map(|b| b.user_id.clone()),
            tool_allow: user_cfg.and_then(|u| u.tools.allow.clone()),
            tool_deny: user_cfg.map(|u| u.tools.deny.clone()).unwrap_or_default(),
            content_policy: user_cfg.and_then(|u| u.content_policy.clone()),
        }
    }

    // ── Iteration ─────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn iterate(
        &self,
        key: &str,
        mut messages: Vec<LlmMessage>,
        msg: &InboundMessage,
        ctx: &ToolContext,
        tool_specs: Vec<janus_domain::ToolSpec>,
        max_iterations: u32,
        allow_streaming: bool,
    ) -> Result<IterationResult> {
        let streaming = allow_streaming
            && self.config.streaming.enabled
            && self.bus.has_handler(&msg.channel);

        let mut overflow_retries = 0u32;
        let mut total_tool_calls = 0u32;
        let mut tokens_used = 0u64;
        let mut last_content = String::new();
        let mut iteration = 0u32;

        while iteration < max_iterations {
            iteration += 1;

            let req = ChatRequest {
                messages: messages.clone(),
                tools: tool_specs.clone(),
                model: None,
                max_tokens: Some(self.config.llm.max_tokens),
                temperature: Some(self.config.llm.temperature),
            };

            let response = if streaming {
                self.stream_chat(&req, msg).await
            } else {
                self.providers.chat(&req, None).await
            };

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    let text = e.to_string();
                    if overflow_pattern().is_match(&text)
                        && overflow_retries < MAX_OVERFLOW_RETRIES
                    {
                        overflow_retries += 1;
                        emergency_compress(&mut messages);
                        tracing::warn!(
                            retry = overflow_retries,
                            remaining = messages.len(),
                            "context overflow, compressed prompt"
                        );
                        // The compressed prompt retries the same turn.
                        iteration -= 1;
                        continue;
                    }
                    match self.config.agent.on_llm_error {
                        LlmErrorPolicy::Retry => {
                            tracing::warn!(error = %text, "LLM call failed, retrying");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                            continue;
                        }
                        LlmErrorPolicy::Stop => {
                            let content = if last_content.is_empty() {
                                format!("Error: {text}")
                            } else {
                                last_content
                            };
                            return Ok(IterationResult {
                                content,
                                outcome: Outcome::Error,
                                iterations: iteration,
                                tool_calls: total_tool_calls,
                                tokens_used,
                                streamed: false,
                            });
                        }
                    }
                }
            };

            if let Some(usage) = response.usage {
                tokens_used += usage.total_tokens as u64;
            }
            if !response.content.is_empty() {
                last_content = response.content.clone();
            }

            // No tool calls: this is the final reply.
            if response.tool_calls.is_empty() {
                if streaming {
                    self.bus
                        .stream_to(&msg.channel, &msg.chat_id, OutboundKind::StreamEnd, "")
                        .await?;
                }
                return Ok(IterationResult {
                    content: response.content,
                    outcome: Outcome::Success,
                    iterations: iteration,
                    tool_calls: total_tool_calls,
                    tokens_used,
                    streamed: streaming,
                });
            }

            // Tool round: record the assistant turn, run every call,
            // feed results back into the context and the session.
            let assistant = LlmMessage::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            );
            messages.push(assistant.clone());
            self.sessions.append(key, &[assistant])?;

            for call in &response.tool_calls {
                total_tool_calls += 1;
                let result = self.execute_with_retries(call, ctx).await;
                let result = truncate_tool_result(&result, TOOL_RESULT_CAP);
                let tool_msg = LlmMessage::tool_result(&call.id, result);
                messages.push(tool_msg.clone());
                self.sessions.append(key, &[tool_msg])?;
            }
        }

        Ok(IterationResult {
            content: "I hit the iteration limit before finishing. The work so far is in the \
                      session log; ask me to continue if needed."
                .into(),
            outcome: Outcome::MaxIterations,
            iterations: max_iterations,
            tool_calls: total_tool_calls,
            tokens_used,
            streamed: false,
        })
    }

    /// Run one tool call, retrying `Error:`-results with linear backoff.
    async fn execute_with_retries(&self, call: &ToolCall, ctx: &ToolContext) -> String {
        let mut result = self
            .tools
            .execute(&call.name, call.arguments.clone(), ctx)
            .await;
        let mut attempt = 0u32;
        while result.starts_with("Error:") && attempt < self.config.agent.tool_retries {
            attempt += 1;
            tokio::time::sleep(std::time::Duration::from_millis(500 * attempt as u64)).await;
            tracing::debug!(tool = %call.name, attempt, "retrying failed tool call");
            result = self
                .tools
                .execute(&call.name, call.arguments.clone(), ctx)
                .await;
        }
        result
    }

    /// Streaming variant of one provider call: chunks go out through
    /// the bus bypass while the full response is assembled locally.
    async fn stream_chat(&self, req: &ChatRequest, msg: &InboundMessage) -> Result<ChatResponse> {
        let mut stream = self.providers.chat_stream(req, None).await?;

        let mut response = ChatResponse::default();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Token { text } => {
                    self.bus
                        .stream_to(&msg.channel, &msg.chat_id, OutboundKind::Chunk, &text)
                        .await?;
                    response.content.push_str(&text);
                }
                StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                } => response.tool_calls.push(ToolCall {
                    id: call_id,
                    name: tool_name,
                    arguments,
                }),
                StreamEvent::Done {
                    usage,
                    finish_reason,
                } => {
                    response.usage = usage;
                    response.finish_reason = finish_reason;
                }
                StreamEvent::Error { message } => {
                    return Err(Error::Provider {
                        provider: "stream".into(),
                        message,
                    });
                }
            }
        }
        Ok(response)
    }

    // ── Bookkeeping ───────────────────────────────────────────────

    fn record_execution(&self, msg: &InboundMessage, result: &IterationResult, started: Instant) {
        let record = ExecutionRecord::new(
            &msg.content,
            started.elapsed().as_millis() as u64,
            result.iterations,
            result.tool_calls,
            result.tokens_used,
            result.outcome,
        );
        let learner = self.learner.clone();
        tokio::spawn(async move {
            if let Err(e) = learner.record(record).await {
                tracing::warn!(error = %e, "failed to record execution metric");
            }
        });
    }

    fn maybe_summarize(&self, key: &str) {
        let count = self.sessions.message_count(key);
        let estimated: usize = self
            .sessions
            .messages(key)
            .iter()
            .map(|m| estimate_tokens(m.content()))
            .sum();
        let budget_trigger = self.config.agent.token_budget * 3 / 4;

        if count <= self.config.agent.summarization_threshold && estimated <= budget_trigger {
            return;
        }

        tracing::info!(key, count, estimated, "triggering session summarization");
        let summarizer = self.summarizer.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = summarizer.summarize_session(&key).await {
                tracing::warn!(key, error = %e, "summarization failed");
            }
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt-shaping helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rough character-based token estimate.
pub(crate) fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Drop the oldest history until the estimate fits the budget.
pub(crate) fn trim_to_budget(history: &mut Vec<LlmMessage>, budget_tokens: usize) {
    let mut total: usize = history.iter().map(|m| estimate_tokens(m.content())).sum();
    while total > budget_tokens && !history.is_empty() {
        let removed = history.remove(0);
        total = total.saturating_sub(estimate_tokens(removed.content()));
    }
    // Trimming may strand tool results at the head.
    strip_orphan_tool_prefix(history);
}

/// Keep the system prompt, drop the older half of everything else.
pub(crate) fn emergency_compress(messages: &mut Vec<LlmMessage>) {
    if messages.len() <= 1 {
        return;
    }
    let rest = messages.split_off(1);
    let drop = rest.len() / 2;
    messages.extend(rest.into_iter().skip(drop));
    // The surviving half must not start with orphan tool results either.
    let mut tail = messages.split_off(1);
    strip_orphan_tool_prefix(&mut tail);
    messages.extend(tail);
}

/// Head+tail truncation with an elision marker.
pub(crate) fn truncate_tool_result(result: &str, cap: usize) -> String {
    if result.len() <= cap {
        return result.to_string();
    }
    let half = cap / 2;
    let mut head_end = half;
    while !result.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = result.len() - half;
    while !result.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    let omitted = tail_start - head_end;
    format!(
        "{}\n[... truncated {omitted} characters ...]\n{}",
        &result[..head_end],
        &result[tail_start..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_quarter_of_chars() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn trim_drops_oldest_first() {
        let mut history: Vec<LlmMessage> = (0..10)
            .map(|i| LlmMessage::user(format!("{}{}", "x".repeat(400), i)))
            .collect();
        trim_to_budget(&mut history, 300);
        assert!(history.len() < 10);
        assert!(history.last().unwrap().content().ends_with('9'));
    }

    #[test]
    fn trim_strips_stranded_tool_heads() {
        let mut history = vec![
            LlmMessage::user("x".repeat(4000)),
            LlmMessage::assistant_with_tools(
                "thinking",
                vec![ToolCall {
                    id: "tc".into(),
                    name: "exec".into(),
                    arguments: serde_json::json!({}),
                }],
            ),
            LlmMessage::tool_result("tc", "result!!"),
            LlmMessage::assistant("done"),
        ];
        // The budget forces out the user and assistant turns, which
        // would leave the tool result stranded at the head.
        trim_to_budget(&mut history, 3);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role(), "assistant");
        assert_eq!(history[0].content(), "done");
    }

    #[test]
    fn compress_halves_non_system_and_keeps_system_first() {
        let mut messages = vec![LlmMessage::system("prompt")];
        for i in 0..8 {
            messages.push(LlmMessage::user(format!("m{i}")));
        }
        emergency_compress(&mut messages);

        assert_eq!(messages[0], LlmMessage::system("prompt"));
        // 8 non-system messages halve to 4.
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[1].content(), "m4");
    }

    #[test]
    fn compress_on_odd_counts_keeps_ceiling() {
        let mut messages = vec![LlmMessage::system("s")];
        for i in 0..5 {
            messages.push(LlmMessage::user(format!("m{i}")));
        }
        emergency_compress(&mut messages);
        // ceil(5/2) = 3 survivors.
        assert_eq!(messages.len(), 4);
    }

    #[test]
    fn truncate_marks_omitted_middle() {
        let long = format!("{}{}{}", "a".repeat(3000), "MIDDLE", "b".repeat(3000));
        let out = truncate_tool_result(&long, 4000);
        assert!(out.len() < long.len());
        assert!(out.contains("[... truncated"));
        assert!(!out.contains("MIDDLE"));
        assert!(out.starts_with("aaa"));
        assert!(out.ends_with("bbb"));
    }

    #[test]
    fn short_results_pass_through() {
        assert_eq!(truncate_tool_result("short", 4000), "short");
    }

    #[test]
    fn noop_pattern_matches_expected_replies() {
        for text in ["HEARTBEAT_OK", "no-op", "noop", "Nothing to do here", "all good!"] {
            assert!(noop_pattern().is_match(text), "{text} should match");
        }
        assert!(!noop_pattern().is_match("Done: restarted the service"));
    }

    #[test]
    fn overflow_pattern_matches_provider_wording() {
        for text in [
            "maximum context length exceeded",
            "too many tokens",
            "prompt is too long",
        ] {
            assert!(overflow_pattern().is_match(text), "{text} should match");
        }
        assert!(!overflow_pattern().is_match("rate limit exceeded"));
    }
}
