//! OpenAI-compatible chat-completions adapter.
//!
//! Covers every vendor speaking the `/chat/completions` wire format
//! (openrouter, openai, deepseek, groq). Transient failures are retried
//! here, per-request, with exponential backoff; failover across
//! providers is the registry's job.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use janus_domain::{
    BoxStream, Error, LlmMessage, Result, StreamEvent, ToolCall, Usage,
};

use crate::retry::{
    backoff_delay, is_payload_too_large, is_transient_status, parse_retry_after, MAX_ATTEMPTS,
};
use crate::sse::sse_response_stream;
use crate::traits::{ChatRequest, ChatResponse, Provider};

/// Well-known API bases for the providers selectable via environment.
pub fn default_api_base(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        _ => None,
    }
}

pub struct OpenAiCompatProvider {
    name: String,
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl OpenAiCompatProvider {
    pub fn new(name: &str, api_key: &str, api_base: Option<&str>) -> Result<Self> {
        let api_base = api_base
            .map(str::to_string)
            .or_else(|| default_api_base(name).map(str::to_string))
            .ok_or_else(|| {
                Error::Config(format!(
                    "provider '{name}' has no known API base; set llm.apiBase"
                ))
            })?;

        Ok(Self {
            name: name.to_string(),
            client: reqwest::Client::new(),
            api_base,
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Result<Value> {
        let model = req.model.clone().ok_or_else(|| Error::Provider {
            provider: self.name.clone(),
            message: "no model specified".into(),
        })?;

        let messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        if let Some(max_tokens) = req.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = req.temperature {
            body["temperature"] = json!(temperature);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        Ok(body)
    }

    /// POST with transient retry (429/5xx/network), honoring Retry-After.
    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    if attempt + 1 < MAX_ATTEMPTS {
                        let delay = backoff_delay(attempt, None);
                        tracing::warn!(
                            provider = %self.name,
                            attempt,
                            error = %e,
                            "network error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(Error::Http(e.to_string()));
                }
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                return Ok(response);
            }
            if is_payload_too_large(status) {
                return Err(Error::Provider {
                    provider: self.name.clone(),
                    message: "payload too large".into(),
                });
            }
            if is_transient_status(status) && attempt + 1 < MAX_ATTEMPTS {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let delay = backoff_delay(attempt, retry_after);
                tracing::warn!(provider = %self.name, status, attempt, "transient error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.name.clone(),
                message: format!("HTTP {status}: {}", truncate(&detail, 500)),
            });
        }
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(req, false)?;
        let response = self.send(&body).await?;
        let raw: Value = response
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        parse_chat_response(&self.name, &raw)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(req, true)?;
        let response = self.send(&body).await?;

        // Assembly state shared across SSE payloads: tool-call buffers
        // keyed by stream index, plus the trailing usage/finish data.
        let mut calls: BTreeMap<u64, (String, String, String)> = BTreeMap::new();
        let mut usage: Option<Usage> = None;
        let mut finish_reason: Option<String> = None;

        Ok(sse_response_stream(response, move |payload| {
            if payload == "[DONE]" {
                let mut events: Vec<Result<StreamEvent>> = Vec::new();
                for (_, (id, name, args)) in std::mem::take(&mut calls) {
                    events.push(Ok(StreamEvent::ToolCallFinished {
                        call_id: id,
                        tool_name: name,
                        arguments: parse_arguments(&args),
                    }));
                }
                events.push(Ok(StreamEvent::Done {
                    usage: usage.take(),
                    finish_reason: finish_reason.take(),
                }));
                return events;
            }

            let Ok(chunk) = serde_json::from_str::<Value>(payload) else {
                tracing::warn!("unparseable SSE payload, skipping");
                return Vec::new();
            };

            if let Some(u) = chunk.get("usage").filter(|u| !u.is_null()) {
                usage = Some(parse_usage(u));
            }

            let mut events = Vec::new();
            if let Some(choice) = chunk["choices"].get(0) {
                if let Some(reason) = choice["finish_reason"].as_str() {
                    finish_reason = Some(reason.to_string());
                }
                let delta = &choice["delta"];
                if let Some(text) = delta["content"].as_str() {
                    if !text.is_empty() {
                        events.push(Ok(StreamEvent::Token {
                            text: text.to_string(),
                        }));
                    }
                }
                if let Some(deltas) = delta["tool_calls"].as_array() {
                    for tc in deltas {
                        let index = tc["index"].as_u64().unwrap_or(0);
                        let entry = calls.entry(index).or_default();
                        if let Some(id) = tc["id"].as_str() {
                            entry.0 = id.to_string();
                        }
                        if let Some(name) = tc["function"]["name"].as_str() {
                            entry.1.push_str(name);
                        }
                        if let Some(args) = tc["function"]["arguments"].as_str() {
                            entry.2.push_str(args);
                        }
                    }
                }
            }
            events
        }))
    }
}

fn message_to_wire(msg: &LlmMessage) -> Value {
    match msg {
        LlmMessage::System { content } => json!({"role": "system", "content": content}),
        LlmMessage::User { content } => json!({"role": "user", "content": content}),
        LlmMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut wire = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                wire["tool_calls"] = Value::Array(
                    tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                }
                            })
                        })
                        .collect(),
                );
            }
            wire
        }
        LlmMessage::Tool {
            content,
            tool_call_id,
        } => json!({"role": "tool", "content": content, "tool_call_id": tool_call_id}),
    }
}

fn parse_chat_response(provider: &str, raw: &Value) -> Result<ChatResponse> {
    let choice = raw["choices"].get(0).ok_or_else(|| Error::Provider {
        provider: provider.to_string(),
        message: "response has no choices".into(),
    })?;
    let message = &choice["message"];

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or_default().to_string(),
                    name: tc["function"]["name"].as_str().unwrap_or_default().to_string(),
                    arguments: tc["function"]["arguments"]
                        .as_str()
                        .map(parse_arguments)
                        .unwrap_or_else(|| json!({})),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content: message["content"].as_str().unwrap_or_default().to_string(),
        tool_calls,
        usage: raw.get("usage").filter(|u| !u.is_null()).map(parse_usage),
        model: raw["model"].as_str().unwrap_or_default().to_string(),
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
    })
}

/// Tool-call arguments arrive as a JSON string; malformed or empty
/// arguments default to an empty object so the tool still runs.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "tool call arguments are not valid JSON, using empty object");
        json!({})
    })
}

fn parse_usage(u: &Value) -> Usage {
    Usage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_provider_bases() {
        assert!(default_api_base("openai").is_some());
        assert!(default_api_base("groq").is_some());
        assert!(default_api_base("acme").is_none());
    }

    #[test]
    fn construction_requires_a_base_for_unknown_providers() {
        assert!(OpenAiCompatProvider::new("acme", "key", None).is_err());
        assert!(OpenAiCompatProvider::new("acme", "key", Some("https://llm.acme.dev/v1")).is_ok());
    }

    #[test]
    fn assistant_tool_calls_serialize_as_strings() {
        let msg = LlmMessage::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "tc_1".into(),
                name: "exec".into(),
                arguments: json!({"command": "ls"}),
            }],
        );
        let wire = message_to_wire(&msg);
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            json!(r#"{"command":"ls"}"#)
        );
    }

    #[test]
    fn parses_response_with_tool_calls() {
        let raw = json!({
            "model": "test-model",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "tc_1",
                        "function": {"name": "exec", "arguments": "{\"command\":\"pwd\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let resp = parse_chat_response("p", &raw).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments["command"], "pwd");
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn malformed_arguments_default_to_empty_object() {
        assert_eq!(parse_arguments("{broken"), json!({}));
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("{\"a\":1}"), json!({"a":1}));
    }

    #[test]
    fn empty_choices_is_an_error() {
        let raw = json!({"choices": []});
        assert!(parse_chat_response("p", &raw).is_err());
    }
}
