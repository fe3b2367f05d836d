//! Scripted in-memory provider for tests.
//!
//! Responses are queued ahead of time and popped per call; an exhausted
//! queue fails the call, which doubles as a "provider down" script.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use janus_domain::{BoxStream, Error, Result, StreamEvent, ToolCall};

use crate::registry::response_as_stream;
use crate::traits::{ChatRequest, ChatResponse, Provider};

enum Scripted {
    Ok(ChatResponse),
    Err(String),
}

pub struct MockProvider {
    name: String,
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    last_model: Mutex<Option<String>>,
    /// Per-call message counts, for prompt-shape assertions.
    message_counts: Mutex<Vec<usize>>,
    streaming: bool,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            last_model: Mutex::new(None),
            message_counts: Mutex::new(Vec::new()),
            streaming: false,
        }
    }

    /// A mock that reports native streaming support.
    pub fn streaming(name: &str) -> Self {
        Self {
            streaming: true,
            ..Self::new(name)
        }
    }

    pub fn push_text(&self, content: &str) {
        self.script.lock().push_back(Scripted::Ok(ChatResponse {
            content: content.to_string(),
            model: format!("{}-model", self.name),
            finish_reason: Some("stop".into()),
            ..Default::default()
        }));
    }

    pub fn push_tool_call(&self, content: &str, calls: Vec<ToolCall>) {
        self.script.lock().push_back(Scripted::Ok(ChatResponse {
            content: content.to_string(),
            tool_calls: calls,
            model: format!("{}-model", self.name),
            finish_reason: Some("tool_calls".into()),
            ..Default::default()
        }));
    }

    pub fn push_response(&self, resp: ChatResponse) {
        self.script.lock().push_back(Scripted::Ok(resp));
    }

    pub fn push_error(&self, message: &str) {
        self.script.lock().push_back(Scripted::Err(message.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The model field of the most recent request.
    pub fn last_model(&self) -> Option<String> {
        self.last_model.lock().clone()
    }

    /// Message count of every request seen, in call order.
    pub fn message_counts(&self) -> Vec<usize> {
        self.message_counts.lock().clone()
    }

    fn next(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_model.lock() = req.model.clone();
        self.message_counts.lock().push(req.messages.len());
        match self.script.lock().pop_front() {
            Some(Scripted::Ok(resp)) => Ok(resp),
            Some(Scripted::Err(message)) => Err(Error::Provider {
                provider: self.name.clone(),
                message,
            }),
            None => Err(Error::Provider {
                provider: self.name.clone(),
                message: "mock script exhausted".into(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.next(req)
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = self.next(req)?;
        Ok(response_as_stream(resp))
    }
}
