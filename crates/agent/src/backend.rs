//! Tool-calling generative backend.
//!
//! Runs the model/tool loop: stream a completion, forward its text, and if
//! the model asked for tools, run them, feed the results back and go again.
//! Every round is recorded so the orchestrator can persist the full
//! exchange, tool traffic included.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palaver_config::AppConfig;
use palaver_core::backend::{Backend, GenerationSink, GenerationStream};
use palaver_core::error::BackendError;
use palaver_core::message::{Message, MessageToolCall};
use palaver_core::provider::{Provider, ProviderRequest, ToolDefinition};
use palaver_core::record::{MessageRecord, RequestPart, RequestRecord, ResponsePart, ResponseRecord};
use palaver_core::tool::{ToolCall, ToolRegistry};
use tracing::{debug, info, warn};

/// The backend everything runs on outside tests.
pub struct AgentBackend {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    system_prompt: Option<String>,
    max_iterations: u32,
}

impl AgentBackend {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        temperature: f32,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            max_tokens: None,
            tools,
            system_prompt: None,
            max_iterations: 10,
        }
    }

    pub fn from_config(config: &AppConfig, provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        let mut backend = Self::new(provider, &config.default_model, config.default_temperature, tools)
            .with_max_tokens(config.default_max_tokens)
            .with_max_iterations(config.agent.max_iterations);
        backend.system_prompt = config.system_prompt.clone();
        backend
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Model rounds allowed per turn before giving up.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Instructions sent ahead of every request. Not recorded in history.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// The provider conversation for `prompt` on top of `history`.
    fn to_provider_messages(&self, history: &[MessageRecord], prompt: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system));
        }
        for record in history {
            match record {
                MessageRecord::Request(req) => {
                    for part in &req.parts {
                        messages.push(match part {
                            RequestPart::SystemPrompt { content, .. } => Message::system(content),
                            RequestPart::UserPrompt { content, .. } => Message::user(content),
                            RequestPart::ToolResult { call_id, content, .. } => {
                                Message::tool_result(call_id, value_text(content))
                            }
                        });
                    }
                }
                MessageRecord::Response(resp) => {
                    let mut text = String::new();
                    let mut tool_calls = Vec::new();
                    for part in &resp.parts {
                        match part {
                            ResponsePart::Text { content } => text.push_str(content),
                            ResponsePart::ToolInvocation {
                                tool_name,
                                call_id,
                                args,
                            } => tool_calls.push(MessageToolCall {
                                id: call_id.clone(),
                                name: tool_name.clone(),
                                arguments: args.to_string(),
                            }),
                        }
                    }
                    let mut msg = Message::assistant(text);
                    msg.tool_calls = tool_calls;
                    messages.push(msg);
                }
            }
        }
        messages.push(Message::user(prompt));
        messages
    }
}

#[async_trait]
impl Backend for AgentBackend {
    fn name(&self) -> &str {
        "agent"
    }

    async fn run_stream(
        &self,
        prompt: &str,
        history: &[MessageRecord],
    ) -> Result<GenerationStream, BackendError> {
        let started_at = Utc::now();
        let (sink, stream) = GenerationStream::channel(started_at);

        let run = AgentRun {
            provider: self.provider.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self.tools.clone(),
            tool_defs: self.tools.definitions(),
            max_iterations: self.max_iterations,
            messages: self.to_provider_messages(history, prompt),
        };

        info!(
            provider = self.provider.name(),
            model = %self.model,
            history = history.len(),
            "Starting generation"
        );

        tokio::spawn(async move {
            let mut run = run;
            match run.rounds(&sink, started_at).await {
                Ok(records) => sink.finish(records),
                Err(e) => {
                    warn!(error = %e, "Generation failed");
                    sink.fail(e).await;
                }
            }
        });

        Ok(stream)
    }
}

/// Everything one generation needs, owned by its task.
struct AgentRun {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    tool_defs: Vec<ToolDefinition>,
    max_iterations: u32,
    messages: Vec<Message>,
}

impl AgentRun {
    /// Each round is its own model message: it starts a new streamed
    /// message and its record is stamped with that message's start time.
    async fn rounds(
        &mut self,
        sink: &GenerationSink,
        started_at: DateTime<Utc>,
    ) -> Result<Vec<MessageRecord>, BackendError> {
        let mut records = Vec::new();
        let mut message_started = started_at;

        for iteration in 1..=self.max_iterations {
            debug!(iteration, "Model round");
            if iteration > 1 {
                message_started = Utc::now();
                if !sink.new_message(message_started).await {
                    return Err(BackendError::Disconnected);
                }
            }

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: self.messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: self.tool_defs.clone(),
                stream: true,
            };
            let mut chunks = self.provider.stream(request).await?;

            let mut text = String::new();
            let mut calls: Vec<MessageToolCall> = Vec::new();
            while let Some(chunk) = chunks.recv().await {
                let chunk = chunk?;
                if let Some(delta) = chunk.content
                    && !delta.is_empty()
                {
                    text.push_str(&delta);
                    if !sink.fragment(delta).await {
                        return Err(BackendError::Disconnected);
                    }
                }
                calls.extend(chunk.tool_calls);
            }

            if calls.is_empty() {
                records.push(MessageRecord::Response(ResponseRecord {
                    parts: vec![ResponsePart::Text { content: text }],
                    timestamp: message_started,
                    model_name: Some(self.model.clone()),
                }));
                return Ok(records);
            }

            for call in &mut calls {
                if call.id.is_empty() {
                    call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
                }
            }

            let mut parts = Vec::with_capacity(calls.len() + 1);
            if !text.is_empty() {
                parts.push(ResponsePart::Text {
                    content: text.clone(),
                });
            }
            parts.extend(calls.iter().map(|c| ResponsePart::ToolInvocation {
                tool_name: c.name.clone(),
                call_id: c.id.clone(),
                args: parse_arguments(&c.arguments),
            }));
            records.push(MessageRecord::Response(ResponseRecord {
                parts,
                timestamp: message_started,
                model_name: Some(self.model.clone()),
            }));

            let mut assistant = Message::assistant(text);
            assistant.tool_calls = calls.clone();
            self.messages.push(assistant);

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                let output = self.execute(call).await;
                self.messages.push(Message::tool_result(&call.id, &output));
                results.push(RequestPart::ToolResult {
                    tool_name: call.name.clone(),
                    call_id: call.id.clone(),
                    content: serde_json::Value::String(output),
                    timestamp: Utc::now(),
                });
            }
            records.push(MessageRecord::Request(RequestRecord { parts: results }));
        }

        Err(BackendError::IterationLimit {
            iterations: self.max_iterations,
        })
    }

    /// Run one tool call. Failures become text for the model.
    async fn execute(&self, call: &MessageToolCall) -> String {
        let tool_call = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: parse_arguments(&call.arguments),
        };

        let start = std::time::Instant::now();
        let result = self.tools.execute(&tool_call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(r) => {
                debug!(tool = %call.name, duration_ms, success = r.success, "Tool executed");
                r.output
            }
            Err(e) => {
                warn!(tool = %call.name, duration_ms, error = %e, "Tool failed");
                format!("Error: {e}")
            }
        }
    }
}

/// Model-produced argument JSON; empty means no arguments.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
