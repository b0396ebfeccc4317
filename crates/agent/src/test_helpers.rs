//! Shared test doubles for backend and orchestrator tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use palaver_core::backend::{Backend, GenerationStream};
use palaver_core::error::{BackendError, PersistenceError, ProviderError, ToolError};
use palaver_core::message::{ConversationId, Message, MessageToolCall};
use palaver_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use palaver_core::record::MessageRecord;
use palaver_core::store::HistoryStore;
use palaver_core::tool::{Tool, ToolResult};
use palaver_history::InMemoryStore;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue.
/// Panics if more calls are made than responses provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// First returns tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, thought: &str, answer: &str) -> Self {
        Self::new(vec![
            make_tool_call_response(tool_calls, thought),
            make_text_response(answer),
        ])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The `n`th request this provider received.
    pub fn request(&self, n: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let n = requests.len();
        if n >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{n}, have {})",
                responses.len()
            );
        }
        requests.push(request);
        Ok(responses[n].clone())
    }
}

/// Streams one piece of text, then drops as if the connection closed.
pub struct InterruptedProvider(pub &'static str);

#[async_trait]
impl Provider for InterruptedProvider {
    fn name(&self) -> &str {
        "interrupted_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::StreamInterrupted("streaming only".into()))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let chunk = StreamChunk {
            content: Some(self.0.into()),
            ..StreamChunk::default()
        };
        let _ = tx.send(Ok(chunk)).await;
        let _ = tx
            .send(Err(ProviderError::StreamInterrupted("stream ended without [DONE]".into())))
            .await;
        Ok(rx)
    }
}

/// A provider whose every call fails.
pub struct FailingProvider(pub ProviderError);

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(self.0.clone())
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A response with tool calls and optional leading text.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    let mut response = make_text_response(thought);
    response.message.tool_calls = tool_calls;
    response
}

pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

/// Returns its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))?;
        Ok(ToolResult::ok(text))
    }
}

/// One scripted backend action.
#[derive(Debug, Clone)]
pub enum Step {
    Fragment(&'static str),
    Pause(Duration),
    Fail(&'static str),
}

/// A backend that plays back a fixed script of fragments.
///
/// Unless overridden, it reports one model-text record holding everything
/// it emitted.
pub struct ScriptedBackend {
    steps: Vec<Step>,
    records: Option<Vec<MessageRecord>>,
    seen_history: Mutex<Vec<MessageRecord>>,
    consumer_gone: std::sync::Arc<AtomicBool>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            records: None,
            seen_history: Mutex::new(Vec::new()),
            consumer_gone: Default::default(),
        }
    }

    /// Emit each fragment with no pause between them.
    pub fn fragments(fragments: &[&'static str]) -> Self {
        Self::new(fragments.iter().map(|&f| Step::Fragment(f)).collect())
    }

    /// Report `records` instead of the default model-text record.
    pub fn reporting(mut self, records: Vec<MessageRecord>) -> Self {
        self.records = Some(records);
        self
    }

    /// History passed to the most recent `run_stream`.
    pub fn seen_history(&self) -> Vec<MessageRecord> {
        self.seen_history.lock().unwrap().clone()
    }

    /// Whether the backend noticed its consumer went away.
    pub fn saw_disconnect(&self) -> bool {
        self.consumer_gone.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run_stream(
        &self,
        _prompt: &str,
        history: &[MessageRecord],
    ) -> Result<GenerationStream, BackendError> {
        *self.seen_history.lock().unwrap() = history.to_vec();

        let (sink, stream) = GenerationStream::channel(Utc::now());
        let steps = self.steps.clone();
        let records = self.records.clone();
        let consumer_gone = self.consumer_gone.clone();

        tokio::spawn(async move {
            let mut text = String::new();
            for step in steps {
                match step {
                    Step::Fragment(f) => {
                        text.push_str(f);
                        if !sink.fragment(f).await {
                            consumer_gone.store(true, Ordering::SeqCst);
                            return;
                        }
                    }
                    Step::Pause(d) => tokio::time::sleep(d).await,
                    Step::Fail(msg) => {
                        sink.fail(BackendError::Provider(ProviderError::StreamInterrupted(msg.into())))
                            .await;
                        return;
                    }
                }
            }
            let records = records.unwrap_or_else(|| vec![MessageRecord::model_text(text, Utc::now())]);
            sink.finish(records);
        });

        Ok(stream)
    }
}

/// In-memory store that counts commits and can be told to refuse them.
pub struct RecordingStore {
    inner: InMemoryStore,
    batches: Mutex<Vec<usize>>,
    fail_appends: Option<PersistenceError>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(ConversationId::default()),
            batches: Mutex::new(Vec::new()),
            fail_appends: None,
        }
    }

    pub fn failing(err: PersistenceError) -> Self {
        Self {
            fail_appends: Some(err),
            ..Self::new()
        }
    }

    /// Sizes of the batches appended so far.
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryStore for RecordingStore {
    fn conversation_id(&self) -> &ConversationId {
        self.inner.conversation_id()
    }

    async fn append(&self, records: Vec<MessageRecord>) -> Result<(), PersistenceError> {
        if let Some(err) = &self.fail_appends {
            return Err(err.clone());
        }
        self.batches.lock().unwrap().push(records.len());
        self.inner.append(records).await
    }

    async fn read_all(&self) -> Result<Vec<MessageRecord>, PersistenceError> {
        self.inner.read_all().await
    }
}
