//! Mock implementations for testing
//!
//! These mocks drive the orchestrator and session controller without a real
//! model, tool or database.

use crate::conversation::Conversation;
use crate::db::{ConversationStore, DbError, DbResult};
use crate::llm::{GenerationRequest, LlmError, ModelBackend, SnapshotStream};
use crate::message::{Message, Part, Role};
use crate::tools::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

// ============================================================================
// Scripted model backend
// ============================================================================

type Chunk = Result<Vec<Message>, LlmError>;

/// Backend replaying queued turns.
///
/// Each `generate` call pops one turn: either an error opening the stream or
/// a list of snapshot chunks.
pub struct ScriptedBackend {
    turns: Mutex<VecDeque<Result<Vec<Chunk>, LlmError>>>,
    replies: Mutex<VecDeque<Result<Message, LlmError>>>,
    delay: Duration,
    requests: Mutex<Vec<GenerationRequest>>,
    /// Notified whenever a request starts (for test synchronization)
    pub started: Arc<Notify>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            replies: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            started: Arc::new(Notify::new()),
        }
    }

    /// Sleep before every chunk
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a turn streaming the given snapshots
    pub fn queue_turn(&self, snapshots: Vec<Vec<Message>>) {
        self.queue_stream(snapshots.into_iter().map(Ok).collect());
    }

    /// Queue a turn whose chunks may fail mid-stream
    pub fn queue_stream(&self, chunks: Vec<Chunk>) {
        self.turns.lock().unwrap().push_back(Ok(chunks));
    }

    /// Queue a failure to open the stream
    pub fn queue_error(&self, error: LlmError) {
        self.turns.lock().unwrap().push_back(Err(error));
    }

    /// Queue a one-shot completion
    pub fn queue_reply(&self, reply: Result<Message, LlmError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn recorded_requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: &GenerationRequest) {
        self.requests.lock().unwrap().push(request.clone());
        self.started.notify_one();
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<SnapshotStream, LlmError> {
        self.record(request);
        let chunks = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No scripted turn queued")))?;
        let delay = self.delay;
        Ok(futures::stream::iter(chunks)
            .then(move |chunk| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                chunk
            })
            .boxed())
    }

    async fn generate_once(&self, request: &GenerationRequest) -> Result<Message, LlmError> {
        self.record(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No scripted reply queued")))
    }
}

/// Snapshots of one assistant message whose text grows chunk by chunk
pub fn streamed_reply(chunks: &[&str]) -> Vec<Vec<Message>> {
    let message = Message::assistant("");
    let mut text = String::new();
    chunks
        .iter()
        .map(|chunk| {
            text.push_str(chunk);
            vec![message.with_parts(vec![Part::text(text.clone())])]
        })
        .collect()
}

/// Single-snapshot turn of an assistant message calling the given tools
pub fn tool_call_turn(calls: &[(&str, &str, &str)]) -> Vec<Vec<Message>> {
    let parts = calls
        .iter()
        .map(|(id, name, args)| Part::tool_call(*id, *name, *args))
        .collect();
    vec![vec![Message::new(Role::Assistant, parts)]]
}

// ============================================================================
// Mock tools
// ============================================================================

/// Tool returning a fixed value
pub struct MockTool {
    name: String,
    output: Value,
    delay: Duration,
    calls: Mutex<Vec<Value>>,
}

impl MockTool {
    pub fn new(name: impl Into<String>, output: Value) -> Self {
        Self {
            name: name.into(),
            output,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Arguments of every call so far
    pub fn recorded_calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("Mock {}", self.name)
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, arguments: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        self.calls.lock().unwrap().push(arguments);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.output.clone())
    }
}

/// Tool that always fails
pub struct FailingTool {
    name: String,
    error: ToolError,
}

impl FailingTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: ToolError::Execution("tool exploded".to_string()),
        }
    }

    pub fn with_error(mut self, error: ToolError) -> Self {
        self.error = error;
        self
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        "Always fails".to_string()
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        Err(self.error.clone())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Conversation store backed by a map
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<Uuid, Conversation>>,
    /// Number of insert and update calls
    writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(&self, id: Uuid) -> Option<Conversation> {
        self.conversations.lock().unwrap().get(&id).cloned()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Conversation>> {
        Ok(self.stored(id))
    }

    async fn insert(&self, conversation: &Conversation) -> DbResult<()> {
        *self.writes.lock().unwrap() += 1;
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn update(&self, conversation: &Conversation) -> DbResult<()> {
        *self.writes.lock().unwrap() += 1;
        let mut conversations = self.conversations.lock().unwrap();
        match conversations.get_mut(&conversation.id) {
            Some(existing) => {
                *existing = conversation.clone();
                Ok(())
            }
            None => Err(DbError::ConversationNotFound(conversation.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        self.conversations.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn list(&self) -> DbResult<Vec<Conversation>> {
        let mut all: Vec<Conversation> =
            self.conversations.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }
}
