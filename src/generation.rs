//! Generation orchestrator
//!
//! Runs one session against a conversation: builds the request from the
//! effective history, streams snapshots into the timeline through the single
//! `watch::Sender`, executes tool calls between turns and finalizes the
//! conversation however the session ends.

mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use state::{transition, GenerationEvent, GenerationState, TransitionError, MAX_STEPS};

use crate::config::{Assistant, Settings};
use crate::conversation::Conversation;
use crate::db::DbError;
use crate::files::ChatFiles;
use crate::llm::{GenerationParams, GenerationRequest, LlmError, ModelBackend, ModelInfo};
use crate::message::{limit_context, truncate, Message, Part, Role, Usage};
use crate::tools::{ToolContext, ToolError, ToolRegistry};
use crate::transformers::{render_placeholders, TransformContext, TransformError, Transformers};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Attempts per model turn for retryable errors raised before any output
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Session-level error reported to callers
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("Storage error: {0}")]
    Storage(String),
    /// Non-fatal: reported before sending, the session continues without tools
    #[error("Model {model} does not support tool use; enabled tools will be ignored")]
    ToolsIgnored { model: String },
    #[error("No chat model configured")]
    NoModel,
    #[error("Invalid generation state: {0}")]
    Internal(String),
}

impl From<DbError> for ChatError {
    fn from(e: DbError) -> Self {
        ChatError::Storage(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Completed,
    Cancelled,
    Failed(ChatError),
}

/// Why a turn stopped early
enum Interrupt {
    Cancelled,
    Failed(ChatError),
}

impl From<LlmError> for Interrupt {
    fn from(e: LlmError) -> Self {
        Interrupt::Failed(e.into())
    }
}

impl From<TransformError> for Interrupt {
    fn from(e: TransformError) -> Self {
        Interrupt::Failed(e.into())
    }
}

/// One generation session
pub struct Generation {
    model: ModelInfo,
    backend: Arc<dyn ModelBackend>,
    assistant: Assistant,
    settings: Settings,
    tools: ToolRegistry,
    transformers: Transformers,
    files: ChatFiles,
    history_len: Option<usize>,
    retry_delay: Duration,
}

impl Generation {
    /// Session for the settings' current assistant with no tools and no
    /// transformers
    pub fn new(
        model: ModelInfo,
        backend: Arc<dyn ModelBackend>,
        settings: Settings,
        files: ChatFiles,
    ) -> Self {
        Self {
            model,
            backend,
            assistant: settings.current_assistant(),
            settings,
            tools: ToolRegistry::empty(),
            transformers: Transformers::default(),
            files,
            history_len: None,
            retry_delay: RETRY_BASE_DELAY,
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_transformers(mut self, transformers: Transformers) -> Self {
        self.transformers = transformers;
        self
    }

    /// Generate from the first `len` current messages only. The reply lands
    /// on node `len` as a new variant, or on the node of a trailing tool
    /// call the slice left unanswered.
    #[must_use]
    pub fn with_history_len(mut self, len: usize) -> Self {
        self.history_len = Some(len);
        self
    }

    /// Base delay between retries; doubles per attempt
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Drive the session to a terminal state.
    ///
    /// Every write goes through `conversation`. Non-fatal warnings go to
    /// `warnings`; the fatal error, if any, is returned in the outcome.
    pub async fn run(
        self,
        conversation: &watch::Sender<Conversation>,
        warnings: &broadcast::Sender<ChatError>,
        cancel: &CancellationToken,
    ) -> GenerationOutcome {
        conversation.send_modify(|c| *c = c.check_invalid_messages());
        let conv_id = conversation.borrow().id;
        let mut emitted = {
            let current = conversation.borrow().current_messages();
            match self.history_len {
                Some(len) => {
                    let mut history = current[..len.min(current.len())].to_vec();
                    // The results of a trailing call were cut off with the slice
                    while history.last().is_some_and(|m| !m.tool_calls().is_empty()) {
                        history.pop();
                    }
                    history
                }
                None => current,
            }
        };

        let tools = if self.model.supports_tools() {
            self.tools.clone()
        } else {
            if !self.tools.is_empty() {
                tracing::warn!(
                    conv_id = %conv_id,
                    model = %self.model.model_id,
                    tools = self.tools.len(),
                    "Model lacks tool use, ignoring tools"
                );
                let _ = warnings.send(ChatError::ToolsIgnored {
                    model: self.model.display_name().to_string(),
                });
            }
            ToolRegistry::empty()
        };

        let ctx = TransformContext {
            conversation_id: conv_id,
            model: self.model.clone(),
            assistant: self.assistant.clone(),
            settings: self.settings.clone(),
            files: self.files.clone(),
        };

        tracing::info!(
            conv_id = %conv_id,
            model = %self.model.model_id,
            history = emitted.len(),
            tools = tools.len(),
            "Generation started"
        );
        let start = Instant::now();

        let mut state = GenerationState::Idle;
        loop {
            let event = match &state {
                GenerationState::Idle => GenerationEvent::Start,
                GenerationState::Sending { step } => {
                    tracing::debug!(conv_id = %conv_id, step, "Requesting model turn");
                    match self
                        .turn(conversation, &mut emitted, &ctx, &tools, cancel)
                        .await
                    {
                        Ok(pending) => GenerationEvent::TurnEnded { pending },
                        Err(Interrupt::Cancelled) => GenerationEvent::Cancel,
                        Err(Interrupt::Failed(e)) => GenerationEvent::Fail(e),
                    }
                }
                GenerationState::ToolLoop { pending, .. } => {
                    tracing::debug!(conv_id = %conv_id, pending, "Executing tool calls");
                    match self
                        .answer_tool_calls(conversation, &mut emitted, &tools, conv_id, cancel)
                        .await
                    {
                        Ok(()) => GenerationEvent::ToolsAnswered,
                        Err(_) => GenerationEvent::Cancel,
                    }
                }
                GenerationState::Finalizing { .. } => {
                    finalize(conversation);
                    GenerationEvent::Finalized
                }
                GenerationState::Completed => {
                    tracing::info!(
                        conv_id = %conv_id,
                        duration_ms = %start.elapsed().as_millis(),
                        "Generation completed"
                    );
                    return GenerationOutcome::Completed;
                }
                GenerationState::Cancelled => {
                    tracing::info!(conv_id = %conv_id, "Generation cancelled");
                    return GenerationOutcome::Cancelled;
                }
                GenerationState::Failed { error } => {
                    tracing::error!(conv_id = %conv_id, error = %error, "Generation failed");
                    return GenerationOutcome::Failed(error.clone());
                }
            };

            state = match transition(&state, event) {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(conv_id = %conv_id, error = %e, "Generation state error");
                    finalize(conversation);
                    return GenerationOutcome::Failed(ChatError::Internal(e.to_string()));
                }
            };
        }
    }

    /// Run one model turn and return the number of tool calls it left pending
    async fn turn(
        &self,
        conversation: &watch::Sender<Conversation>,
        emitted: &mut Vec<Message>,
        ctx: &TransformContext,
        tools: &ToolRegistry,
        cancel: &CancellationToken,
    ) -> Result<usize, Interrupt> {
        let truncate_index = conversation.borrow().truncate_index;
        let request = self.build_request(emitted, truncate_index, ctx, tools).await?;

        let mut output: Vec<Message> = Vec::new();
        let mut attempt = 1;
        loop {
            match self
                .stream_turn(&request, conversation, emitted, &mut output, ctx, cancel)
                .await
            {
                Ok(()) => break,
                Err(Interrupt::Failed(ChatError::Llm(e)))
                    if output.is_empty() && e.kind.is_retryable() && attempt < MAX_ATTEMPTS =>
                {
                    let delay = e
                        .retry_after
                        .unwrap_or(self.retry_delay * 2u32.pow(attempt - 1));
                    tracing::warn!(
                        model = %self.model.model_id,
                        attempt,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Retrying model turn"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(Interrupt::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        emitted.extend(output);
        if tools.is_empty() {
            return Ok(0);
        }
        Ok(emitted
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map_or(0, |m| m.tool_calls().len()))
    }

    async fn stream_turn(
        &self,
        request: &GenerationRequest,
        conversation: &watch::Sender<Conversation>,
        history: &[Message],
        output: &mut Vec<Message>,
        ctx: &TransformContext,
        cancel: &CancellationToken,
    ) -> Result<(), Interrupt> {
        if !self.assistant.stream_output {
            let reply = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Interrupt::Cancelled),
                reply = self.backend.generate_once(request) => reply?,
            };
            return self
                .merge(conversation, history, output, vec![reply], ctx)
                .await;
        }

        let mut stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Interrupt::Cancelled),
            stream = self.backend.generate(request) => stream?,
        };
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Interrupt::Cancelled),
                next = stream.next() => next,
            };
            match next {
                None => return Ok(()),
                Some(Ok(snapshot)) => {
                    self.merge(conversation, history, output, snapshot, ctx).await?;
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Transform one emitted snapshot and merge it after `history`
    async fn merge(
        &self,
        conversation: &watch::Sender<Conversation>,
        history: &[Message],
        output: &mut Vec<Message>,
        snapshot: Vec<Message>,
        ctx: &TransformContext,
    ) -> Result<(), Interrupt> {
        let transformed = self.transformers.apply_output(ctx, snapshot).await?;
        let transformed = carry_over(output, transformed);
        let full: Vec<Message> = history.iter().chain(&transformed).cloned().collect();
        conversation.send_modify(|c| *c = c.update_current_messages(&full));
        *output = transformed;
        Ok(())
    }

    /// Execute the calls ending the last turn and append one result message.
    ///
    /// Failing calls still get a result carrying the error. On cancellation
    /// nothing is appended, leaving the calls for the repair pass.
    async fn answer_tool_calls(
        &self,
        conversation: &watch::Sender<Conversation>,
        emitted: &mut Vec<Message>,
        tools: &ToolRegistry,
        conv_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        let calls: Vec<(String, String, String)> = emitted
            .last()
            .map(|m| {
                m.tool_calls()
                    .into_iter()
                    .map(|(id, name, args)| (id.to_string(), name.to_string(), args.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let mut results = Vec::with_capacity(calls.len());
        for (id, name, arguments) in calls {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            let started = Instant::now();
            let ctx = ToolContext::new(cancel.clone(), conv_id, self.model.clone());
            let content = match tools.execute(&name, &arguments, ctx).await {
                Ok(value) => {
                    tracing::info!(
                        conv_id = %conv_id,
                        tool = %name,
                        duration_ms = %started.elapsed().as_millis(),
                        "Tool call finished"
                    );
                    value
                }
                Err(ToolError::Cancelled) if cancel.is_cancelled() => {
                    return Err(ToolError::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(
                        conv_id = %conv_id,
                        tool = %name,
                        error = %e,
                        "Tool call failed"
                    );
                    e.to_result_content()
                }
            };
            results.push(Part::tool_result(id, name, content));
        }

        emitted.push(Message::new(Role::Tool, results));
        conversation.send_modify(|c| *c = c.update_current_messages(emitted));
        Ok(())
    }

    async fn build_request(
        &self,
        history: &[Message],
        truncate_index: i64,
        ctx: &TransformContext,
        tools: &ToolRegistry,
    ) -> Result<GenerationRequest, TransformError> {
        let visible = limit_context(
            truncate(history, truncate_index),
            self.assistant.context_message_size,
        )
        .to_vec();
        let messages = self.transformers.apply_input(ctx, visible).await?;

        let mut system = Vec::new();
        if !self.assistant.system_prompt.trim().is_empty() {
            system.push(render_placeholders(ctx, &self.assistant.system_prompt));
        }
        system.extend(tools.system_prompt_hints(&self.model));

        let params = GenerationParams {
            temperature: Some(self.assistant.temperature),
            top_p: Some(self.assistant.top_p),
            thinking_budget: self
                .assistant
                .thinking_budget
                .filter(|_| self.model.supports_reasoning()),
            ..GenerationParams::new(self.model.clone())
        };

        Ok(GenerationRequest {
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
            tools: tools.definitions(),
            params,
        })
    }
}

/// Keep reasoning timestamps and usage stable across snapshots of the same
/// message
fn carry_over(previous: &[Message], next: Vec<Message>) -> Vec<Message> {
    next.into_iter()
        .map(|message| match previous.iter().find(|p| p.id == message.id) {
            Some(earlier) => {
                let usage = match message.usage {
                    Some(newer) => Some(Usage::merge(earlier.usage, newer)),
                    None => earlier.usage,
                };
                Message {
                    usage,
                    ..message.with_reasoning_times_from(earlier)
                }
            }
            None => message,
        })
        .collect()
}

/// Close open reasoning and stamp the update time
fn finalize(conversation: &watch::Sender<Conversation>) {
    let now = Utc::now();
    conversation.send_modify(|c| {
        *c = c.finish_reasoning(now);
        c.updated_at = now;
    });
}
