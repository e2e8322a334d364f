//! Model backend abstraction
//!
//! Provider-specific protocol adaptation lives behind `ModelBackend`; the
//! rest of the crate only sees message snapshots.

mod error;
mod registry;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use registry::ModelRegistry;
pub use types::*;

use crate::message::Message;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

/// Stream of snapshots for one model turn.
///
/// Each item is the full list of messages produced so far in the turn, not a
/// delta on top of the previous item.
pub type SnapshotStream = BoxStream<'static, Result<Vec<Message>, LlmError>>;

/// Common interface for model providers
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Start a streaming generation for one turn
    async fn generate(&self, request: &GenerationRequest) -> Result<SnapshotStream, LlmError>;

    /// Single non-streaming completion
    async fn generate_once(&self, request: &GenerationRequest) -> Result<Message, LlmError>;
}

#[async_trait]
impl<T: ModelBackend + ?Sized> ModelBackend for Arc<T> {
    async fn generate(&self, request: &GenerationRequest) -> Result<SnapshotStream, LlmError> {
        (**self).generate(request).await
    }

    async fn generate_once(&self, request: &GenerationRequest) -> Result<Message, LlmError> {
        (**self).generate_once(request).await
    }
}

/// Logging wrapper for model backends
pub struct LoggingBackend {
    inner: Arc<dyn ModelBackend>,
    model_id: String,
}

impl LoggingBackend {
    pub fn new(inner: Arc<dyn ModelBackend>, model_id: impl Into<String>) -> Self {
        Self {
            inner,
            model_id: model_id.into(),
        }
    }
}

#[async_trait]
impl ModelBackend for LoggingBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<SnapshotStream, LlmError> {
        let start = std::time::Instant::now();
        let model = self.model_id.clone();
        match self.inner.generate(request).await {
            Ok(stream) => {
                tracing::info!(
                    model = %model,
                    duration_ms = %start.elapsed().as_millis(),
                    messages = request.messages.len(),
                    tools = request.tools.len(),
                    "Generation stream opened"
                );
                Ok(stream
                    .inspect(move |item| {
                        if let Err(e) = item {
                            tracing::error!(
                                model = %model,
                                duration_ms = %start.elapsed().as_millis(),
                                error = %e.message,
                                retryable = e.kind.is_retryable(),
                                "Generation stream failed"
                            );
                        }
                    })
                    .boxed())
            }
            Err(e) => {
                tracing::error!(
                    model = %model,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "Generation request failed"
                );
                Err(e)
            }
        }
    }

    async fn generate_once(&self, request: &GenerationRequest) -> Result<Message, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.generate_once(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(message) => {
                let usage = message.usage.unwrap_or_default();
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    input_tokens = usage.prompt_tokens,
                    output_tokens = usage.completion_tokens,
                    "Completion finished"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "Completion failed"
                );
            }
        }

        result
    }
}
