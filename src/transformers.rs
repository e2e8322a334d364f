//! Message transformers
//!
//! Input transformers rewrite the history sent upstream and never touch the
//! stored conversation. Output transformers rewrite each emitted snapshot
//! before it is merged, so they must give the same result when applied to
//! successive snapshots of one message.

mod base64_image;
mod document;
mod html_escape;
mod placeholder;
mod template;
mod think_tag;

pub use base64_image::Base64ImageToLocalFile;
pub use document::DocumentAsPrompt;
pub use html_escape::{unescape_html, HtmlEscape};
pub use placeholder::{render_placeholders, Placeholder};
pub use template::Template;
pub use think_tag::ThinkTag;

use crate::config::{Assistant, Settings};
use crate::files::ChatFiles;
use crate::llm::ModelInfo;
use crate::message::{Message, Part, Role};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
#[error("Transformer {transformer} failed: {message}")]
pub struct TransformError {
    pub transformer: &'static str,
    pub message: String,
}

impl TransformError {
    pub fn new(transformer: &'static str, message: impl Into<String>) -> Self {
        Self {
            transformer,
            message: message.into(),
        }
    }
}

/// Everything a transformer may read about the current request
#[derive(Debug, Clone)]
pub struct TransformContext {
    /// Conversation whose files the output is saved under
    pub conversation_id: Uuid,
    pub model: ModelInfo,
    pub assistant: Assistant,
    pub settings: Settings,
    pub files: ChatFiles,
}

#[async_trait]
pub trait InputTransformer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transform(
        &self,
        ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, TransformError>;
}

#[async_trait]
pub trait OutputTransformer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transform(
        &self,
        ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, TransformError>;
}

/// Ordered input and output transformer chains
#[derive(Clone, Default)]
pub struct Transformers {
    input: Vec<Arc<dyn InputTransformer>>,
    output: Vec<Arc<dyn OutputTransformer>>,
}

impl Transformers {
    pub fn new(
        input: Vec<Arc<dyn InputTransformer>>,
        output: Vec<Arc<dyn OutputTransformer>>,
    ) -> Self {
        Self { input, output }
    }

    /// The built-in chains
    pub fn builtin() -> Self {
        Self::new(
            vec![
                Arc::new(Template),
                Arc::new(Placeholder),
                Arc::new(DocumentAsPrompt),
            ],
            vec![
                Arc::new(HtmlEscape),
                Arc::new(ThinkTag),
                Arc::new(Base64ImageToLocalFile),
            ],
        )
    }

    pub async fn apply_input(
        &self,
        ctx: &TransformContext,
        mut messages: Vec<Message>,
    ) -> Result<Vec<Message>, TransformError> {
        for transformer in &self.input {
            messages = transformer.transform(ctx, messages).await?;
        }
        Ok(messages)
    }

    pub async fn apply_output(
        &self,
        ctx: &TransformContext,
        mut messages: Vec<Message>,
    ) -> Result<Vec<Message>, TransformError> {
        for transformer in &self.output {
            messages = transformer.transform(ctx, messages).await?;
        }
        Ok(messages)
    }
}

/// Rewrite the text parts of every message with the given role
fn map_text_parts(
    messages: Vec<Message>,
    role: Role,
    mut f: impl FnMut(&Message, &str) -> String,
) -> Vec<Message> {
    messages
        .into_iter()
        .map(|message| {
            if message.role != role {
                return message;
            }
            let parts = message
                .parts
                .iter()
                .map(|part| match part {
                    Part::Text { content } => Part::text(f(&message, content)),
                    other => other.clone(),
                })
                .collect();
            Message { parts, ..message }
        })
        .collect()
}
