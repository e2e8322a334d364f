use super::{map_text_parts, InputTransformer, TransformContext, TransformError};
use crate::config::DEFAULT_MESSAGE_TEMPLATE;
use crate::message::{Message, Role};
use async_trait::async_trait;
use chrono::Local;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(message|role|time)\s*\}\}").expect("template pattern"));

/// Wraps user text in the assistant's message template
pub struct Template;

#[async_trait]
impl InputTransformer for Template {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn transform(
        &self,
        ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, TransformError> {
        let template = ctx.assistant.message_template.as_str();
        if template.trim().is_empty() || template == DEFAULT_MESSAGE_TEMPLATE {
            return Ok(messages);
        }
        Ok(map_text_parts(messages, Role::User, |message, text| {
            VARIABLE
                .replace_all(template, |caps: &Captures<'_>| match &caps[1] {
                    "message" => text.to_string(),
                    "role" => message.role.as_str().to_string(),
                    _ => message
                        .created_at
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string(),
                })
                .into_owned()
        }))
    }
}
