use super::{map_text_parts, InputTransformer, TransformContext, TransformError};
use crate::message::{Message, Role};
use async_trait::async_trait;
use chrono::Local;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_]+)\s*\}\}|\{([A-Za-z_]+)\}").expect("placeholder pattern")
});

/// Expands `{{key}}` and `{key}` placeholders in user text
pub struct Placeholder;

fn value_for(ctx: &TransformContext, key: &str) -> Option<String> {
    let now = Local::now();
    let value = match key.to_ascii_lowercase().as_str() {
        "cur_date" => now.format("%Y-%m-%d").to_string(),
        "cur_time" => now.format("%H:%M:%S").to_string(),
        "cur_datetime" => now.format("%Y-%m-%d %H:%M:%S").to_string(),
        "model_id" => ctx.model.model_id.clone(),
        "model_name" => ctx.model.display_name().to_string(),
        "locale" => ctx.settings.locale.clone(),
        "timezone" => now.format("UTC%:z").to_string(),
        "nickname" | "user" => {
            if ctx.settings.user_nickname.trim().is_empty() {
                "user".to_string()
            } else {
                ctx.settings.user_nickname.clone()
            }
        }
        "char" => {
            if ctx.assistant.name.trim().is_empty() {
                "assistant".to_string()
            } else {
                ctx.assistant.name.clone()
            }
        }
        _ => return None,
    };
    Some(value)
}

/// Expand known placeholders in `text`. Unknown keys are left as written.
pub fn render_placeholders(ctx: &TransformContext, text: &str) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            let key = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            value_for(ctx, key).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[async_trait]
impl InputTransformer for Placeholder {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    async fn transform(
        &self,
        ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, TransformError> {
        Ok(map_text_parts(messages, Role::User, |_, text| {
            render_placeholders(ctx, text)
        }))
    }
}
