use super::{map_text_parts, OutputTransformer, TransformContext, TransformError};
use crate::message::{Message, Role};
use async_trait::async_trait;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::LazyLock;

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,6});").expect("entity pattern")
});

/// Unescapes HTML entities some providers leave in assistant text
pub struct HtmlEscape;

fn decode(entity: &str) -> Option<char> {
    if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = entity.strip_prefix('#') {
        return dec.parse::<u32>().ok().and_then(char::from_u32);
    }
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => None,
    }
}

/// Replace named and numeric entities; unknown entities are kept verbatim
pub fn unescape_html(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    ENTITY.replace_all(text, |caps: &Captures<'_>| {
        decode(&caps[1]).map_or_else(|| caps[0].to_string(), String::from)
    })
}

#[async_trait]
impl OutputTransformer for HtmlEscape {
    fn name(&self) -> &'static str {
        "html_escape"
    }

    async fn transform(
        &self,
        _ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, TransformError> {
        Ok(map_text_parts(messages, Role::Assistant, |_, text| {
            unescape_html(text).into_owned()
        }))
    }
}
