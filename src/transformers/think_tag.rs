use super::{OutputTransformer, TransformContext, TransformError};
use crate::message::{Message, Part, Role};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;

static THINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)(</think>|$)").expect("think pattern"));

/// Splits `<think>` blocks out of assistant text into reasoning parts.
///
/// A block without a closing tag is still streaming and stays open.
pub struct ThinkTag;

fn split(message: &Message) -> Message {
    let mut reasoning: Vec<Part> = Vec::new();
    let mut parts: Vec<Part> = Vec::new();
    for part in &message.parts {
        let Part::Text { content } = part else {
            parts.push(part.clone());
            continue;
        };
        if !content.contains("<think>") {
            parts.push(part.clone());
            continue;
        }
        for caps in THINK.captures_iter(content) {
            let closed = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
            reasoning.push(Part::Reasoning {
                content: caps[1].trim().to_string(),
                created_at: message.created_at,
                finished_at: closed.then(Utc::now),
            });
        }
        let remainder = THINK.replace_all(content, "");
        let remainder = remainder.trim_start();
        if !remainder.is_empty() {
            parts.push(Part::text(remainder));
        }
    }
    reasoning.extend(parts);
    message.with_parts(reasoning)
}

#[async_trait]
impl OutputTransformer for ThinkTag {
    fn name(&self) -> &'static str {
        "think_tag"
    }

    async fn transform(
        &self,
        _ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, TransformError> {
        Ok(messages
            .into_iter()
            .map(|m| if m.role == Role::Assistant { split(&m) } else { m })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_block() {
        let out = split(&Message::assistant("<think>plan it</think>\n\nThe answer"));
        assert_eq!(out.parts.len(), 2);
        assert!(matches!(
            &out.parts[0],
            Part::Reasoning { content, finished_at: Some(_), .. } if content == "plan it"
        ));
        assert_eq!(out.to_text(), "The answer");
    }

    #[test]
    fn test_open_block_while_streaming() {
        let out = split(&Message::assistant("<think>still going"));
        assert_eq!(out.parts.len(), 1);
        assert!(out.parts[0].is_open_reasoning());
        assert!(out.has_open_reasoning());
    }

    #[test]
    fn test_plain_text_untouched() {
        let msg = Message::assistant("no tags here");
        assert_eq!(split(&msg), msg);
    }

    #[test]
    fn test_reasoning_uses_message_time() {
        let msg = Message::assistant("<think>x");
        let out = split(&msg);
        assert!(matches!(
            out.parts[0],
            Part::Reasoning { created_at, .. } if created_at == msg.created_at
        ));
    }
}
