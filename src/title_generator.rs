//! Title and suggestion generation
//!
//! Both run as one-shot requests against their own (possibly cheaper) model.
//! Failures are logged and reported as `None`; they never reach the
//! conversation's error channel.

use crate::config::{apply_placeholders, Settings};
use crate::llm::{GenerationParams, GenerationRequest, ModelBackend, ModelInfo};
use crate::message::Message;
use std::time::Duration;
use tokio::time::timeout;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TITLE_CHARS: usize = 50;
const MAX_SUGGESTIONS: usize = 10;
/// Suggestions only look at the tail of the conversation
const SUGGESTION_CONTEXT_MESSAGES: usize = 8;

fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(Message::summary_as_text)
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn complete(
    backend: &dyn ModelBackend,
    model: &ModelInfo,
    prompt: String,
    what: &str,
) -> Option<String> {
    let request = GenerationRequest::prompt(prompt, GenerationParams::new(model.clone()));
    match timeout(REQUEST_TIMEOUT, backend.generate_once(&request)).await {
        Ok(Ok(reply)) => Some(reply.to_text()),
        Ok(Err(e)) => {
            tracing::warn!(model = %model.model_id, error = %e, "{what} generation failed");
            None
        }
        Err(_) => {
            tracing::warn!(model = %model.model_id, "{what} generation timed out");
            None
        }
    }
}

/// Generate a title for the given (model-visible) messages.
///
/// Returns None on failure or when the model replies with nothing usable.
pub async fn generate_title(
    backend: &dyn ModelBackend,
    model: &ModelInfo,
    settings: &Settings,
    messages: &[Message],
) -> Option<String> {
    let prompt = apply_placeholders(
        &settings.title_prompt,
        &[("locale", settings.locale.as_str()), ("content", transcript(messages).as_str())],
    );
    let reply = complete(backend, model, prompt, "Title").await?;
    let title = sanitize_title(&reply);
    (!title.is_empty()).then_some(title)
}

/// Generate reply suggestions from the tail of the conversation
pub async fn generate_suggestions(
    backend: &dyn ModelBackend,
    model: &ModelInfo,
    settings: &Settings,
    messages: &[Message],
) -> Option<Vec<String>> {
    let tail = &messages[messages.len().saturating_sub(SUGGESTION_CONTEXT_MESSAGES)..];
    let prompt = apply_placeholders(
        &settings.suggestion_prompt,
        &[("locale", settings.locale.as_str()), ("content", transcript(tail).as_str())],
    );
    let reply = complete(backend, model, prompt, "Suggestion").await?;
    Some(parse_suggestions(&reply))
}

/// First non-blank line, unquoted and capped in length
fn sanitize_title(raw: &str) -> String {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let unquoted = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '#'))
        .trim();
    unquoted.chars().take(MAX_TITLE_CHARS).collect::<String>().trim_end().to_string()
}

/// One suggestion per non-blank line, at most ten
fn parse_suggestions(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(MAX_SUGGESTIONS)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::ScriptedBackend;
    use crate::llm::LlmError;

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("  \"Rust Lifetimes\"  "), "Rust Lifetimes");
        assert_eq!(sanitize_title("\n\n## Trip Planning\nextra"), "Trip Planning");
        assert_eq!(sanitize_title("   "), "");
        let long = "word ".repeat(40);
        assert!(sanitize_title(&long).chars().count() <= MAX_TITLE_CHARS);
    }

    #[test]
    fn test_parse_suggestions_caps_at_ten() {
        let raw = (0..15).map(|i| format!(" idea {i} ")).collect::<Vec<_>>().join("\n\n");
        let parsed = parse_suggestions(&raw);
        assert_eq!(parsed.len(), 10);
        assert_eq!(parsed[0], "idea 0");
        assert!(parse_suggestions("\n  \n").is_empty());
    }

    #[tokio::test]
    async fn test_title_prompt_includes_transcript() {
        let backend = ScriptedBackend::new();
        backend.queue_reply(Ok(Message::assistant("Greetings")));
        let model = ModelInfo::new("title-model");
        let messages = vec![Message::user("hello"), Message::assistant("hi")];

        let title = generate_title(&backend, &model, &Settings::default(), &messages).await;
        assert_eq!(title.as_deref(), Some("Greetings"));

        let prompt = backend.recorded_requests()[0].messages[0].to_text();
        assert!(prompt.contains("[user]: hello\n\n[assistant]: hi"));
        assert!(prompt.contains("English"));
    }

    #[tokio::test]
    async fn test_failures_are_none() {
        let backend = ScriptedBackend::new();
        backend.queue_reply(Err(LlmError::network("down")));
        backend.queue_reply(Ok(Message::assistant("   ")));
        let model = ModelInfo::new("m");
        let settings = Settings::default();

        assert!(generate_suggestions(&backend, &model, &settings, &[]).await.is_none());
        assert!(generate_title(&backend, &model, &settings, &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_suggestions_use_tail_only() {
        let backend = ScriptedBackend::new();
        backend.queue_reply(Ok(Message::assistant("Tell me more\nWhy?")));
        let messages: Vec<Message> = (0..12).map(|i| Message::user(format!("msg-{i}"))).collect();

        let suggestions =
            generate_suggestions(&backend, &ModelInfo::new("m"), &Settings::default(), &messages)
                .await
                .unwrap();
        assert_eq!(suggestions, vec!["Tell me more", "Why?"]);

        let prompt = backend.recorded_requests()[0].messages[0].to_text();
        assert!(!prompt.contains("msg-3\n"));
        assert!(prompt.contains("msg-4"));
        assert!(prompt.contains("msg-11"));
    }
}
