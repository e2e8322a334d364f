//! Message and part model
//!
//! Messages are immutable values: every edit produces a new `Message`.

mod part;
mod usage;

pub use part::{is_empty_input, Part};
pub use usage::Usage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single message (one variant of a node)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            parts,
            created_at: Utc::now(),
            usage: None,
            translation: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(text)])
    }

    /// Same message identity with different content
    #[must_use]
    pub fn with_parts(&self, parts: Vec<Part>) -> Self {
        Self {
            parts,
            ..self.clone()
        }
    }

    /// A message is empty when nothing in it renders and it carries no tool traffic
    pub fn is_empty(&self) -> bool {
        !self.parts.iter().any(Part::has_content)
    }

    pub fn has_tool_call(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::ToolCall { .. }))
    }

    pub fn has_tool_result(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::ToolResult { .. }))
    }

    /// Tool calls in this message as `(id, name, arguments)`
    pub fn tool_calls(&self) -> Vec<(&str, &str, &str)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some((id.as_str(), name.as_str(), arguments.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Whether this message answers the given tool call id
    pub fn has_result_for(&self, tool_call_id: &str) -> bool {
        self.parts.iter().any(|p| {
            matches!(p, Part::ToolResult { tool_call_id: id, .. } if id == tool_call_id)
        })
    }

    /// Concatenated text parts
    pub fn to_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One-line summary used for title and suggestion prompts
    pub fn summary_as_text(&self) -> String {
        format!("[{}]: {}", self.role.as_str(), self.to_text())
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(Part::file)
    }

    pub fn has_open_reasoning(&self) -> bool {
        self.parts.iter().any(Part::is_open_reasoning)
    }

    /// Stamp every open reasoning part with `now`
    #[must_use]
    pub fn finish_reasoning(self, now: DateTime<Utc>) -> Self {
        if !self.has_open_reasoning() {
            return self;
        }
        Self {
            parts: self
                .parts
                .into_iter()
                .map(|p| p.finish_reasoning(now))
                .collect(),
            ..self
        }
    }

    /// Carry reasoning timestamps over from an earlier snapshot of this
    /// message, pairing reasoning parts by position.
    #[must_use]
    pub fn with_reasoning_times_from(self, previous: &Message) -> Self {
        let mut earlier = previous.parts.iter().filter_map(|p| match p {
            Part::Reasoning {
                created_at,
                finished_at,
                ..
            } => Some((*created_at, *finished_at)),
            _ => None,
        });
        let parts = self
            .parts
            .into_iter()
            .map(|part| match part {
                Part::Reasoning {
                    content,
                    created_at,
                    finished_at,
                } => {
                    let (created_at, finished_at) = match earlier.next() {
                        Some((then, Some(done))) => (then, finished_at.map(|_| done)),
                        Some((then, None)) => (then, finished_at),
                        None => (created_at, finished_at),
                    };
                    Part::Reasoning {
                        content,
                        created_at,
                        finished_at,
                    }
                }
                other => other,
            })
            .collect();
        Self { parts, ..self }
    }
}

/// Model-visible slice of a history given a truncation index.
///
/// `-1` (or any negative index) hides nothing; an index at or past the end
/// hides everything.
pub fn truncate(messages: &[Message], truncate_index: i64) -> &[Message] {
    match usize::try_from(truncate_index) {
        Ok(index) => &messages[index.min(messages.len())..],
        Err(_) => messages,
    }
}

/// Keep only the last `size` messages.
///
/// The window grows backwards while its first message holds tool results, so
/// a result is never sent without the call that produced it. A size of zero
/// or less keeps everything.
pub fn limit_context(messages: &[Message], size: i64) -> &[Message] {
    let Ok(size) = usize::try_from(size) else {
        return messages;
    };
    if size == 0 || size >= messages.len() {
        return messages;
    }
    let mut start = messages.len() - size;
    while start > 0 && messages[start].has_tool_result() {
        start -= 1;
    }
    &messages[start..]
}
