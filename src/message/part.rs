//! Message part types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One piece of a message's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        content: String,
    },
    Image {
        /// Reference to the image resource (local file path or data URL)
        url: String,
    },
    Document {
        url: String,
        name: String,
        mime: String,
    },
    Reasoning {
        content: String,
        created_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finished_at: Option<DateTime<Utc>>,
    },
    ToolCall {
        id: String,
        name: String,
        /// Raw JSON arguments as produced by the model (may be partial while streaming)
        arguments: String,
    },
    ToolResult {
        tool_call_id: String,
        name: String,
        content: Value,
    },
}

impl Part {
    pub fn text(content: impl Into<String>) -> Self {
        Part::Text {
            content: content.into(),
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Part::Image { url: url.into() }
    }

    pub fn document(
        url: impl Into<String>,
        name: impl Into<String>,
        mime: impl Into<String>,
    ) -> Self {
        Part::Document {
            url: url.into(),
            name: name.into(),
            mime: mime.into(),
        }
    }

    pub fn reasoning(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Part::Reasoning {
            content: content.into(),
            created_at,
            finished_at: None,
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Part::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: Value,
    ) -> Self {
        Part::ToolResult {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content,
        }
    }

    /// Whether this part renders to something visible.
    ///
    /// Tool calls and results always count as content.
    pub fn has_content(&self) -> bool {
        match self {
            Part::Text { content } | Part::Reasoning { content, .. } => !content.trim().is_empty(),
            Part::Image { url } | Part::Document { url, .. } => !url.trim().is_empty(),
            Part::ToolCall { .. } | Part::ToolResult { .. } => true,
        }
    }

    /// External resource referenced by this part, if any
    pub fn file(&self) -> Option<&str> {
        match self {
            Part::Image { url } | Part::Document { url, .. } => Some(url.as_str()),
            _ => None,
        }
    }

    /// Stamp an open reasoning part as finished
    #[must_use]
    pub fn finish_reasoning(self, now: DateTime<Utc>) -> Self {
        match self {
            Part::Reasoning {
                content,
                created_at,
                finished_at: None,
            } => Part::Reasoning {
                content,
                created_at,
                finished_at: Some(now),
            },
            other => other,
        }
    }

    /// Point a file reference at a new location when it appears in `moves`
    #[must_use]
    pub fn relocated(self, moves: &HashMap<String, String>) -> Self {
        match self {
            Part::Image { url } => Part::Image {
                url: moves.get(&url).cloned().unwrap_or(url),
            },
            Part::Document { url, name, mime } => Part::Document {
                url: moves.get(&url).cloned().unwrap_or(url),
                name,
                mime,
            },
            other => other,
        }
    }

    pub fn is_open_reasoning(&self) -> bool {
        matches!(
            self,
            Part::Reasoning {
                finished_at: None,
                ..
            }
        )
    }
}

/// Whether a list of user-supplied parts carries nothing worth sending
pub fn is_empty_input(parts: &[Part]) -> bool {
    parts.iter().all(|p| match p {
        Part::Text { content } => content.trim().is_empty(),
        Part::Image { url } | Part::Document { url, .. } => url.trim().is_empty(),
        _ => true,
    })
}
