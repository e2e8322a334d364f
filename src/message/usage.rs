//! Token usage accounting

use serde::{Deserialize, Serialize};

/// Token usage reported by a backend for one assistant message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub cached_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            cached_tokens: 0,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Merge a newer usage report into an older one.
    ///
    /// Streaming backends often report prompt and completion counts in
    /// separate chunks, so zero fields in `newer` keep the previous value.
    #[must_use]
    pub fn merge(previous: Option<Usage>, newer: Usage) -> Usage {
        let previous = previous.unwrap_or_default();
        let pick = |new: u32, old: u32| if new > 0 { new } else { old };
        let prompt_tokens = pick(newer.prompt_tokens, previous.prompt_tokens);
        let completion_tokens = pick(newer.completion_tokens, previous.completion_tokens);
        Usage {
            prompt_tokens,
            completion_tokens,
            cached_tokens: pick(newer.cached_tokens, previous.cached_tokens),
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}
