//! Web search tool
//!
//! Wraps a `SearchService` and numbers the results so the model can cite
//! them by id.

use super::{Tool, ToolContext, ToolError};
use crate::llm::ModelInfo;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const SEARCH_TOOL_NAME: &str = "search_web";

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub title: String,
    pub url: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub items: Vec<SearchItem>,
}

/// A web search provider
#[async_trait]
pub trait SearchService: Send + Sync {
    /// JSON schema of the provider's query parameters
    fn parameters(&self) -> Value;

    async fn search(&self, params: Value) -> Result<SearchResult, ToolError>;
}

pub struct SearchTool {
    service: Arc<dyn SearchService>,
}

impl SearchTool {
    pub fn new(service: Arc<dyn SearchService>) -> Self {
        Self { service }
    }
}

fn short_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> String {
        "search web for latest information".to_string()
    }

    fn input_schema(&self) -> Value {
        self.service.parameters()
    }

    async fn execute(&self, arguments: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let result = self.service.search(arguments).await?;
        let items: Vec<Value> = result
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::json!({
                    "id": short_id(),
                    "index": index + 1,
                    "title": item.title,
                    "url": item.url,
                    "text": item.text,
                })
            })
            .collect();
        let mut output = serde_json::json!({ "items": items });
        if let Some(answer) = result.answer {
            output["answer"] = Value::String(answer);
        }
        Ok(output)
    }

    fn system_prompt_hint(&self, model: &ModelInfo) -> Option<String> {
        // Models with provider-side tools have their own citation conventions
        if model.has_built_in_tools() {
            return None;
        }
        let today = chrono::Local::now().format("%Y-%m-%d");
        Some(format!(
            r#"## tool: search_web

### when
- You can use the search_web tool to search the internet for the latest news or to confirm some facts.
- You can perform multiple search if needed
- Generate keywords based on the user's question
- Today is {today}

### result example
```json
{{
    "items": [
        {{
            "id": "random id in 6 characters",
            "title": "Title",
            "url": "https://example.com",
            "text": "Some relevant snippets"
        }}
    ]
}}
```

### citation
When citing facts or data from search results, add a citation marker after the sentence: `[citation,domain](id of the search result)`.
If no search results are cited, you do not need to add a citation marker."#
        ))
    }
}
