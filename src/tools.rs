//! Tool invocation contract and registry
//!
//! The registry for a session is assembled from the assistant's local tools,
//! the web search tool (when enabled) and every tool exposed by connected
//! external tool servers.

mod search;
mod server;

pub use search::{SearchItem, SearchResult, SearchService, SearchTool, SEARCH_TOOL_NAME};
pub use server::{server_tools, ServerTool, ToolServer};

use crate::llm::{ModelInfo, ToolDefinition};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Errors raised while executing a tool call.
///
/// These never abort a session: the orchestrator encodes them into the
/// tool result so the model sees the failure.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Tool execution failed: {0}")]
    Execution(String),
    #[error("Tool call cancelled")]
    Cancelled,
}

impl ToolError {
    /// JSON payload stored in a tool result for this error
    pub fn to_result_content(&self) -> Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

/// Per-call context handed to a tool
#[derive(Clone)]
pub struct ToolContext {
    /// Cancellation signal for long-running operations
    pub cancel: CancellationToken,
    pub conversation_id: Uuid,
    /// Model that requested the call
    pub model: ModelInfo,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, conversation_id: Uuid, model: ModelInfo) -> Self {
        Self {
            cancel,
            conversation_id,
            model,
        }
    }
}

/// Trait for tools the model can call
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    async fn execute(&self, arguments: Value, ctx: ToolContext) -> Result<Value, ToolError>;

    /// Extra system prompt text for models without native conventions for
    /// this tool's results
    fn system_prompt_hint(&self, _model: &ModelInfo) -> Option<String> {
        None
    }
}

/// Tools available to one generation session
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Assemble the registry for a session
    pub async fn assemble(
        local: Vec<Arc<dyn Tool>>,
        search: Option<Arc<dyn Tool>>,
        servers: &[Arc<dyn ToolServer>],
    ) -> Self {
        let mut tools = local;
        tools.extend(search);
        tools.extend(server_tools(servers).await);
        Self { tools }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Get all tool definitions for the model
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// System prompt additions from every tool, in registry order
    pub fn system_prompt_hints(&self, model: &ModelInfo) -> Vec<String> {
        self.tools
            .iter()
            .filter_map(|t| t.system_prompt_hint(model))
            .filter(|hint| !hint.trim().is_empty())
            .collect()
    }

    /// Execute a tool call by name.
    ///
    /// `arguments` is the raw JSON the model produced. Execution races the
    /// context's cancellation token.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &str,
        ctx: ToolContext,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let arguments: Value = if arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(arguments)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?
        };

        let cancel = ctx.cancel.clone();
        tokio::select! {
            result = tool.execute(arguments, ctx) => result,
            () = cancel.cancelled() => Err(ToolError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::{FailingTool, MockTool};
    use serde_json::json;

    fn context() -> ToolContext {
        ToolContext::new(
            CancellationToken::new(),
            Uuid::new_v4(),
            ModelInfo::new("test-model"),
        )
    }

    struct StaticServer;

    #[async_trait]
    impl ToolServer for StaticServer {
        fn name(&self) -> &str {
            "static"
        }

        async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
            Ok(vec![ToolDefinition {
                name: "remote_echo".to_string(),
                description: "Echo on the server".to_string(),
                input_schema: json!({"type": "object"}),
            }])
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
            Ok(json!({ "tool": name, "echo": arguments }))
        }
    }

    struct BrokenServer;

    #[async_trait]
    impl ToolServer for BrokenServer {
        fn name(&self) -> &str {
            "broken"
        }

        async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
            Err(ToolError::Execution("connection refused".to_string()))
        }

        async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<Value, ToolError> {
            unreachable!("no tools listed")
        }
    }

    #[tokio::test]
    async fn test_assemble_orders_local_search_servers() {
        let servers: Vec<Arc<dyn ToolServer>> =
            vec![Arc::new(BrokenServer), Arc::new(StaticServer)];
        let registry = ToolRegistry::assemble(
            vec![Arc::new(MockTool::new("clock", json!("12:00")))],
            Some(Arc::new(MockTool::new(SEARCH_TOOL_NAME, json!({"items": []})))),
            &servers,
        )
        .await;
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["clock", SEARCH_TOOL_NAME, "remote_echo"]);
    }

    #[tokio::test]
    async fn test_execute_forwards_to_server() {
        let servers: Vec<Arc<dyn ToolServer>> = vec![Arc::new(StaticServer)];
        let registry = ToolRegistry::assemble(vec![], None, &servers).await;
        let output = registry
            .execute("remote_echo", r#"{"x": 1}"#, context())
            .await
            .unwrap();
        assert_eq!(output["echo"]["x"], 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::empty();
        let err = registry.execute("nope", "{}", context()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_execute_bad_arguments() {
        let registry = ToolRegistry::new(vec![Arc::new(MockTool::new("clock", json!(1)))]);
        let err = registry.execute("clock", "{not json", context()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        // Empty argument strings are treated as an empty object
        assert!(registry.execute("clock", "", context()).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_reports_tool_failure() {
        let registry = ToolRegistry::new(vec![Arc::new(FailingTool::new("flaky"))]);
        let err = registry.execute("flaky", "{}", context()).await.unwrap_err();
        assert_eq!(err.to_result_content()["error"], err.to_string());
    }

    #[tokio::test]
    async fn test_execute_observes_cancellation() {
        let tool = MockTool::new("slow", json!("done"))
            .with_delay(std::time::Duration::from_secs(30));
        let registry = ToolRegistry::new(vec![Arc::new(tool)]);
        let ctx = context();
        ctx.cancel.cancel();
        let err = registry.execute("slow", "{}", ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
