//! External tool servers
//!
//! A connected server exposes a dynamic tool list; each listed tool is
//! adapted into a registry `Tool` that forwards calls to the server.

use super::{Tool, ToolContext, ToolError};
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A connected external tool server
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Server name, for logging
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError>;
}

/// Registry adapter for one tool exposed by a server
pub struct ServerTool {
    server: Arc<dyn ToolServer>,
    definition: ToolDefinition,
}

impl ServerTool {
    pub fn new(server: Arc<dyn ToolServer>, definition: ToolDefinition) -> Self {
        Self { server, definition }
    }
}

#[async_trait]
impl Tool for ServerTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> String {
        self.definition.description.clone()
    }

    fn input_schema(&self) -> Value {
        self.definition.input_schema.clone()
    }

    async fn execute(&self, arguments: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        self.server.call_tool(&self.definition.name, arguments).await
    }
}

/// Adapt every tool of every reachable server.
///
/// A server that fails to list its tools is skipped with a warning.
pub async fn server_tools(servers: &[Arc<dyn ToolServer>]) -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for server in servers {
        match server.list_tools().await {
            Ok(definitions) => {
                tools.extend(definitions.into_iter().map(|definition| {
                    Arc::new(ServerTool::new(server.clone(), definition)) as Arc<dyn Tool>
                }));
            }
            Err(e) => {
                tracing::warn!(server = %server.name(), error = %e, "Failed to list server tools");
            }
        }
    }
    tools
}
