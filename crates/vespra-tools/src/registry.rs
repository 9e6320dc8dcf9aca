use std::sync::Arc;

use tracing::debug;
use vespra_llm::ToolDefinition;

use crate::builtin::{MemoryForgetTool, MemoryRecallTool, MemorySaveTool, ReactTool, ReplyTool, WebSearchTool};
use crate::context::ToolContext;
use crate::tool::{Tool, ToolResult};

/// Named capability catalog exposed to the LLM for one turn (§4.3).
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.push(tool);
        self
    }

    /// The standard tool set for a user-originated turn.
    pub fn default_tools(search_api_key: Option<String>, user_agent: String) -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(ReplyTool))
            .register(Arc::new(ReactTool))
            .register(Arc::new(MemorySaveTool))
            .register(Arc::new(MemoryRecallTool))
            .register(Arc::new(MemoryForgetTool))
            .register(Arc::new(WebSearchTool::new(search_api_key, user_agent)));
        registry
    }

    /// Every tool except `web_search` — used for internal-message turns so
    /// they can never recurse into another background search (§4.2).
    pub fn without_search(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.iter().filter(|t| t.name() != "web_search").cloned().collect()
    }

    pub fn all(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn to_definitions(tools: &[Arc<dyn Tool>]) -> Vec<ToolDefinition> {
        tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub async fn execute(tools: &[Arc<dyn Tool>], ctx: &ToolContext, name: &str, input: serde_json::Value) -> ToolResult {
        match tools.iter().find(|t| t.name() == name) {
            Some(tool) => {
                debug!(tool = name, "executing tool");
                tool.execute(ctx, input).await
            }
            None => ToolResult::error(format!("unknown tool: {name}")),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
