use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::tool::{Tool, ToolResult};

/// Writes a memory record after a dedup check (§4.3, §4.4).
#[derive(Default)]
pub struct MemorySaveTool;

#[async_trait]
impl Tool for MemorySaveTool {
    fn name(&self) -> &str {
        "memory_save"
    }

    fn description(&self) -> &str {
        "Save a fact worth remembering about this server or user. Deduplicated \
         against existing memories by semantic similarity."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The fact to remember" },
                "importance": { "type": "number", "description": "0.0-1.0, defaults to 0.5" }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult {
        let content = match input.get("content").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c,
            _ => return ToolResult::error("missing or empty 'content' parameter"),
        };
        let importance = input.get("importance").and_then(|v| v.as_f64()).map(|f| f as f32);

        match ctx
            .memory
            .save(&ctx.config, &ctx.server_id, ctx.user_id.as_deref(), content, importance)
            .await
        {
            Ok(id) => ToolResult::success(format!("saved (id: {id})")),
            Err(e) => ToolResult::error(format!("memory_save failed: {e}")),
        }
    }
}
