use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::tool::{Tool, ToolResult};

/// Deletes a memory record, server-scoped (§4.3, §4.4).
#[derive(Default)]
pub struct MemoryForgetTool;

#[async_trait]
impl Tool for MemoryForgetTool {
    fn name(&self) -> &str {
        "memory_forget"
    }

    fn description(&self) -> &str {
        "Delete a previously saved memory by id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "The memory id to delete" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult {
        let id = match input.get("id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => id,
            _ => return ToolResult::error("missing or empty 'id' parameter"),
        };

        match ctx.memory.forget(id, &ctx.server_id) {
            Ok(()) => ToolResult::success("forgotten"),
            Err(e) => ToolResult::error(format!("memory_forget failed: {e}")),
        }
    }
}
