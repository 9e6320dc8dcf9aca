use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::tool::{Tool, ToolResult};

const DEFAULT_RECALL_LIMIT: usize = 5;

/// Ranked semantic search scoped to this server (§4.3, §4.4).
#[derive(Default)]
pub struct MemoryRecallTool;

#[async_trait]
impl Tool for MemoryRecallTool {
    fn name(&self) -> &str {
        "memory_recall"
    }

    fn description(&self) -> &str {
        "Recall previously saved facts relevant to a query, ranked by similarity."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to recall" },
                "k": { "type": "integer", "description": "Max results, defaults to 5" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult {
        let query = match input.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q,
            _ => return ToolResult::error("missing or empty 'query' parameter"),
        };
        let limit = input
            .get("k")
            .and_then(|v| v.as_u64())
            .map(|k| k as usize)
            .unwrap_or(DEFAULT_RECALL_LIMIT);

        match ctx.memory.recall(&ctx.config, query, &ctx.server_id, limit).await {
            Ok(hits) if hits.is_empty() => ToolResult::success("(no matching memories)"),
            Ok(hits) => {
                let rendered = hits
                    .iter()
                    .map(|h| format!("- [{}] {} (similarity {:.2})", h.record.id, h.record.content, h.similarity))
                    .collect::<Vec<_>>()
                    .join("\n");
                ToolResult::success(rendered)
            }
            Err(e) => ToolResult::error(format!("memory_recall failed: {e}")),
        }
    }
}
