use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::tool::{Tool, ToolResult};

/// Terminator-ish: reacts to the triggering message with an emoji (§4.3).
#[derive(Default)]
pub struct ReactTool;

#[async_trait]
impl Tool for ReactTool {
    fn name(&self) -> &str {
        "react"
    }

    fn description(&self) -> &str {
        "React to the message that triggered this turn with an emoji."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "emoji": { "type": "string", "description": "The emoji to react with" }
            },
            "required": ["emoji"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult {
        let emoji = match input.get("emoji").and_then(|v| v.as_str()) {
            Some(e) if !e.is_empty() => e,
            _ => return ToolResult::error("missing or empty 'emoji' parameter"),
        };

        let Some(message_id) = ctx.triggering_message_id.as_deref() else {
            return ToolResult::error("no triggering message to react to");
        };

        match ctx.channel.react(&ctx.channel_id, message_id, emoji).await {
            Ok(()) => {
                ctx.replied.store(true, Ordering::SeqCst);
                ToolResult::success("reacted")
            }
            Err(e) => ToolResult::error(format!("react failed: {e}")),
        }
    }
}
