use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde_json::{json, Value};
use vespra_channels::{MessageFormat, OutboundMessage};

use crate::context::ToolContext;
use crate::tool::{Tool, ToolResult};

/// Terminator: sends `text` on the current channel (§4.3).
#[derive(Default)]
pub struct ReplyTool;

#[async_trait]
impl Tool for ReplyTool {
    fn name(&self) -> &str {
        "reply"
    }

    fn description(&self) -> &str {
        "Send a text reply on the current channel. In smart mode, this is the \
         only way to produce a visible response."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "The message to send" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult {
        let text = match input.get("text").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t,
            _ => return ToolResult::error("missing or empty 'text' parameter"),
        };

        let msg = OutboundMessage {
            channel_id: ctx.channel_id.clone(),
            content: text.to_string(),
            format: MessageFormat::PlainText,
            in_reply_to: ctx.triggering_message_id.clone(),
        };

        match ctx.channel.send(&msg).await {
            Ok(()) => {
                ctx.replied.store(true, Ordering::SeqCst);
                ToolResult::success("sent")
            }
            Err(e) => ToolResult::error(format!("send failed: {e}")),
        }
    }
}
