use thiserror::Error;

/// Errors from a tool's own network/IO path, distinct from [`crate::tool::ToolResult`]
/// (which is how a tool reports failure back to the LLM — §7's `tool_invocation`
/// is never fatal to the turn). This enum is for the narrower internal surface,
/// e.g. `web_search`'s HTTP client, where a typed error is worth distinguishing
/// from a plain message.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),

    #[error("response parse failed: {0}")]
    Parse(String),
}
