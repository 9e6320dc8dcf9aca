use thiserror::Error;

#[derive(Debug, Error)]
pub enum VespraError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("memory I/O error: {0}")]
    MemoryIo(String),

    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    #[error("permanent upstream error ({status}): {message}")]
    PermanentUpstream { status: u16, message: String },

    #[error("tool invocation error: {0}")]
    ToolInvocation(String),

    #[error("platform send failed: {0}")]
    PlatformSend(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VespraError {
    /// Short error code, e.g. for log correlation or the management API.
    pub fn code(&self) -> &'static str {
        match self {
            VespraError::ConfigInvalid(_) => "config_invalid",
            VespraError::AgentNotFound(_) => "agent_not_found",
            VespraError::MemoryIo(_) => "memory_io",
            VespraError::TransientUpstream(_) => "transient_upstream",
            VespraError::PermanentUpstream { .. } => "permanent_upstream",
            VespraError::ToolInvocation(_) => "tool_invocation",
            VespraError::PlatformSend(_) => "platform_send",
            VespraError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, VespraError>;
