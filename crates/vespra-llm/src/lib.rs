pub mod gateway;
pub mod openai_compat;
pub mod provider;

pub use gateway::LlmGateway;
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{
    ChatOptions, ChatRequest, ChatResponse, ContentPart, LlmProvider, Message, ProviderError,
    Role, ToolCall, ToolDefinition,
};
