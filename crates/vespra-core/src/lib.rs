pub mod config;
pub mod error;
pub mod types;

pub use config::{AgentBinding, ChannelOverride, Config, ConfigStore, ResponseMode};
pub use error::{Result, VespraError};
pub use types::{AgentId, AgentStatus, ChannelId, MemoryId, ServerId, StatusSnapshot, WorkerKey};
