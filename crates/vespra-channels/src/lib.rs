pub mod channel;
pub mod error;
pub mod manager;
pub mod types;

pub use channel::{Channel, TypingHandle};
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use types::{Attachment, ChannelStatus, InboundMessage, MessageFormat, OutboundMessage};
