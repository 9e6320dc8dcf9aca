use serde::{Deserialize, Serialize};

/// An attachment carried by an inbound message (image, file, voice clip).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub url: String,
}

/// An event delivered by a platform adapter's event callback (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub author_id: String,
    pub author_display_name: Option<String>,
    pub author_is_self: bool,
    pub server_id: String,
    pub channel_id: String,
    pub is_dm: bool,
    pub text: String,
    #[serde(default)]
    pub mentions: Vec<String>,
    pub reply_to: Option<String>,
    /// True if `reply_to` names a message the bot itself sent. The adapter
    /// fills this in (it already tracks its own sent message ids for
    /// threading); admission uses it directly for `reply_to_self`.
    #[serde(default)]
    pub reply_to_is_self: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub message_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A reply produced for delivery back onto the originating channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub content: String,
    #[serde(default)]
    pub format: MessageFormat,
    /// Message to react to or reply in-thread to, if the platform supports it.
    pub in_reply_to: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    PlainText,
    Markdown,
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}
