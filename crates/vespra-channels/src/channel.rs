use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::{error::ChannelError, types::ChannelStatus, types::OutboundMessage};

/// A typing indicator started via [`Channel::start_typing`]. Dropping it (or
/// calling [`TypingHandle::stop`] explicitly) tells the adapter to stop
/// showing the indicator; every turn-execution exit path must drop it.
pub struct TypingHandle {
    stop: Option<oneshot::Sender<()>>,
}

impl TypingHandle {
    pub fn new(stop: oneshot::Sender<()>) -> Self {
        Self { stop: Some(stop) }
    }

    /// A handle for adapters that have nothing to stop.
    pub fn noop() -> Self {
        Self { stop: None }
    }

    pub fn stop(mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TypingHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

/// The platform adapter interface the core consumes (§6): gateway connection
/// management plus outbound send/typing/react. Inbound events are delivered
/// out-of-band onto the mpsc sender an adapter is constructed with — this
/// trait only covers outbound actions and lifecycle, since inbound delivery
/// is push-based from the adapter into the Supervisor's admission path.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this adapter (e.g. `"discord"`).
    fn name(&self) -> &str;

    async fn connect(&mut self) -> Result<(), ChannelError>;

    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    /// Deliver a single outbound message. `&self` so a connected adapter can
    /// send concurrently from multiple worker tasks without a mutable borrow.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// React to a triggering message with an emoji, where the platform
    /// supports it (a no-op `Ok(())` otherwise).
    async fn react(&self, channel_id: &str, message_id: &str, emoji: &str)
        -> Result<(), ChannelError>;

    /// Start a typing indicator on a channel; the returned handle stops it
    /// on drop.
    async fn start_typing(&self, channel_id: &str) -> Result<TypingHandle, ChannelError>;

    fn status(&self) -> ChannelStatus;
}
