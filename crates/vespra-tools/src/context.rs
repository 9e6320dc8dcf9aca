use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::mpsc;
use vespra_channels::Channel;
use vespra_core::Config;
use vespra_memory::MemoryStore;

/// Everything a tool needs to act on behalf of one turn. Built fresh per
/// turn by the Channel Agent worker (§4.2) and handed to every tool call in
/// that turn; tools never reach back into the worker's own types (§9) — they
/// only see this plain struct.
pub struct ToolContext {
    pub channel: Arc<dyn Channel + Send + Sync>,
    pub channel_id: String,
    pub triggering_message_id: Option<String>,
    pub memory: Arc<MemoryStore>,
    pub config: Arc<Config>,
    pub server_id: String,
    pub user_id: Option<String>,
    /// Strings delivered here are force-flushed as the next turn (§4.2).
    pub internal_inbox: mpsc::Sender<String>,
    /// CAS guard: at most one `web_search` in flight per worker (§4.3, §5).
    pub search_in_progress: Arc<AtomicBool>,
    /// Set by `reply`/`react` so the turn loop knows a terminator ran.
    pub replied: Arc<AtomicBool>,
}
