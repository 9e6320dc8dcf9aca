use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Sleep};
use tracing::{info, instrument, warn};
use vespra_channels::Channel;
use vespra_channels::InboundMessage;
use vespra_core::ConfigStore;
use vespra_llm::LlmGateway;
use vespra_memory::MemoryStore;
use vespra_tools::ToolRegistry;

use crate::event::{InboundEvent, SupervisorSignal};
use crate::inbox::Inbox;
use crate::turn::{self, TurnInput};

/// Everything needed to spawn one Channel Agent worker for one
/// `(agent_id, channel_id)` pair (§4.2).
pub struct SpawnParams {
    pub agent_id: String,
    pub server_id: String,
    pub channel_id: String,
    pub soul: String,
    pub channel: Arc<dyn Channel + Send + Sync>,
    pub config_store: Arc<ConfigStore>,
    pub gateway: Arc<LlmGateway>,
    pub memory: Arc<MemoryStore>,
    pub tools: Arc<ToolRegistry>,
}

/// What the Supervisor keeps after spawning a worker: a handle to push
/// events onto, and a flag the worker sets just before its task exits so
/// the Supervisor can tell a retired worker apart from a live one racing
/// against idle eviction (§4.2, §5).
pub struct WorkerHandle {
    pub inbox: Arc<Inbox>,
    pub retired: Arc<AtomicBool>,
}

pub fn spawn(params: SpawnParams) -> WorkerHandle {
    let inbox_capacity = params.config_store.get().agent.inbox_capacity;
    let inbox = Inbox::new(inbox_capacity);
    let (internal_tx, internal_rx) = mpsc::channel::<String>(32);
    let retired = Arc::new(AtomicBool::new(false));

    let agent = ChannelAgent {
        agent_id: params.agent_id,
        server_id: params.server_id,
        channel_id: params.channel_id,
        soul: params.soul,
        channel: params.channel,
        config_store: params.config_store,
        gateway: params.gateway,
        memory: params.memory,
        tools: params.tools,
        inbox: inbox.clone(),
        internal_tx,
        internal_rx,
        retired: retired.clone(),
        search_in_progress: Arc::new(AtomicBool::new(false)),
        history: Vec::new(),
        turns_since_extraction: 0,
        pending_buffer: Vec::new(),
        pending_must_reply: false,
        debounce_timer: None,
        max_wait_timer: None,
        idle_timer: None,
    };

    tokio::spawn(agent.run());

    WorkerHandle { inbox, retired }
}

/// The per-`(agent, channel)` worker. Owns its own history, coalescing
/// buffer, and timers; talks to the rest of the world only through its
/// `inbox` and its `channel`/`gateway`/`memory` handles (§4.2, §5).
pub struct ChannelAgent {
    pub(crate) agent_id: String,
    pub(crate) server_id: String,
    pub(crate) channel_id: String,
    pub(crate) soul: String,
    pub(crate) channel: Arc<dyn Channel + Send + Sync>,
    pub(crate) config_store: Arc<ConfigStore>,
    pub(crate) gateway: Arc<LlmGateway>,
    pub(crate) memory: Arc<MemoryStore>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) inbox: Arc<Inbox>,
    pub(crate) internal_tx: mpsc::Sender<String>,
    pub(crate) internal_rx: mpsc::Receiver<String>,
    pub(crate) retired: Arc<AtomicBool>,
    pub(crate) search_in_progress: Arc<AtomicBool>,
    pub(crate) history: Vec<vespra_llm::Message>,
    pub(crate) turns_since_extraction: u64,

    /// Messages coalesced since the last flush (§4.2 coalescing protocol).
    pending_buffer: Vec<InboundMessage>,
    pending_must_reply: bool,
    debounce_timer: Option<Pin<Box<Sleep>>>,
    max_wait_timer: Option<Pin<Box<Sleep>>>,
    idle_timer: Option<Pin<Box<Sleep>>>,
}

/// Awaits an optional timer, pending forever if none is armed. Lets a
/// `Option<Pin<Box<Sleep>>>` struct field act as a `tokio::select!` branch
/// that simply never fires when the timer isn't running.
async fn wait_opt(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(t) => t.as_mut().await,
        None => std::future::pending().await,
    }
}

impl ChannelAgent {
    #[instrument(skip(self), fields(agent = %self.agent_id, channel = %self.channel_id))]
    pub async fn run(mut self) {
        info!("worker started");
        self.arm_idle_timer();

        loop {
            tokio::select! {
                signal = self.inbox.recv() => {
                    match signal {
                        SupervisorSignal::Inbound(ev) => self.on_inbound(ev).await,
                        SupervisorSignal::Shutdown => {
                            info!("worker received shutdown");
                            break;
                        }
                    }
                }
                Some(message) = self.internal_rx.recv() => {
                    self.force_flush_internal(message).await;
                }
                _ = wait_opt(&mut self.debounce_timer) => {
                    self.debounce_timer = None;
                    self.flush_user().await;
                }
                _ = wait_opt(&mut self.max_wait_timer) => {
                    self.max_wait_timer = None;
                    self.flush_user().await;
                }
                _ = wait_opt(&mut self.idle_timer), if self.pending_buffer.is_empty() => {
                    info!("worker idle, retiring");
                    break;
                }
            }
        }

        self.retired.store(true, Ordering::SeqCst);
    }

    fn arm_idle_timer(&mut self) {
        let minutes = self.config_store.get().agent.idle_timeout_minutes;
        self.idle_timer = Some(Box::pin(sleep(Duration::from_secs(minutes * 60))));
    }

    async fn on_inbound(&mut self, ev: InboundEvent) {
        self.arm_idle_timer();

        let config = self.config_store.get();
        if config.agent.coalesce_disabled {
            self.pending_buffer.push(ev.message);
            self.pending_must_reply = self.pending_must_reply || ev.must_reply;
            self.debounce_timer = None;
            self.max_wait_timer = None;
            self.flush_user().await;
            return;
        }

        let first_in_burst = self.pending_buffer.is_empty();
        self.pending_buffer.push(ev.message);
        self.pending_must_reply = self.pending_must_reply || ev.must_reply;

        self.debounce_timer = Some(Box::pin(sleep(Duration::from_millis(config.agent.coalesce_debounce_ms))));
        if first_in_burst {
            self.max_wait_timer = Some(Box::pin(sleep(Duration::from_millis(config.agent.coalesce_max_wait_ms))));
        }
    }

    async fn flush_user(&mut self) {
        if self.pending_buffer.is_empty() {
            return;
        }

        self.debounce_timer = None;
        self.max_wait_timer = None;

        let messages = std::mem::take(&mut self.pending_buffer);
        let must_reply = std::mem::replace(&mut self.pending_must_reply, false);

        let joined_text = messages
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let triggering_message_id = messages.last().and_then(|m| m.message_id.clone());
        let user_id = messages.last().map(|m| m.author_id.clone());
        let attachments = messages.into_iter().flat_map(|m| m.attachments).collect();

        turn::run_turn(
            self,
            TurnInput {
                joined_text,
                attachments,
                must_reply,
                internal: false,
                triggering_message_id,
                user_id,
            },
        )
        .await;
    }

    async fn force_flush_internal(&mut self, message: String) {
        warn!("flushing internal message as a new turn");

        if !self.pending_buffer.is_empty() {
            self.flush_user().await;
        }

        turn::run_turn(
            self,
            TurnInput {
                joined_text: message,
                attachments: Vec::new(),
                must_reply: false,
                internal: true,
                triggering_message_id: None,
                user_id: None,
            },
        )
        .await;
    }
}
