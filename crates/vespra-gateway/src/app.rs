use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use vespra_channels::{ChannelManager, InboundMessage};
use vespra_core::{Config, ConfigStore};
use vespra_llm::LlmGateway;
use vespra_supervisor::{Supervisor, SupervisorBuilder};
use vespra_tools::ToolRegistry;

/// Inbound event mailbox capacity between platform adapters and the
/// Supervisor's admission loop. A full mailbox applies backpressure to
/// whichever adapter is producing fastest, rather than dropping events —
/// unlike a worker's own per-channel [`vespra_agent::Inbox`], which is
/// allowed to drop under §4.1 step 5's bounded-mailbox contract.
const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Central shared state. The chat-platform SDK is an external collaborator
/// (§1): this binary does not construct or connect any [`vespra_channels::Channel`]
/// implementation itself. `inbound_tx` is the handle a platform adapter
/// would clone to deliver events into the Supervisor's admission path (§6's
/// "event callback"); none is wired up here, so the Supervisor currently
/// only reacts to config reloads and its own idle-eviction timers.
pub struct AppState {
    pub config_store: Arc<ConfigStore>,
    pub supervisor: Arc<Supervisor>,
    pub inbound_tx: mpsc::Sender<InboundMessage>,
}

impl AppState {
    /// Builds the shared state and returns the inbound receiver alongside
    /// it — the caller (here, `main`) is responsible for handing that
    /// receiver to [`run_supervisor`] exactly once.
    pub fn new(config_path: Option<&str>) -> anyhow::Result<(Self, mpsc::Receiver<InboundMessage>)> {
        let config_store = Arc::new(ConfigStore::load(config_path)?);
        let config = config_store.get();

        let gateway = Arc::new(LlmGateway::from_config(&config));
        let tools = Arc::new(ToolRegistry::default_tools(
            config.tools.search.api_key.clone(),
            config.web.user_agent.clone(),
        ));
        let channels = Arc::new(ChannelManager::new());

        let souls = load_souls(&config);
        let mut builder = SupervisorBuilder::new(Arc::clone(&config_store), gateway, channels).with_tools(tools);
        for (agent_id, soul) in souls {
            builder = builder.with_soul(agent_id, soul);
        }

        let supervisor = Arc::new(builder.build());
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        Ok((Self { config_store, supervisor, inbound_tx }, inbound_rx))
    }
}

/// Read each configured agent's `soul_file` (if set) into memory once at
/// startup. A missing or unreadable file is logged and that agent starts
/// with an empty soul rather than failing the whole process.
fn load_souls(config: &Config) -> Vec<(String, String)> {
    config
        .agents
        .iter()
        .filter_map(|agent| {
            let path = agent.soul_file.as_ref()?;
            match std::fs::read_to_string(vespra_core::config::expand_path(path)) {
                Ok(text) => Some((agent.agent_id.clone(), text)),
                Err(e) => {
                    warn!(agent_id = %agent.agent_id, path, error = %e, "failed to read soul file, starting with empty soul");
                    None
                }
            }
        })
        .collect()
}

/// Drive the Supervisor's admission loop until every clone of `inbound_tx`
/// (held by external platform adapters) is dropped. Spawned once at
/// startup with the receiver half returned from [`AppState::new`].
pub async fn run_supervisor(supervisor: Arc<Supervisor>, inbound_rx: mpsc::Receiver<InboundMessage>) {
    info!("supervisor event loop starting");
    supervisor.run(inbound_rx).await;
    info!("supervisor event loop exited");
}

pub fn build_router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/health", axum::routing::get(crate::http::health::health_handler))
        .route("/status", axum::routing::get(crate::http::health::status_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
