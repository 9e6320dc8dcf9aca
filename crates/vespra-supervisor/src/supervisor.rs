use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vespra_channels::{ChannelManager, InboundMessage};
use vespra_core::config::memory_db_path;
use vespra_core::types::{AgentId, ChannelId, WorkerKey};
use vespra_core::{AgentBinding, Config, ConfigStore, VespraError};
use vespra_llm::LlmGateway;
use vespra_memory::MemoryStore;
use vespra_tools::ToolRegistry;

use crate::admission::{self, Decision};

/// Maps inbound platform events onto Channel Agent workers, enforcing
/// admission and owning worker lifecycle (§4.1). One adapter instance is
/// registered per configured agent identity — each `[[agents]]` binding
/// owns its own bot token and therefore its own platform connection, which
/// generalizes the teacher's single-bot-per-platform keying (adapter name
/// only) to per-agent-identity keying (see DESIGN.md).
pub struct Supervisor {
    config_store: Arc<ConfigStore>,
    gateway: Arc<LlmGateway>,
    tools: Arc<ToolRegistry>,
    channels: Arc<ChannelManager>,
    souls: HashMap<String, String>,
    memories: DashMap<String, Arc<MemoryStore>>,
    workers: DashMap<WorkerKey, vespra_agent::WorkerHandle>,
}

/// Builder collecting the shared, already-constructed dependencies a
/// Supervisor needs. Soul text is pre-loaded by the caller (vespra-gateway
/// reads `soul_file` from disk at startup) so the Supervisor itself never
/// touches agent-authoring files.
pub struct SupervisorBuilder {
    config_store: Arc<ConfigStore>,
    gateway: Arc<LlmGateway>,
    tools: Arc<ToolRegistry>,
    channels: Arc<ChannelManager>,
    souls: HashMap<String, String>,
}

impl SupervisorBuilder {
    pub fn new(config_store: Arc<ConfigStore>, gateway: Arc<LlmGateway>, channels: Arc<ChannelManager>) -> Self {
        Self {
            config_store,
            gateway,
            tools: Arc::new(ToolRegistry::default_tools(None, "vespra/0.1".to_string())),
            channels,
            souls: HashMap::new(),
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_soul(mut self, agent_id: impl Into<String>, soul: impl Into<String>) -> Self {
        self.souls.insert(agent_id.into(), soul.into());
        self
    }

    pub fn build(self) -> Supervisor {
        Supervisor {
            config_store: self.config_store,
            gateway: self.gateway,
            tools: self.tools,
            channels: self.channels,
            souls: self.souls,
            memories: DashMap::new(),
            workers: DashMap::new(),
        }
    }
}

impl Supervisor {
    /// Drain an adapter's inbound event stream, admitting and routing each
    /// one. Runs until the sender side is dropped (adapter disconnected).
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(msg) = inbound.recv().await {
            self.on_message(msg).await;
        }
    }

    /// `OnMessage` (§4.1): admit, then look up or create the owning worker
    /// and push a non-blocking inbox event. Never panics or propagates —
    /// failures are logged and the event is dropped.
    pub async fn on_message(&self, msg: InboundMessage) {
        let config = self.config_store.get();
        match admission::admit(&config, &msg) {
            Decision::Drop => {}
            Decision::Enqueue { agent_id, must_reply } => {
                self.dispatch(&config, &agent_id, must_reply, msg).await;
            }
        }
    }

    async fn dispatch(&self, config: &Config, agent_id: &str, must_reply: bool, msg: InboundMessage) {
        let Some(agent) = config.find_agent_by_id(agent_id).cloned() else {
            warn!(agent_id, "admitted event for unknown agent binding, dropping");
            return;
        };

        let key = WorkerKey { agent_id: AgentId::new(agent.agent_id.clone()), channel_id: ChannelId::from(msg.channel_id.clone()) };

        let needs_spawn = match self.workers.get(&key) {
            Some(handle) => handle.retired.load(Ordering::SeqCst),
            None => true,
        };

        if needs_spawn {
            match self.spawn_worker(config, &agent, &msg.channel_id) {
                Ok(handle) => {
                    self.workers.insert(key.clone(), handle);
                }
                Err(err) => {
                    warn!(agent_id, channel_id = %msg.channel_id, error = %err, "failed to spawn channel worker");
                    return;
                }
            }
        }

        if let Some(handle) = self.workers.get(&key) {
            handle.inbox.push(vespra_agent::SupervisorSignal::Inbound(vespra_agent::InboundEvent { message: msg, must_reply }));
        }
    }

    fn spawn_worker(&self, config: &Config, agent: &AgentBinding, channel_id: &str) -> Result<vespra_agent::WorkerHandle, VespraError> {
        let channel = self
            .channels
            .get(&agent.agent_id)
            .ok_or_else(|| VespraError::PlatformSend(format!("no connected channel adapter for agent '{}'", agent.agent_id)))?;

        let memory = self.memory_for(config, agent)?;
        let soul = self.souls.get(&agent.agent_id).cloned().unwrap_or_default();

        info!(agent_id = %agent.agent_id, channel_id, "spawning channel worker");

        Ok(vespra_agent::spawn(vespra_agent::SpawnParams {
            agent_id: agent.agent_id.clone(),
            server_id: agent.server_id.clone(),
            channel_id: channel_id.to_string(),
            soul,
            channel,
            config_store: Arc::clone(&self.config_store),
            gateway: Arc::clone(&self.gateway),
            memory,
            tools: Arc::clone(&self.tools),
        }))
    }

    /// One database file per agent (§6); opened lazily and cached for reuse
    /// across every channel that agent is active in.
    fn memory_for(&self, config: &Config, agent: &AgentBinding) -> Result<Arc<MemoryStore>, VespraError> {
        if let Some(existing) = self.memories.get(&agent.agent_id) {
            return Ok(Arc::clone(existing.value()));
        }

        let path: PathBuf = memory_db_path(config, agent);
        let path_str = path.to_string_lossy();
        if path_str != ":memory:" {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| VespraError::MemoryIo(e.to_string()))?;
            }
        }
        let conn = rusqlite::Connection::open(&path).map_err(|e| VespraError::MemoryIo(e.to_string()))?;
        let store = Arc::new(
            MemoryStore::new(conn, Arc::clone(&self.gateway), config.memory.embedding_dim, config.memory.dedup_threshold, config.memory.recall_threshold)
                .map_err(|e| VespraError::MemoryIo(e.to_string()))?,
        );
        self.memories.insert(agent.agent_id.clone(), Arc::clone(&store));
        Ok(store)
    }

    /// `Reload(new_config)` (§4.1): stop workers for agents no longer
    /// configured. Existing workers for still-configured agents pick up the
    /// new snapshot on their next turn via the shared `ConfigStore`; new
    /// agents' platform connections are established by whoever owns the
    /// `ChannelManager` (outside this crate), not here.
    pub fn on_reload(&self, new_config: &Config) {
        let live_agent_ids: std::collections::HashSet<&str> = new_config.agents.iter().map(|a| a.agent_id.as_str()).collect();

        let stale: Vec<WorkerKey> = self
            .workers
            .iter()
            .filter(|entry| !live_agent_ids.contains(entry.key().agent_id.as_str()))
            .map(|entry| entry.key().clone())
            .collect();

        for key in stale {
            if let Some((_, handle)) = self.workers.remove(&key) {
                info!(worker = %key, "agent removed from config, shutting down worker");
                handle.inbox.push(vespra_agent::SupervisorSignal::Shutdown);
            }
        }
    }

    /// Drop bookkeeping for workers that evicted themselves on idle timeout
    /// (§4.2). Safe to call from a periodic housekeeping loop; a worker
    /// marked retired is never reused by [`Supervisor::dispatch`] even if
    /// this hasn't run yet, since that path checks the flag directly.
    pub fn reap_retired(&self) {
        self.workers.retain(|_, handle| !handle.retired.load(Ordering::SeqCst));
    }

    pub fn active_worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Point-in-time roster for the management API's status snapshot (§6):
    /// every configured agent, with how many of its channel workers are
    /// currently live (a retired-but-not-yet-reaped worker still counts,
    /// since it will be replaced on the next inbound event for that key).
    pub fn status_snapshot(&self, config: &Config) -> vespra_core::types::StatusSnapshot {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in self.workers.iter() {
            *counts.entry(entry.key().agent_id.as_str().to_string()).or_insert(0) += 1;
        }

        let agents = config
            .agents
            .iter()
            .map(|agent| vespra_core::types::AgentStatus {
                agent_id: agent.agent_id.clone(),
                server_id: agent.server_id.clone(),
                active_channels: counts.get(&agent.agent_id).copied().unwrap_or(0),
            })
            .collect();

        vespra_core::types::StatusSnapshot { agents, generated_at: chrono::Utc::now() }
    }
}
