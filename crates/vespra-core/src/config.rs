use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VespraError};

/// Response policy for a channel: whether the agent speaks at all, and
/// whether it waits to be addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Never respond.
    None,
    /// Respond only when addressed.
    Mention,
    /// Respond to every message.
    All,
    /// Respond to every addressed message; the LLM decides for the rest.
    Smart,
}

impl std::str::FromStr for ResponseMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "mention" => Ok(Self::Mention),
            "all" => Ok(Self::All),
            "smart" => Ok(Self::Smart),
            other => Err(format!("unknown response mode: {other}")),
        }
    }
}

/// Top-level config (vespra.toml + VESPRA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub agent: AgentTuning,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub agents: Vec<AgentBinding>,
    /// Agent a direct message is routed to when no agent owns the event's
    /// `server_id` (§4.1 step 2). `None` means DMs with no owning agent are
    /// dropped like any other unowned event.
    pub default_agent_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            memory: MemoryConfig::default(),
            agent: AgentTuning::default(),
            response: ResponseConfig::default(),
            tools: ToolsConfig::default(),
            web: WebConfig::default(),
            agents: Vec::new(),
            default_agent_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    pub vision_model: Option<String>,
    /// Base URL the vision model is served from; defaults to the openrouter
    /// base when unset. If it equals `glm_base_url`, the GLM key is used.
    pub vision_base_url: Option<String>,
    pub openrouter_key: Option<String>,
    #[serde(default = "default_openrouter_base_url")]
    pub openrouter_base_url: String,
    pub glm_key: Option<String>,
    #[serde(default = "default_glm_base_url")]
    pub glm_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_seconds: u64,
    /// Embedding endpoint; defaults to the openrouter base when unset.
    pub embedding_base_url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            vision_model: None,
            vision_base_url: None,
            openrouter_key: None,
            openrouter_base_url: default_openrouter_base_url(),
            glm_key: None,
            glm_base_url: default_glm_base_url(),
            request_timeout_seconds: default_request_timeout_secs(),
            embedding_base_url: None,
            embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,
    #[serde(default = "default_recall_threshold")]
    pub recall_threshold: f32,
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedding_dim: default_embedding_dim(),
            dedup_threshold: default_dedup_threshold(),
            recall_threshold: default_recall_threshold(),
            recall_limit: default_recall_limit(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTuning {
    #[serde(default = "default_debounce_ms")]
    pub coalesce_debounce_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub coalesce_max_wait_ms: u64,
    #[serde(default)]
    pub coalesce_disabled: bool,
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default = "default_memory_extraction_interval")]
    pub memory_extraction_interval: u64,
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            coalesce_debounce_ms: default_debounce_ms(),
            coalesce_max_wait_ms: default_max_wait_ms(),
            coalesce_disabled: false,
            idle_timeout_minutes: default_idle_timeout_minutes(),
            history_limit: default_history_limit(),
            max_tool_iterations: default_max_tool_iterations(),
            memory_extraction_interval: default_memory_extraction_interval(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(default = "default_response_mode")]
    pub default_mode: ResponseMode,
    pub default_language: Option<String>,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            default_mode: default_response_mode(),
            default_language: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_search_provider")]
    pub provider: String,
    pub api_key: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_search_provider(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
        }
    }
}

/// One configured agent identity bound to an external server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBinding {
    pub agent_id: String,
    pub server_id: String,
    pub token: String,
    /// Name matched case-insensitively, word-boundary, against message text
    /// to compute `addressed` (§4.1 step 3) when absent from the platform's
    /// own mention/reply metadata. Falls back to `agent_id` when unset.
    pub display_name: Option<String>,
    pub soul_file: Option<String>,
    pub db_path: Option<String>,
    #[serde(default)]
    pub ignore_user_ids: Vec<String>,
    pub response_mode: Option<ResponseMode>,
    pub language: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub channels: Vec<ChannelOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelOverride {
    pub channel_id: String,
    pub response_mode: Option<ResponseMode>,
    pub language: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4.5".to_string()
}
fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_glm_base_url() -> String {
    "https://open.bigmodel.cn/api/paas/v4".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dim() -> usize {
    1536
}
fn default_dedup_threshold() -> f32 {
    0.85
}
fn default_recall_threshold() -> f32 {
    0.35
}
fn default_recall_limit() -> usize {
    5
}
fn default_data_dir() -> String {
    "~/.local/share/vespra".to_string()
}
fn default_debounce_ms() -> u64 {
    1500
}
fn default_max_wait_ms() -> u64 {
    8000
}
fn default_idle_timeout_minutes() -> u64 {
    30
}
fn default_history_limit() -> usize {
    40
}
fn default_max_tool_iterations() -> usize {
    10
}
fn default_memory_extraction_interval() -> u64 {
    5
}
fn default_inbox_capacity() -> usize {
    32
}
fn default_response_mode() -> ResponseMode {
    ResponseMode::Smart
}
fn default_search_provider() -> String {
    "brave".to_string()
}
fn default_user_agent() -> String {
    "vespra/0.1".to_string()
}

/// A single rule violated during [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError(pub String);

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Config {
    /// Load config from a TOML file with `VESPRA_*` env var overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(expand_path)
            .unwrap_or_else(default_config_path);

        let config: Config = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("VESPRA_").split("_"))
            .extract()
            .map_err(|e| VespraError::ConfigInvalid(e.to_string()))?;

        let errors = config.validate();
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .map(|e| e.0.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(VespraError::ConfigInvalid(joined));
        }

        Ok(config)
    }

    /// Check every invariant named in the spec; returns all violations found
    /// (not just the first) so an operator can fix a config in one pass.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.agent.coalesce_debounce_ms > self.agent.coalesce_max_wait_ms {
            errors.push(ConfigValidationError(format!(
                "agent.coalesce_debounce_ms ({}) must be <= agent.coalesce_max_wait_ms ({})",
                self.agent.coalesce_debounce_ms, self.agent.coalesce_max_wait_ms
            )));
        }

        if self.llm.openrouter_key.is_none() && self.llm.glm_key.is_none() {
            errors.push(ConfigValidationError(
                "at least one of llm.openrouter_key or llm.glm_key must be set".to_string(),
            ));
        }

        if self.agents.is_empty() {
            errors.push(ConfigValidationError(
                "at least one [[agents]] binding must be configured".to_string(),
            ));
        }

        for agent in &self.agents {
            if agent.token.trim().is_empty() {
                errors.push(ConfigValidationError(format!(
                    "agent '{}': token must not be empty",
                    agent.agent_id
                )));
            }
            if agent.server_id.trim().is_empty() {
                errors.push(ConfigValidationError(format!(
                    "agent '{}': server_id must not be empty",
                    agent.agent_id
                )));
            }
            if agent.provider.as_deref() == Some("glm") && self.llm.glm_key.is_none() {
                errors.push(ConfigValidationError(format!(
                    "agent '{}' selects provider 'glm' but llm.glm_key is unset",
                    agent.agent_id
                )));
            }
            for ch in &agent.channels {
                if ch.provider.as_deref() == Some("glm") && self.llm.glm_key.is_none() {
                    errors.push(ConfigValidationError(format!(
                        "agent '{}' channel '{}' selects provider 'glm' but llm.glm_key is unset",
                        agent.agent_id, ch.channel_id
                    )));
                }
            }
        }

        if let Some(default_id) = &self.default_agent_id {
            if !self.agents.iter().any(|a| &a.agent_id == default_id) {
                errors.push(ConfigValidationError(format!(
                    "default_agent_id '{default_id}' does not match any configured [[agents]] binding"
                )));
            }
        }

        errors
    }

    /// Lexicographic precedence: channel override > agent-level > global default.
    pub fn resolve_response_mode(&self, server_id: &str, channel_id: &str) -> ResponseMode {
        if let Some(agent) = self.find_agent(server_id) {
            if let Some(ch) = agent.channels.iter().find(|c| c.channel_id == channel_id) {
                if let Some(mode) = ch.response_mode {
                    return mode;
                }
            }
            if let Some(mode) = agent.response_mode {
                return mode;
            }
        }
        self.response.default_mode
    }

    /// Lexicographic precedence: channel override > agent-level > global default.
    pub fn resolve_language(&self, server_id: &str, channel_id: &str) -> Option<String> {
        if let Some(agent) = self.find_agent(server_id) {
            if let Some(ch) = agent.channels.iter().find(|c| c.channel_id == channel_id) {
                if ch.language.is_some() {
                    return ch.language.clone();
                }
            }
            if agent.language.is_some() {
                return agent.language.clone();
            }
        }
        self.response.default_language.clone()
    }

    /// Lexicographic precedence: channel override > agent-level > global default
    /// for provider selection.
    pub fn resolve_provider(&self, server_id: &str, channel_id: &str) -> String {
        if let Some(agent) = self.find_agent(server_id) {
            if let Some(ch) = agent.channels.iter().find(|c| c.channel_id == channel_id) {
                if let Some(p) = &ch.provider {
                    return p.clone();
                }
            }
            if let Some(p) = &agent.provider {
                return p.clone();
            }
        }
        String::new()
    }

    pub fn resolve_model(&self, server_id: &str, channel_id: &str) -> String {
        if let Some(agent) = self.find_agent(server_id) {
            if let Some(ch) = agent.channels.iter().find(|c| c.channel_id == channel_id) {
                if let Some(m) = &ch.model {
                    return m.clone();
                }
            }
            if let Some(m) = &agent.model {
                return m.clone();
            }
        }
        self.llm.model.clone()
    }

    pub fn find_agent(&self, server_id: &str) -> Option<&AgentBinding> {
        self.agents.iter().find(|a| a.server_id == server_id)
    }

    pub fn find_agent_by_id(&self, agent_id: &str) -> Option<&AgentBinding> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }

    /// Agent a DM without an owning server is routed to (§4.1 step 2).
    pub fn default_agent(&self) -> Option<&AgentBinding> {
        self.default_agent_id
            .as_deref()
            .and_then(|id| self.find_agent_by_id(id))
    }
}

fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("VESPRA_CONFIG") {
        return expand_path(&p);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(format!("{home}/.config/vespra/vespra.toml"))
}

/// Expand a leading `~` and any `$VARS` in a path-shaped config value.
pub fn expand_path(raw: &str) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let with_home = if let Some(rest) = raw.strip_prefix("~/") {
        format!("{home}/{rest}")
    } else if raw == "~" {
        home.clone()
    } else {
        raw.to_string()
    };

    let expanded = shellexpand_env(&with_home);
    PathBuf::from(expanded)
}

/// Minimal `$VAR` / `${VAR}` expansion without pulling in a shell-expansion crate.
fn shellexpand_env(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = chars.peek().map(|(_, c)| *c) == Some('{');
        if braced {
            chars.next();
            let mut name = String::new();
            for (_, c) in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            out.push_str(&std::env::var(&name).unwrap_or_default());
        } else {
            let mut name = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
            } else {
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
        }
    }
    out
}

/// Holds the active config behind an atomically-swappable snapshot.
///
/// `get()` clones the `Arc` (never the contents); `reload()` parses and
/// validates the source before swapping, keeping the prior snapshot on
/// failure — mirrors the lexicographic-precedence contract in §4.6.
pub struct ConfigStore {
    path: PathBuf,
    current: ArcSwap<Config>,
}

impl ConfigStore {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(expand_path)
            .unwrap_or_else(default_config_path);
        let config = Config::load(config_path)?;
        Ok(Self {
            path,
            current: ArcSwap::from_pointee(config),
        })
    }

    /// Wrap an already-constructed `Config`, skipping file I/O entirely.
    /// Used by other crates' tests to get a `ConfigStore` without a config
    /// file on disk; `reload()`/`spawn_watcher()` still work against
    /// `VESPRA_CONFIG` (or the default path) if called afterwards.
    pub fn from_config(config: Config) -> Self {
        Self {
            path: default_config_path(),
            current: ArcSwap::from_pointee(config),
        }
    }

    pub fn get(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Re-parse and validate the config file, swapping the snapshot only on
    /// success. Returns the rejection error (and keeps serving the old
    /// snapshot) when validation fails.
    pub fn reload(&self) -> Result<()> {
        let path_str = self.path.to_string_lossy().to_string();
        let fresh = Config::load(Some(&path_str))?;
        self.current.store(Arc::new(fresh));
        info!(path = %path_str, "config reloaded");
        Ok(())
    }

    /// Watch the config file for changes and reload on every write event.
    /// Runs until the returned task is aborted or the process exits;
    /// reload failures are logged and do not affect the serving snapshot.
    pub fn spawn_watcher(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        use notify::{RecursiveMode, Watcher};

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let mut watcher = match notify::recommended_watcher(move |res| {
                let _ = tx.send(res);
            }) {
                Ok(w) => w,
                Err(e) => {
                    warn!(error = %e, "failed to start config watcher");
                    return;
                }
            };
            if let Some(parent) = path.parent() {
                if let Err(e) = watcher.watch(parent, RecursiveMode::NonRecursive) {
                    warn!(error = %e, "failed to watch config directory");
                    return;
                }
            }
            // Keep the watcher alive for the lifetime of this blocking task.
            std::thread::park();
            drop(watcher);
        });

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if event.is_err() {
                    continue;
                }
                match self.reload() {
                    Ok(()) => {}
                    Err(e) => warn!(error = %e, "config reload rejected, keeping prior snapshot"),
                }
            }
        })
    }
}

pub fn data_dir_for(config: &Config, server_id: &str) -> PathBuf {
    let base = expand_path(&config.memory.data_dir);
    base.join("agents").join(server_id)
}

pub fn memory_db_path(config: &Config, binding: &AgentBinding) -> PathBuf {
    if let Some(explicit) = &binding.db_path {
        return expand_path(explicit);
    }
    data_dir_for(config, &binding.server_id).join("memory.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_config() -> Config {
        Config {
            llm: LlmConfig {
                openrouter_key: Some("key".to_string()),
                ..LlmConfig::default()
            },
            memory: MemoryConfig::default(),
            agent: AgentTuning::default(),
            response: ResponseConfig::default(),
            tools: ToolsConfig::default(),
            web: WebConfig::default(),
            agents: vec![AgentBinding {
                agent_id: "main".to_string(),
                server_id: "srv-1".to_string(),
                token: "tok".to_string(),
                display_name: None,
                soul_file: None,
                db_path: None,
                ignore_user_ids: vec![],
                response_mode: None,
                language: None,
                provider: None,
                model: None,
                channels: vec![],
            }],
            default_agent_id: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(minimal_valid_config().validate().is_empty());
    }

    #[test]
    fn rejects_inverted_coalesce_window() {
        let mut cfg = minimal_valid_config();
        cfg.agent.coalesce_debounce_ms = 9000;
        cfg.agent.coalesce_max_wait_ms = 1000;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.0.contains("coalesce_debounce_ms")));
    }

    #[test]
    fn rejects_missing_provider_keys() {
        let mut cfg = minimal_valid_config();
        cfg.llm.openrouter_key = None;
        cfg.llm.glm_key = None;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.0.contains("openrouter_key")));
    }

    #[test]
    fn rejects_empty_token() {
        let mut cfg = minimal_valid_config();
        cfg.agents[0].token = String::new();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.0.contains("token")));
    }

    #[test]
    fn rejects_glm_provider_without_key() {
        let mut cfg = minimal_valid_config();
        cfg.agents[0].provider = Some("glm".to_string());
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.0.contains("glm_key")));
    }

    #[test]
    fn resolves_lexicographic_response_mode() {
        let mut cfg = minimal_valid_config();
        cfg.response.default_mode = ResponseMode::Smart;
        cfg.agents[0].response_mode = Some(ResponseMode::All);
        cfg.agents[0].channels.push(ChannelOverride {
            channel_id: "ch-1".to_string(),
            response_mode: Some(ResponseMode::Mention),
            language: None,
            provider: None,
            model: None,
        });

        assert_eq!(
            cfg.resolve_response_mode("srv-1", "ch-1"),
            ResponseMode::Mention
        );
        assert_eq!(
            cfg.resolve_response_mode("srv-1", "ch-2"),
            ResponseMode::All
        );
        assert_eq!(
            cfg.resolve_response_mode("unknown-server", "ch-1"),
            ResponseMode::Smart
        );
    }
}
