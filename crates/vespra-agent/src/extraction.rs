use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use vespra_core::ConfigStore;
use vespra_llm::{ChatOptions, LlmGateway, Message};
use vespra_memory::MemoryStore;

use crate::worker::ChannelAgent;

const EXTRACTION_TIMEOUT_SECS: u64 = 30;

/// Detached background extraction (§4.4): every `memory_extraction_interval`
/// turns, ask the LLM to distill durable facts out of recent history and
/// save them. Best-effort — failures are logged and swallowed, never
/// surfaced to the conversation. Bounded by its own timeout, matching
/// `web_search`'s detached background task (§5, §9).
pub(crate) fn spawn_extraction(agent: &ChannelAgent) {
    let gateway = Arc::clone(&agent.gateway);
    let memory = Arc::clone(&agent.memory);
    let config_store = Arc::clone(&agent.config_store);
    let server_id = agent.server_id.clone();
    let recent = render_recent_exchange(&agent.history);

    if recent.trim().is_empty() {
        return;
    }

    tokio::spawn(async move {
        let outcome = tokio::time::timeout(
            Duration::from_secs(EXTRACTION_TIMEOUT_SECS),
            extract(gateway, memory, config_store, server_id, recent),
        )
        .await;

        match outcome {
            Ok(Err(err)) => warn!(%err, "memory extraction failed"),
            Err(_) => warn!("memory extraction timed out"),
            Ok(Ok(())) => {}
        }
    });
}

async fn extract(
    gateway: Arc<LlmGateway>,
    memory: Arc<MemoryStore>,
    config_store: Arc<ConfigStore>,
    server_id: String,
    recent: String,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = config_store.get();

    let system = "You extract durable facts worth remembering long-term from a \
                  conversation excerpt. Reply with one fact per line, plain text, \
                  no numbering or commentary. If nothing is worth remembering, reply \
                  with an empty response."
        .to_string();

    let messages = vec![Message {
        role: vespra_llm::Role::User,
        content: vec![vespra_llm::ContentPart::Text { text: recent }],
    }];

    let response = gateway
        .chat(&config, messages, system, Vec::new(), ChatOptions::default())
        .await?;

    for line in response.content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!(fact = %line, "extracted memory");
        memory.save(&config, &server_id, None, line, None).await?;
    }

    Ok(())
}

fn render_recent_exchange(history: &[Message]) -> String {
    const WINDOW: usize = 6;
    history
        .iter()
        .rev()
        .take(WINDOW)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|m| {
            let role = match m.role {
                vespra_llm::Role::System => "system",
                vespra_llm::Role::User => "user",
                vespra_llm::Role::Assistant => "assistant",
                vespra_llm::Role::Tool => "tool",
            };
            let text: String = m
                .content
                .iter()
                .filter_map(|p| match p {
                    vespra_llm::ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" ");
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
