use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{instrument, warn};
use vespra_channels::types::{Attachment, MessageFormat, OutboundMessage};
use vespra_core::ResponseMode;
use vespra_llm::{ChatOptions, ContentPart, Message, Role};
use vespra_tools::{ToolContext, ToolRegistry};

use crate::extraction;
use crate::prompt::build_system_prompt;
use crate::worker::ChannelAgent;

/// One coalesced batch of input ready to become a turn (§4.2 handleTurn).
pub(crate) struct TurnInput {
    pub joined_text: String,
    pub attachments: Vec<Attachment>,
    pub must_reply: bool,
    /// True for an internal-message-triggered turn (§4.2): never exposed to
    /// `web_search`, never counted toward the user-visible conversation as a
    /// "message received" event, but otherwise runs the same loop.
    pub internal: bool,
    pub triggering_message_id: Option<String>,
    pub user_id: Option<String>,
}

const FALLBACK_REPLY: &str = "Sorry, I ran into a problem and couldn't respond to that.";

#[instrument(skip(agent, input), fields(agent = %agent.agent_id, channel = %agent.channel_id, must_reply = input.must_reply))]
pub(crate) async fn run_turn(agent: &mut ChannelAgent, input: TurnInput) {
    let config = agent.config_store.get();
    // An internal-message turn is the system asking itself for a response —
    // the effective mode is always `all`, never suppressed by a channel's
    // configured smart/mention policy.
    let mode = if input.internal {
        ResponseMode::All
    } else {
        config.resolve_response_mode(&agent.server_id, &agent.channel_id)
    };
    let language = config.resolve_language(&agent.server_id, &agent.channel_id);
    let provider = config.resolve_provider(&agent.server_id, &agent.channel_id);
    let model = config.resolve_model(&agent.server_id, &agent.channel_id);

    let typing = agent
        .channel
        .start_typing(&agent.channel_id)
        .await
        .unwrap_or_else(|err| {
            warn!(%err, "failed to start typing indicator");
            vespra_channels::TypingHandle::noop()
        });

    let recalls = agent
        .memory
        .recall(&config, &input.joined_text, &agent.server_id, config.memory.recall_limit)
        .await
        .unwrap_or_else(|err| {
            warn!(%err, "memory recall failed, continuing without it");
            Vec::new()
        });

    let system = build_system_prompt(&agent.soul, language.as_deref(), &recalls, mode);

    let mut messages = agent.history.clone();
    let mut user_parts = vec![ContentPart::Text {
        text: input.joined_text.clone(),
    }];
    user_parts.extend(input.attachments.iter().filter_map(|a| {
        a.content_type
            .as_deref()
            .filter(|ct| ct.starts_with("image/"))
            .map(|_| ContentPart::Image { url: a.url.clone() })
    }));
    let user_message = Message {
        role: Role::User,
        content: user_parts,
    };
    messages.push(user_message.clone());

    let tool_set = if input.internal {
        agent.tools.without_search()
    } else {
        agent.tools.all().to_vec()
    };
    let tool_defs = ToolRegistry::to_definitions(&tool_set);

    let ctx = ToolContext {
        channel: Arc::clone(&agent.channel),
        channel_id: agent.channel_id.clone(),
        triggering_message_id: input.triggering_message_id.clone(),
        memory: Arc::clone(&agent.memory),
        config: Arc::clone(&config),
        server_id: agent.server_id.clone(),
        user_id: input.user_id.clone(),
        internal_inbox: agent.internal_tx.clone(),
        search_in_progress: Arc::clone(&agent.search_in_progress),
        replied: Arc::new(AtomicBool::new(false)),
    };

    let max_iterations = config.agent.max_tool_iterations;
    let mut final_reply: Option<String> = None;
    let mut issued_reply = false;

    for iteration in 0..max_iterations {
        let response = match agent
            .gateway
            .chat(
                &config,
                messages.clone(),
                system.clone(),
                tool_defs.clone(),
                ChatOptions {
                    provider: provider.clone(),
                    model: model.clone(),
                    extra_tools: Vec::new(),
                },
            )
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(%err, "llm request failed");
                if input.must_reply {
                    send_reply(agent, FALLBACK_REPLY, input.triggering_message_id.as_deref()).await;
                }
                typing.stop();
                return;
            }
        };

        if response.tool_calls.is_empty() {
            let content = response.content.trim().to_string();
            let already_replied = ctx.replied.load(Ordering::SeqCst);

            if already_replied {
                // A prior iteration already sent the reply; this closing
                // message is commentary only and must not double-send.
            } else if mode == ResponseMode::Smart && !input.must_reply && content.is_empty() {
                // Silence is the deliberate outcome in smart mode.
            } else if mode == ResponseMode::Smart && !input.must_reply {
                // Plain text without a deliberate `reply`/`react` tool call
                // is suppressed in smart mode unless addressed directly.
            } else if !content.is_empty() {
                send_reply(agent, &content, input.triggering_message_id.as_deref()).await;
                final_reply = Some(content);
            }
            break;
        }

        let mut assistant_parts = Vec::new();
        if !response.content.trim().is_empty() {
            assistant_parts.push(ContentPart::Text {
                text: response.content.clone(),
            });
        }
        for call in &response.tool_calls {
            assistant_parts.push(ContentPart::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }
        messages.push(Message {
            role: Role::Assistant,
            content: assistant_parts,
        });

        for call in &response.tool_calls {
            let result = ToolRegistry::execute(&tool_set, &ctx, &call.name, call.input.clone()).await;
            messages.push(Message {
                role: Role::Tool,
                content: vec![ContentPart::ToolResult {
                    tool_call_id: call.id.clone(),
                    content: result.content,
                    is_error: result.is_error,
                }],
            });
        }

        issued_reply = ctx.replied.load(Ordering::SeqCst);

        if iteration + 1 == max_iterations && !issued_reply && input.must_reply {
            send_reply(agent, FALLBACK_REPLY, input.triggering_message_id.as_deref()).await;
            final_reply = Some(FALLBACK_REPLY.to_string());
        }
    }

    typing.stop();

    agent.history.push(user_message);
    if let Some(reply) = final_reply {
        agent.history.push(Message {
            role: Role::Assistant,
            content: vec![ContentPart::Text { text: reply }],
        });
    }
    let overflow = agent.history.len().saturating_sub(config.agent.history_limit);
    if overflow > 0 {
        agent.history.drain(0..overflow);
    }

    if !input.internal {
        agent.turns_since_extraction += 1;
        if agent.turns_since_extraction >= config.agent.memory_extraction_interval {
            agent.turns_since_extraction = 0;
            extraction::spawn_extraction(agent);
        }
    }
}

async fn send_reply(agent: &ChannelAgent, content: &str, in_reply_to: Option<&str>) {
    let msg = OutboundMessage {
        channel_id: agent.channel_id.clone(),
        content: content.to_string(),
        format: MessageFormat::PlainText,
        in_reply_to: in_reply_to.map(str::to_string),
    };
    if let Err(err) = agent.channel.send(&msg).await {
        warn!(%err, "failed to send reply");
    }
}
