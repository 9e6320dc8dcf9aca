use vespra_channels::InboundMessage;
use vespra_core::{AgentBinding, Config, ResponseMode};

/// Outcome of [`admit`]: either drop the event or enqueue it onto the
/// resolved agent's (agent_id, channel_id) worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Drop,
    Enqueue { agent_id: String, must_reply: bool },
}

/// `OnMessage` steps 1-4 (§4.1), as a pure function independent of worker
/// lifecycle. Step 5 (inbox lookup/push, overflow policy) is the
/// Supervisor's job once this returns `Enqueue`.
pub fn admit(config: &Config, msg: &InboundMessage) -> Decision {
    if msg.author_is_self {
        return Decision::Drop;
    }
    if msg.text.trim().is_empty() && msg.attachments.is_empty() {
        return Decision::Drop;
    }

    let Some(agent) = resolve_agent(config, msg) else {
        return Decision::Drop;
    };

    if agent.ignore_user_ids.iter().any(|id| id == &msg.author_id) {
        return Decision::Drop;
    }

    let mode = config.resolve_response_mode(&agent.server_id, &msg.channel_id);
    let addressed = is_addressed(agent, msg);

    match (mode, addressed) {
        (ResponseMode::None, _) => Decision::Drop,
        (ResponseMode::Mention, true) => Decision::Enqueue { agent_id: agent.agent_id.clone(), must_reply: true },
        (ResponseMode::Mention, false) => Decision::Drop,
        (ResponseMode::All, _) => Decision::Enqueue { agent_id: agent.agent_id.clone(), must_reply: true },
        (ResponseMode::Smart, addressed) => Decision::Enqueue { agent_id: agent.agent_id.clone(), must_reply: addressed },
    }
}

/// Agent owning `evt.server_id`; for DMs with no owner, fall back to the
/// configured default agent (§4.1 step 2).
fn resolve_agent<'a>(config: &'a Config, msg: &InboundMessage) -> Option<&'a AgentBinding> {
    config
        .find_agent(&msg.server_id)
        .or_else(|| if msg.is_dm { config.default_agent() } else { None })
}

/// `addressed := is_dm ∨ mention_of_self ∨ reply_to_self ∨ bot_display_name_in_text`
fn is_addressed(agent: &AgentBinding, msg: &InboundMessage) -> bool {
    if msg.is_dm || msg.reply_to_is_self {
        return true;
    }
    if mention_of_self(agent, &msg.mentions) {
        return true;
    }
    let name = agent.display_name.as_deref().unwrap_or(&agent.agent_id);
    contains_word_boundary(&msg.text, name)
}

fn mention_of_self(agent: &AgentBinding, mentions: &[String]) -> bool {
    mentions.iter().any(|m| m == &agent.agent_id || agent.display_name.as_deref() == Some(m.as_str()))
}

/// Case-insensitive, word-boundary substring search with no regex
/// dependency: a match only counts if the characters immediately before
/// and after it (if any) are not alphanumeric/underscore.
fn contains_word_boundary(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    let haystack_lower = haystack.to_lowercase();
    let needle_lower = needle.to_lowercase();

    let mut search_from = 0;
    while let Some(rel_pos) = haystack_lower[search_from..].find(&needle_lower) {
        let pos = search_from + rel_pos;
        let end = pos + needle_lower.len();

        let before_ok = haystack_lower[..pos].chars().next_back().map(|c| !is_word_char(c)).unwrap_or(true);
        let after_ok = haystack_lower[end..].chars().next().map(|c| !is_word_char(c)).unwrap_or(true);

        if before_ok && after_ok {
            return true;
        }
        search_from = pos + needle_lower.len();
    }
    false
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vespra_core::ChannelOverride;

    fn binding() -> AgentBinding {
        AgentBinding {
            agent_id: "vespra-main".to_string(),
            server_id: "srv-1".to_string(),
            token: "tok".to_string(),
            display_name: Some("Vespra".to_string()),
            soul_file: None,
            db_path: None,
            ignore_user_ids: vec!["blocked-user".to_string()],
            response_mode: None,
            language: None,
            provider: None,
            model: None,
            channels: vec![],
        }
    }

    fn config_with_mode(mode: ResponseMode) -> Config {
        let mut config = Config::default();
        config.response.default_mode = mode;
        config.agents = vec![binding()];
        config
    }

    fn msg(text: &str) -> InboundMessage {
        InboundMessage {
            author_id: "user-1".to_string(),
            author_display_name: Some("User".to_string()),
            author_is_self: false,
            server_id: "srv-1".to_string(),
            channel_id: "chan-1".to_string(),
            is_dm: false,
            text: text.to_string(),
            mentions: Vec::new(),
            reply_to: None,
            reply_to_is_self: false,
            attachments: Vec::new(),
            message_id: Some("m1".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn mention_mode_enqueues_only_when_addressed_by_name() {
        let config = config_with_mode(ResponseMode::Mention);

        let addressed = msg("hey Vespra, what time is it?");
        assert_eq!(
            admit(&config, &addressed),
            Decision::Enqueue { agent_id: "vespra-main".to_string(), must_reply: true }
        );

        let unaddressed = msg("just chatting about nothing");
        assert_eq!(admit(&config, &unaddressed), Decision::Drop);
    }

    #[test]
    fn name_match_respects_word_boundaries() {
        let config = config_with_mode(ResponseMode::Mention);
        // "Vesprawn" should not match "Vespra".
        let not_addressed = msg("I caught a Vesprawn today");
        assert_eq!(admit(&config, &not_addressed), Decision::Drop);
    }

    #[test]
    fn smart_mode_flags_must_reply_by_addressed() {
        let config = config_with_mode(ResponseMode::Smart);

        let dm = InboundMessage { is_dm: true, ..msg("hello") };
        assert_eq!(
            admit(&config, &dm),
            Decision::Enqueue { agent_id: "vespra-main".to_string(), must_reply: true }
        );

        let ambient = msg("anyone want lunch");
        assert_eq!(
            admit(&config, &ambient),
            Decision::Enqueue { agent_id: "vespra-main".to_string(), must_reply: false }
        );
    }

    #[test]
    fn none_mode_always_drops() {
        let config = config_with_mode(ResponseMode::None);
        let dm = InboundMessage { is_dm: true, ..msg("hello") };
        assert_eq!(admit(&config, &dm), Decision::Drop);
    }

    #[test]
    fn drops_self_authored_and_empty_messages() {
        let config = config_with_mode(ResponseMode::All);
        let from_self = InboundMessage { author_is_self: true, ..msg("hello") };
        assert_eq!(admit(&config, &from_self), Decision::Drop);

        let empty = msg("   ");
        assert_eq!(admit(&config, &empty), Decision::Drop);
    }

    #[test]
    fn drops_ignored_users() {
        let config = config_with_mode(ResponseMode::All);
        let ignored = InboundMessage { author_id: "blocked-user".to_string(), ..msg("hello") };
        assert_eq!(admit(&config, &ignored), Decision::Drop);
    }

    #[test]
    fn unowned_non_dm_drops_even_with_default_agent() {
        let mut config = config_with_mode(ResponseMode::All);
        config.default_agent_id = Some("vespra-main".to_string());
        let unowned = InboundMessage { server_id: "unknown-srv".to_string(), ..msg("hello") };
        assert_eq!(admit(&config, &unowned), Decision::Drop);
    }

    #[test]
    fn unowned_dm_routes_to_default_agent() {
        let mut config = config_with_mode(ResponseMode::Smart);
        config.default_agent_id = Some("vespra-main".to_string());
        let dm = InboundMessage { server_id: "unknown-srv".to_string(), is_dm: true, ..msg("hello") };
        assert_eq!(
            admit(&config, &dm),
            Decision::Enqueue { agent_id: "vespra-main".to_string(), must_reply: true }
        );
    }

    #[test]
    fn channel_override_takes_precedence_over_global_default() {
        let mut config = config_with_mode(ResponseMode::None);
        config.agents[0].channels.push(ChannelOverride {
            channel_id: "chan-1".to_string(),
            response_mode: Some(ResponseMode::All),
            language: None,
            provider: None,
            model: None,
        });
        let any_text = msg("whatever");
        assert_eq!(
            admit(&config, &any_text),
            Decision::Enqueue { agent_id: "vespra-main".to_string(), must_reply: true }
        );
    }
}
