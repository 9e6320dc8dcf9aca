use vespra_core::ResponseMode;
use vespra_memory::RecallHit;

/// Build the per-turn system prompt: soul + resolved language + recalled
/// memories + current time + a mode-specific directive (§4.2 step 3).
pub fn build_system_prompt(soul: &str, language: Option<&str>, recalls: &[RecallHit], mode: ResponseMode) -> String {
    let mut out = String::new();

    if !soul.trim().is_empty() {
        out.push_str(soul.trim());
        out.push_str("\n\n");
    }

    if let Some(lang) = language {
        out.push_str(&format!("Respond in {lang} unless the user writes in another language.\n\n"));
    }

    if !recalls.is_empty() {
        out.push_str("## Things you remember\n\n");
        for hit in recalls {
            out.push_str("- ");
            out.push_str(&hit.record.content);
            out.push('\n');
        }
        out.push('\n');
    }

    out.push_str(&format!("Current time: {}\n\n", chrono::Utc::now().to_rfc3339()));
    out.push_str(mode_directive(mode));
    out
}

fn mode_directive(mode: ResponseMode) -> &'static str {
    match mode {
        ResponseMode::None => {
            "You are not configured to respond in this channel; this turn should not normally occur."
        }
        ResponseMode::Mention => "You were explicitly addressed. Respond directly.",
        ResponseMode::All => "Respond to this message.",
        ResponseMode::Smart => {
            "You were not necessarily addressed directly. Use the `reply` tool only if a \
             response genuinely adds value to the conversation; otherwise produce no tool \
             calls and no text."
        }
    }
}
