use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::context::ToolContext;
use crate::error::ToolError;
use crate::tool::{Tool, ToolResult};

const SEARCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_COUNT: usize = 5;
const MAX_COUNT: usize = 10;

/// Asynchronous: returns immediately with a placeholder and delivers the
/// real result later through the worker's `internal_inbox` (§4.3, §9). At
/// most one search may be in flight per worker (§5's CAS guard).
pub struct WebSearchTool {
    api_key: Option<String>,
    user_agent: String,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, user_agent: String) -> Self {
        Self { api_key, user_agent }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns immediately; the real result arrives as a \
         follow-up system message once the search completes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "count": { "type": "integer", "description": "Result count, 1-10, default 5" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> ToolResult {
        let query = match input.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.to_string(),
            _ => return ToolResult::error("missing or empty 'query' parameter"),
        };
        let count = input
            .get("count")
            .and_then(|v| v.as_u64())
            .map(|c| (c as usize).clamp(1, MAX_COUNT))
            .unwrap_or(DEFAULT_COUNT);

        let Some(api_key) = self.api_key.clone() else {
            return ToolResult::error("web search is not configured (no API key)");
        };

        if ctx
            .search_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return ToolResult::success("a search is already running");
        }

        let internal_inbox = ctx.internal_inbox.clone();
        let search_in_progress = ctx.search_in_progress.clone();
        let user_agent = self.user_agent.clone();
        let query_for_task = query.clone();

        // Detached background context (§5): not joined, not bound to the
        // turn's own timeout.
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                Duration::from_secs(SEARCH_TIMEOUT_SECS),
                brave_search(&query_for_task, count, &api_key, &user_agent),
            )
            .await;

            let message = match outcome {
                Ok(Ok(results)) => format!("web_search_results for '{query_for_task}': {results}"),
                Ok(Err(e)) => {
                    warn!(error = %e, "web_search background task failed");
                    format!("web_search_results for '{query_for_task}': search failed: {e}")
                }
                Err(_) => {
                    warn!("web_search background task timed out");
                    format!("web_search_results for '{query_for_task}': search timed out")
                }
            };

            if internal_inbox.send(message).await.is_err() {
                debug!("worker gone before web_search result could be delivered");
            }
            search_in_progress.store(false, Ordering::SeqCst);
        });

        ToolResult::success("search started")
    }
}

async fn brave_search(query: &str, count: usize, api_key: &str, user_agent: &str) -> Result<String, ToolError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
        .user_agent(user_agent.to_string())
        .build()
        .map_err(|e| ToolError::Request(e.to_string()))?;

    let url = format!(
        "https://api.search.brave.com/res/v1/web/search?q={}&count={}",
        urlencode(query),
        count
    );

    let resp = client
        .get(&url)
        .header("Accept", "application/json")
        .header("X-Subscription-Token", api_key)
        .send()
        .await
        .map_err(|e| ToolError::Request(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(ToolError::UpstreamStatus(resp.status().as_u16()));
    }

    let body: Value = resp.json().await.map_err(|e| ToolError::Parse(e.to_string()))?;
    let results = body
        .get("web")
        .and_then(|w| w.get("results"))
        .and_then(|r| r.as_array())
        .map(|arr| arr.as_slice())
        .unwrap_or(&[]);

    if results.is_empty() {
        return Ok("(no results)".to_string());
    }

    let rendered: Vec<String> = results
        .iter()
        .take(count)
        .enumerate()
        .map(|(i, r)| {
            let title = r.get("title").and_then(|v| v.as_str()).unwrap_or("(no title)");
            let url = r.get("url").and_then(|v| v.as_str()).unwrap_or("");
            let desc = r.get("description").and_then(|v| v.as_str()).unwrap_or("");
            format!("{}. {} — {}\n{}", i + 1, title, url, desc)
        })
        .collect();

    Ok(rendered.join("\n\n"))
}

fn urlencode(s: &str) -> String {
    let mut out = String::new();
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(c),
            ' ' => out.push('+'),
            c => {
                for byte in c.to_string().as_bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use tokio::sync::mpsc;
    use vespra_core::Config;

    use super::*;
    use crate::context::ToolContext;

    struct NoopChannel;

    #[async_trait]
    impl vespra_channels::Channel for NoopChannel {
        fn name(&self) -> &str {
            "noop"
        }
        async fn connect(&mut self) -> Result<(), vespra_channels::ChannelError> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<(), vespra_channels::ChannelError> {
            Ok(())
        }
        async fn send(&self, _msg: &vespra_channels::OutboundMessage) -> Result<(), vespra_channels::ChannelError> {
            Ok(())
        }
        async fn react(&self, _channel_id: &str, _message_id: &str, _emoji: &str) -> Result<(), vespra_channels::ChannelError> {
            Ok(())
        }
        async fn start_typing(&self, _channel_id: &str) -> Result<vespra_channels::TypingHandle, vespra_channels::ChannelError> {
            Ok(vespra_channels::TypingHandle::noop())
        }
        fn status(&self) -> vespra_channels::ChannelStatus {
            vespra_channels::ChannelStatus::Connected
        }
    }

    fn test_ctx() -> (ToolContext, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let gateway = Arc::new(vespra_llm::LlmGateway::from_config(&Config::default()));
        let memory = Arc::new(vespra_memory::MemoryStore::new(conn, gateway, 3, 0.85, 0.35).unwrap());
        let ctx = ToolContext {
            channel: Arc::new(NoopChannel),
            channel_id: "chan-1".to_string(),
            triggering_message_id: None,
            memory,
            config: Arc::new(Config::default()),
            server_id: "srv".to_string(),
            user_id: None,
            internal_inbox: tx,
            search_in_progress: Arc::new(AtomicBool::new(false)),
            replied: Arc::new(AtomicBool::new(false)),
        };
        (ctx, rx)
    }

    #[tokio::test]
    async fn returns_error_without_api_key() {
        let (ctx, _rx) = test_ctx();
        let tool = WebSearchTool::new(None, "vespra/test".to_string());
        let result = tool.execute(&ctx, json!({"query": "rust async"})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn second_call_while_in_flight_reports_already_running() {
        let (ctx, _rx) = test_ctx();
        ctx.search_in_progress.store(true, Ordering::SeqCst);
        let tool = WebSearchTool::new(Some("fake-key".to_string()), "vespra/test".to_string());
        let result = tool.execute(&ctx, json!({"query": "rust async"})).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "a search is already running");
    }
}
