pub mod event;
pub mod extraction;
pub mod inbox;
pub mod prompt;
pub mod turn;
pub mod worker;

pub use event::{InboundEvent, SupervisorSignal};
pub use inbox::Inbox;
pub use worker::{spawn, ChannelAgent, SpawnParams, WorkerHandle};

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;
    use vespra_channels::{Channel, ChannelError, ChannelStatus, InboundMessage, OutboundMessage, TypingHandle};
    use vespra_core::{Config, ConfigStore};
    use vespra_llm::{ChatResponse, LlmGateway, LlmProvider, ProviderError};
    use vespra_memory::MemoryStore;
    use vespra_tools::ToolRegistry;

    use crate::event::{InboundEvent, SupervisorSignal};
    use crate::worker::{spawn, SpawnParams};

    struct RecordingChannel {
        sent: Arc<AsyncMutex<Vec<OutboundMessage>>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "test"
        }
        async fn connect(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
            self.sent.lock().await.push(msg.clone());
            Ok(())
        }
        async fn react(&self, _channel_id: &str, _message_id: &str, _emoji: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn start_typing(&self, _channel_id: &str) -> Result<TypingHandle, ChannelError> {
            Ok(TypingHandle::noop())
        }
        fn status(&self) -> ChannelStatus {
            ChannelStatus::Connected
        }
    }

    struct EmptyProvider;

    #[async_trait]
    impl LlmProvider for EmptyProvider {
        fn name(&self) -> &str {
            "empty"
        }
        async fn send(&self, _req: &vespra_llm::ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: String::new(),
                model: "test-model".to_string(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "stop".to_string(),
                tool_calls: Vec::new(),
            })
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![0.0; 8])
        }
    }

    /// Always answers with the same non-empty text and no tool calls, so
    /// tests can assert on send counts without depending on the empty-output
    /// edge case `EmptyProvider` exercises.
    struct CannedReplyProvider {
        calls: Arc<AsyncMutex<usize>>,
    }

    #[async_trait]
    impl LlmProvider for CannedReplyProvider {
        fn name(&self) -> &str {
            "canned"
        }
        async fn send(&self, _req: &vespra_llm::ChatRequest) -> Result<ChatResponse, ProviderError> {
            *self.calls.lock().await += 1;
            Ok(ChatResponse {
                content: "Got it!".to_string(),
                model: "test-model".to_string(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "stop".to_string(),
                tool_calls: Vec::new(),
            })
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![0.0; 8])
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.agent.coalesce_debounce_ms = 20;
        config.agent.coalesce_max_wait_ms = 200;
        config.agent.idle_timeout_minutes = 60;
        config.memory.embedding_dim = 8;
        config
    }

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage {
            author_id: "user-1".to_string(),
            author_display_name: Some("User".to_string()),
            author_is_self: false,
            server_id: "server-1".to_string(),
            channel_id: "channel-1".to_string(),
            is_dm: false,
            text: text.to_string(),
            mentions: Vec::new(),
            reply_to: None,
            reply_to_is_self: false,
            attachments: Vec::new(),
            message_id: Some(uuid::Uuid::now_v7().to_string()),
            timestamp: chrono::Utc::now(),
        }
    }

    async fn spawn_test_worker(sent: Arc<AsyncMutex<Vec<OutboundMessage>>>, gateway: Arc<LlmGateway>) -> super::WorkerHandle {
        let config = test_config();
        let config_store = Arc::new(ConfigStore::from_config(config));
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let memory = Arc::new(MemoryStore::new(conn, Arc::clone(&gateway), 8, 0.95, 0.5).unwrap());
        let tools = Arc::new(ToolRegistry::default_tools(None, "vespra-test/1.0".to_string()));
        let channel: Arc<dyn Channel + Send + Sync> = Arc::new(RecordingChannel { sent });

        spawn(SpawnParams {
            agent_id: "agent-1".to_string(),
            server_id: "server-1".to_string(),
            channel_id: "channel-1".to_string(),
            soul: "You are a test companion.".to_string(),
            channel,
            config_store,
            gateway,
            memory,
            tools,
        })
    }

    #[tokio::test]
    async fn smart_mode_silence_sends_nothing() {
        let sent = Arc::new(AsyncMutex::new(Vec::new()));
        let gateway = Arc::new(LlmGateway::from_providers(Some(Box::new(EmptyProvider)), None));
        let handle = spawn_test_worker(Arc::clone(&sent), gateway).await;

        handle.inbox.push(SupervisorSignal::Inbound(InboundEvent {
            message: inbound("just chatting, nothing addressed"),
            must_reply: false,
        }));

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.inbox.push(SupervisorSignal::Shutdown);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn coalesces_burst_into_one_turn() {
        let sent = Arc::new(AsyncMutex::new(Vec::new()));
        let calls = Arc::new(AsyncMutex::new(0usize));
        let gateway = Arc::new(LlmGateway::from_providers(
            Some(Box::new(CannedReplyProvider { calls: Arc::clone(&calls) })),
            None,
        ));
        let handle = spawn_test_worker(Arc::clone(&sent), gateway).await;

        for text in ["first", "second", "third"] {
            handle.inbox.push(SupervisorSignal::Inbound(InboundEvent {
                message: inbound(text),
                must_reply: true,
            }));
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.inbox.push(SupervisorSignal::Shutdown);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Three coalesced messages collapse into a single LLM call and a
        // single outbound reply, not one per message.
        assert_eq!(*calls.lock().await, 1);
        assert_eq!(sent.lock().await.len(), 1);
    }

    async fn spawn_test_worker_with_config(
        sent: Arc<AsyncMutex<Vec<OutboundMessage>>>,
        gateway: Arc<LlmGateway>,
        config: Config,
    ) -> super::WorkerHandle {
        let config_store = Arc::new(ConfigStore::from_config(config));
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let memory = Arc::new(MemoryStore::new(conn, Arc::clone(&gateway), 8, 0.95, 0.5).unwrap());
        let tools = Arc::new(ToolRegistry::default_tools(None, "vespra-test/1.0".to_string()));
        let channel: Arc<dyn Channel + Send + Sync> = Arc::new(RecordingChannel { sent });

        spawn(SpawnParams {
            agent_id: "agent-1".to_string(),
            server_id: "server-1".to_string(),
            channel_id: "channel-1".to_string(),
            soul: "You are a test companion.".to_string(),
            channel,
            config_store,
            gateway,
            memory,
            tools,
        })
    }

    #[tokio::test]
    async fn worker_marks_itself_retired_on_idle_eviction() {
        let sent = Arc::new(AsyncMutex::new(Vec::new()));
        let gateway = Arc::new(LlmGateway::from_providers(Some(Box::new(EmptyProvider)), None));
        let mut config = test_config();
        config.agent.idle_timeout_minutes = 0;

        let handle = spawn_test_worker_with_config(sent, gateway, config).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.retired.load(Ordering::SeqCst));
    }
}
