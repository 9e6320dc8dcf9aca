use std::time::Duration;

use tracing::{instrument, warn};
use vespra_core::Config;

use crate::openai_compat::OpenAiCompatProvider;
use crate::provider::{ChatOptions, ChatRequest, ChatResponse, ContentPart, LlmProvider, Message, ProviderError, Role};

/// Backoff schedule for retryable failures (§4.5): up to 3 attempts total,
/// waiting 500ms then 1000ms between them.
const RETRY_BACKOFF_MS: [u64; 2] = [500, 1000];

/// One method per capability (`Chat`, `Embed`), provider/model routing,
/// vision fallback, and the bounded-retry contract from §4.5.
pub struct LlmGateway {
    openrouter: Option<Box<dyn LlmProvider>>,
    glm: Option<Box<dyn LlmProvider>>,
}

impl LlmGateway {
    pub fn from_config(config: &Config) -> Self {
        let openrouter = config.llm.openrouter_key.clone().map(|key| {
            Box::new(OpenAiCompatProvider::new(
                "openrouter",
                key,
                config.llm.openrouter_base_url.clone(),
                config
                    .llm
                    .embedding_base_url
                    .clone()
                    .unwrap_or_else(|| config.llm.openrouter_base_url.clone()),
                config.llm.embedding_model.clone(),
                config.llm.request_timeout_seconds,
            )) as Box<dyn LlmProvider>
        });
        let glm = config.llm.glm_key.clone().map(|key| {
            Box::new(OpenAiCompatProvider::new(
                "glm",
                key,
                config.llm.glm_base_url.clone(),
                config
                    .llm
                    .embedding_base_url
                    .clone()
                    .unwrap_or_else(|| config.llm.glm_base_url.clone()),
                config.llm.embedding_model.clone(),
                config.llm.request_timeout_seconds,
            )) as Box<dyn LlmProvider>
        });
        Self { openrouter, glm }
    }

    /// Construct directly from boxed providers, bypassing config. Used by
    /// this crate's own tests to substitute stub providers for the
    /// retry/routing contract, and by other crates' worker-level tests that
    /// need a `LlmGateway` without live network credentials.
    pub fn from_providers(openrouter: Option<Box<dyn LlmProvider>>, glm: Option<Box<dyn LlmProvider>>) -> Self {
        Self { openrouter, glm }
    }

    fn provider_for(&self, name: &str) -> Result<&dyn LlmProvider, ProviderError> {
        match name {
            "glm" => self
                .glm
                .as_deref()
                .ok_or_else(|| ProviderError::Unavailable("glm not configured".to_string())),
            _ => self
                .openrouter
                .as_deref()
                .ok_or_else(|| ProviderError::Unavailable("openrouter not configured".to_string())),
        }
    }

    /// Resolve provider/model for this request, applying vision routing
    /// (§4.5): if the last message carries an image part and a vision model
    /// is configured, that wins over the resolved provider/model unless the
    /// caller set an explicit per-request provider.
    fn resolve_route<'a>(
        &self,
        config: &'a Config,
        messages: &[Message],
        opts: &ChatOptions,
    ) -> (String, String) {
        let has_image = messages
            .last()
            .map(|m| m.content.iter().any(|p| matches!(p, ContentPart::Image { .. })))
            .unwrap_or(false);

        if has_image && opts.provider.is_empty() {
            if let Some(vision_model) = &config.llm.vision_model {
                let vision_base = config
                    .llm
                    .vision_base_url
                    .clone()
                    .unwrap_or_else(|| config.llm.openrouter_base_url.clone());
                let provider = if vision_base == config.llm.glm_base_url {
                    "glm"
                } else {
                    "openrouter"
                };
                return (provider.to_string(), vision_model.clone());
            }
        }

        let provider = if !opts.provider.is_empty() {
            opts.provider.clone()
        } else {
            "openrouter".to_string()
        };
        let model = if !opts.model.is_empty() {
            opts.model.clone()
        } else {
            config.llm.model.clone()
        };
        (provider, model)
    }

    /// Strip image parts from messages when no vision model is configured,
    /// replacing them with a text note so the request remains valid (§4.5).
    fn strip_images_if_unsupported(&self, config: &Config, mut messages: Vec<Message>) -> Vec<Message> {
        if config.llm.vision_model.is_some() {
            return messages;
        }
        for m in messages.iter_mut() {
            let image_count = m
                .content
                .iter()
                .filter(|p| matches!(p, ContentPart::Image { .. }))
                .count();
            if image_count == 0 {
                continue;
            }
            m.content.retain(|p| !matches!(p, ContentPart::Image { .. }));
            m.content.push(ContentPart::Text {
                text: format!("[{image_count} image(s) attached — vision not supported]"),
            });
        }
        messages
    }

    #[instrument(skip(self, config, messages, tools))]
    pub async fn chat(
        &self,
        config: &Config,
        messages: Vec<Message>,
        system: String,
        tools: Vec<crate::provider::ToolDefinition>,
        opts: ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let (provider_name, model) = self.resolve_route(config, &messages, &opts);
        let messages = self.strip_images_if_unsupported(config, messages);
        let provider = self.provider_for(&provider_name)?;

        let req = ChatRequest {
            model,
            system,
            messages,
            max_tokens: 4096,
            tools,
            extra_tools: opts.extra_tools,
        };

        self.send_with_retry(provider, &req).await
    }

    pub async fn embed(&self, config: &Config, text: &str) -> Result<Vec<f32>, ProviderError> {
        let provider_name = if config.llm.openrouter_key.is_some() {
            "openrouter"
        } else {
            "glm"
        };
        let provider = self.provider_for(provider_name)?;
        provider.embed(text).await
    }

    /// Up to 3 attempts with backoff `[500ms, 1000ms]`. Retry on network
    /// error, HTTP 429, HTTP 5xx. Any other failure returns after exactly
    /// one request.
    async fn send_with_retry(
        &self,
        provider: &dyn LlmProvider,
        req: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let mut last_err = None;
        for attempt in 0..=RETRY_BACKOFF_MS.len() {
            match provider.send(req).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && attempt < RETRY_BACKOFF_MS.len() => {
                    warn!(attempt, error = %e, "chat request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS[attempt])).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(ProviderError::Parse("retry loop exited without a response".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;

    struct StubProvider {
        calls: Arc<AtomicUsize>,
        fail_times: usize,
        fail_with: fn() -> ProviderError,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                return Err((self.fail_with)());
            }
            Ok(ChatResponse {
                content: "ok".to_string(),
                model: "stub-model".to_string(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
                tool_calls: Vec::new(),
            })
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![0.0])
        }
    }

    fn req() -> ChatRequest {
        ChatRequest {
            model: "stub-model".to_string(),
            system: String::new(),
            messages: Vec::new(),
            max_tokens: 16,
            tools: Vec::new(),
            extra_tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn retries_transient_failure_and_eventually_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = StubProvider {
            calls: calls.clone(),
            fail_times: 2,
            fail_with: || ProviderError::Api { status: 503, message: String::new() },
        };
        let gateway = LlmGateway::from_providers(Some(Box::new(provider)), None);
        let resp = gateway.send_with_retry(gateway.provider_for("openrouter").unwrap(), &req()).await;
        assert!(resp.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = StubProvider {
            calls: calls.clone(),
            fail_times: usize::MAX,
            fail_with: || ProviderError::Api { status: 500, message: String::new() },
        };
        let gateway = LlmGateway::from_providers(Some(Box::new(provider)), None);
        let resp = gateway.send_with_retry(gateway.provider_for("openrouter").unwrap(), &req()).await;
        assert!(resp.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_4xx_makes_exactly_one_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = StubProvider {
            calls: calls.clone(),
            fail_times: usize::MAX,
            fail_with: || ProviderError::Api { status: 400, message: String::new() },
        };
        let gateway = LlmGateway::from_providers(Some(Box::new(provider)), None);
        let resp = gateway.send_with_retry(gateway.provider_for("openrouter").unwrap(), &req()).await;
        assert!(resp.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn vision_routes_to_glm_when_vision_base_matches_glm() {
        let mut config = Config::default();
        config.llm.vision_model = Some("vision-model".to_string());
        config.llm.vision_base_url = Some(config.llm.glm_base_url.clone());
        let gateway = LlmGateway::from_providers(None, None);
        let messages = vec![Message {
            role: Role::User,
            content: vec![ContentPart::Image { url: "http://example.test/a.png".to_string() }],
        }];
        let (provider, model) = gateway.resolve_route(&config, &messages, &ChatOptions::default());
        assert_eq!(provider, "glm");
        assert_eq!(model, "vision-model");
    }

    #[test]
    fn strips_images_when_no_vision_model_configured() {
        let config = Config::default();
        let gateway = LlmGateway::from_providers(None, None);
        let messages = vec![Message {
            role: Role::User,
            content: vec![ContentPart::Image { url: "http://example.test/a.png".to_string() }],
        }];
        let stripped = gateway.strip_images_if_unsupported(&config, messages);
        assert_eq!(stripped.len(), 1);
        assert!(matches!(stripped[0].content[0], ContentPart::Text { .. }));
    }
}
