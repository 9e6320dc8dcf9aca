//! Cross-module `Save`/dedup behavior (§4.4): saving near-duplicate content
//! within a server reuses the existing record instead of inserting a new
//! one, while distinct content and distinct servers both insert. Exercises
//! `vespra-memory` through its public API only, backed by a fake embedding
//! provider that maps known phrases to fixed vectors.

use std::sync::Arc;

use async_trait::async_trait;
use vespra_core::Config;
use vespra_llm::{ChatResponse, LlmGateway, LlmProvider, ProviderError};
use vespra_memory::{MemoryStore, SearchFilter};

/// Returns a near-identical vector for paraphrases of "likes pizza" and an
/// orthogonal one for anything else, so dedup outcomes are deterministic.
struct FakeEmbedProvider;

#[async_trait]
impl LlmProvider for FakeEmbedProvider {
    fn name(&self) -> &str {
        "fake"
    }
    async fn send(&self, _req: &vespra_llm::ChatRequest) -> Result<ChatResponse, ProviderError> {
        unimplemented!("dedup test only exercises embeddings")
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.to_lowercase().contains("pizza") {
            Ok(vec![1.0, 0.01, 0.0])
        } else {
            Ok(vec![0.0, 0.0, 1.0])
        }
    }
}

fn test_store(dedup_threshold: f32) -> MemoryStore {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let gateway = Arc::new(LlmGateway::from_providers(Some(Box::new(FakeEmbedProvider)), None));
    MemoryStore::new(conn, gateway, 3, dedup_threshold, 0.3).unwrap()
}

/// `embed()` routes to the `openrouter` provider slot whenever
/// `llm.openrouter_key` is set, regardless of which provider actually
/// backs it — this test's gateway only wires up that slot.
fn test_config() -> Config {
    let mut config = Config::default();
    config.llm.openrouter_key = Some("fake-key".to_string());
    config
}

#[tokio::test]
async fn near_duplicate_save_reuses_existing_record() {
    let store = test_store(0.9);
    let config = test_config();

    let first = store.save(&config, "server-1", None, "the user likes pizza", None).await.unwrap();
    let second = store
        .save(&config, "server-1", None, "the user really likes pizza a lot", None)
        .await
        .unwrap();

    assert_eq!(first, second);

    let matches = store
        .search(
            "server-1",
            &SearchFilter {
                query: Some("pizza".to_string()),
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(matches.len(), 1);
}

#[tokio::test]
async fn distinct_content_inserts_separately() {
    let store = test_store(0.9);
    let config = test_config();

    let first = store.save(&config, "server-1", None, "the user likes pizza", None).await.unwrap();
    let second = store
        .save(&config, "server-1", None, "the user's favorite color is blue", None)
        .await
        .unwrap();

    assert_ne!(first, second);

    let matches = store
        .search(
            "server-1",
            &SearchFilter {
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(matches.len(), 2);
}

#[tokio::test]
async fn dedup_is_scoped_per_server() {
    let store = test_store(0.9);
    let config = test_config();

    let first = store.save(&config, "server-1", None, "the user likes pizza", None).await.unwrap();
    let second = store.save(&config, "server-2", None, "the user likes pizza", None).await.unwrap();

    assert_ne!(first, second, "dedup must not cross server_id boundaries");
}
