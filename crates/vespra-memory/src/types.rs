use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One durable memory record, scoped to a single `server_id` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub server_id: String,
    pub user_id: Option<String>,
    pub content: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub last_recalled_at: Option<DateTime<Utc>>,
}

/// A `Recall` hit: the record plus its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct RecallHit {
    pub record: MemoryRecord,
    pub similarity: f32,
}

/// Filters for the management-UI `Search` operation (§4.4) — substring and
/// metadata only, no embedding involved.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub query: Option<String>,
    pub user_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}
