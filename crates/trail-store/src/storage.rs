use async_trait::async_trait;
use serde::Serialize;
use trail_core::{ActionRecord, EventRecord, NewAction, SessionId, SessionRecord};

use crate::error::StoreError;

/// A record paired with its cosine similarity to the query.
#[derive(Clone, Debug, Serialize)]
pub struct Scored<T> {
    pub item: T,
    pub similarity: f32,
}

/// Persistence for events, actions and sessions, with similarity search.
///
/// Constructed once and shared as `Arc<dyn Storage>`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn log_event(&self, event: &EventRecord) -> Result<(), StoreError>;

    /// Embeds the action text, then persists it. Embedding failure stores a
    /// zero vector rather than failing the insert.
    async fn add_action(&self, action: NewAction) -> Result<ActionRecord, StoreError>;

    async fn create_session(&self, summary: &str, project: &str) -> Result<SessionRecord, StoreError>;

    async fn update_session_summary(
        &self,
        id: &SessionId,
        summary: &str,
        embedding: Vec<f32>,
    ) -> Result<(), StoreError>;

    /// Newest first; ties keep insertion order (later insert first).
    async fn get_recent_events(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError>;

    async fn get_similar_sessions(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<Scored<SessionRecord>>, StoreError>;

    async fn get_similar_actions(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<Scored<ActionRecord>>, StoreError>;

    async fn get_last_active_file(&self) -> Result<Option<String>, StoreError>;

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError>;

    async fn get_actions_for_session(&self, id: &SessionId) -> Result<Vec<ActionRecord>, StoreError>;
}
