use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};
use trail_core::{ActionRecord, EventRecord, NewAction, SessionId, SessionRecord};
use trail_llm::LlmClient;

use crate::actions::ActionRepo;
use crate::database::Database;
use crate::error::StoreError;
use crate::events::EventRepo;
use crate::sessions::SessionRepo;
use crate::storage::{Scored, Storage};
use crate::vector;

/// SQLite-backed [`Storage`] with brute-force cosine search.
pub struct SqliteStorage {
    events: EventRepo,
    sessions: SessionRepo,
    actions: ActionRepo,
    embedder: Arc<dyn LlmClient>,
}

impl SqliteStorage {
    pub fn new(db: Database, embedder: Arc<dyn LlmClient>) -> Self {
        Self {
            events: EventRepo::new(db.clone()),
            sessions: SessionRepo::new(db.clone()),
            actions: ActionRepo::new(db),
            embedder,
        }
    }

    /// Embedding for stored records; zero vector when the provider fails.
    async fn embed_or_zero(&self, text: &str) -> Vec<f32> {
        let dims = self.embedder.embedding_dimensions();
        match self.embedder.get_embedding(text).await {
            Ok(v) if v.len() == dims => v,
            Ok(v) => {
                warn!(expected = dims, got = v.len(), "embedding dimension mismatch, storing zero vector");
                vec![0.0; dims]
            }
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "embedding failed, storing zero vector");
                vec![0.0; dims]
            }
        }
    }

    /// Query embedding; failures propagate since a zero query ranks nothing.
    async fn embed_query(&self, query: &str) -> Result<Option<Vec<f32>>, StoreError> {
        if query.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.embedder.get_embedding(query).await?))
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn log_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        self.events.insert(event)
    }

    async fn add_action(&self, action: NewAction) -> Result<ActionRecord, StoreError> {
        let embedding = self.embed_or_zero(&action.embedding_text()).await;
        let record = self.actions.insert(action, embedding)?;
        debug!(action_id = %record.id, "action stored");
        Ok(record)
    }

    async fn create_session(&self, summary: &str, project: &str) -> Result<SessionRecord, StoreError> {
        let embedding = self.embed_or_zero(summary).await;
        self.sessions.create(summary, project, embedding, Utc::now())
    }

    async fn update_session_summary(
        &self,
        id: &SessionId,
        summary: &str,
        embedding: Vec<f32>,
    ) -> Result<(), StoreError> {
        let dims = self.embedder.embedding_dimensions();
        let embedding = if embedding.len() == dims {
            embedding
        } else {
            warn!(session_id = %id, expected = dims, got = embedding.len(), "summary embedding has wrong size, storing zero vector");
            vec![0.0; dims]
        };
        self.sessions.update_summary(id, summary, &embedding)
    }

    async fn get_recent_events(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError> {
        self.events.recent(limit)
    }

    async fn get_similar_sessions(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<Scored<SessionRecord>>, StoreError> {
        let Some(q) = self.embed_query(query).await? else {
            return Ok(Vec::new());
        };
        let candidates = self
            .sessions
            .all()?
            .into_iter()
            .map(|s| {
                let embedding = s.embedding.clone();
                (s, embedding)
            })
            .collect();
        Ok(vector::rank(&q, candidates, k)
            .into_iter()
            .map(|(item, similarity)| Scored { item, similarity })
            .collect())
    }

    async fn get_similar_actions(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<Scored<ActionRecord>>, StoreError> {
        let Some(q) = self.embed_query(query).await? else {
            return Ok(Vec::new());
        };
        let candidates = self
            .actions
            .all()?
            .into_iter()
            .map(|a| {
                let embedding = a.embedding.clone();
                (a, embedding)
            })
            .collect();
        Ok(vector::rank(&q, candidates, k)
            .into_iter()
            .map(|(item, similarity)| Scored { item, similarity })
            .collect())
    }

    async fn get_last_active_file(&self) -> Result<Option<String>, StoreError> {
        self.events.last_active_file()
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        self.sessions.get(id)
    }

    async fn get_actions_for_session(&self, id: &SessionId) -> Result<Vec<ActionRecord>, StoreError> {
        self.actions.for_session(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trail_core::EventType;
    use trail_llm::MockLlmClient;

    const DIMS: usize = 64;

    fn storage_with(llm: MockLlmClient) -> SqliteStorage {
        SqliteStorage::new(Database::in_memory().unwrap(), Arc::new(llm))
    }

    fn storage() -> SqliteStorage {
        storage_with(MockLlmClient::new(DIMS))
    }

    #[tokio::test]
    async fn add_action_embeds_once_with_fixed_dims() {
        let llm = Arc::new(MockLlmClient::new(DIMS));
        let store = SqliteStorage::new(Database::in_memory().unwrap(), llm.clone());
        let sess = store.create_session("Session started", "trail").await.unwrap();
        let calls_before = llm.embedding_calls();

        let action = store
            .add_action(NewAction::new(sess.id.clone(), "Modified function: login", vec!["auth.rs".into()]))
            .await
            .unwrap();
        assert_eq!(action.embedding.len(), DIMS);
        assert_eq!(llm.embedding_calls(), calls_before + 1);

        let stored = store.get_actions_for_session(&sess.id).await.unwrap();
        assert_eq!(stored[0].embedding, action.embedding);
    }

    #[tokio::test]
    async fn embedding_failure_stores_zero_vector() {
        let store = storage_with(MockLlmClient::new(DIMS).failing_embeddings());
        let sess = store.create_session("Session started", "p").await.unwrap();
        assert_eq!(sess.embedding, vec![0.0; DIMS]);

        let action = store
            .add_action(NewAction::new(sess.id.clone(), "Committed: wip", vec![]))
            .await
            .unwrap();
        assert_eq!(action.embedding, vec![0.0; DIMS]);
    }

    #[tokio::test]
    async fn similar_sessions_rank_by_content() {
        let store = storage();
        let auth = store.create_session("Session started", "p").await.unwrap();
        let db = store.create_session("Session started", "p").await.unwrap();
        let llm = MockLlmClient::new(DIMS);
        store
            .update_session_summary(&auth.id, "Worked on auth login rate limiting",
                llm.get_embedding("Worked on auth login rate limiting").await.unwrap())
            .await
            .unwrap();
        store
            .update_session_summary(&db.id, "Tuned database pool",
                llm.get_embedding("Tuned database pool").await.unwrap())
            .await
            .unwrap();

        let hits = store.get_similar_sessions("Working on auth login", 3).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].item.id, auth.id);
        assert!(hits[0].similarity >= hits[1].similarity);

        let top1 = store.get_similar_sessions("login", 1).await.unwrap();
        assert_eq!(top1.len(), 1);
    }

    #[tokio::test]
    async fn similar_actions_and_empty_query() {
        let store = storage();
        let sess = SessionId::from_raw("sess_x");
        store.add_action(NewAction::new(sess.clone(), "Modified function: parse_config", vec![])).await.unwrap();
        store.add_action(NewAction::new(sess, "Committed: bump deps", vec![])).await.unwrap();

        let hits = store.get_similar_actions("parse_config", 1).await.unwrap();
        assert_eq!(hits[0].item.description, "Modified function: parse_config");
        assert!(store.get_similar_actions("   ", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn similarity_query_failure_is_an_error() {
        let store = storage_with(MockLlmClient::new(DIMS).failing_embeddings());
        let err = store.get_similar_sessions("anything", 3).await.unwrap_err();
        assert!(matches!(err, StoreError::Embedding(_)));
    }

    #[tokio::test]
    async fn finalize_refreshes_event_count() {
        let store = storage();
        let sess = store.create_session("Session started", "p").await.unwrap();
        for desc in ["Modified function: a", "Modified function: b"] {
            store.add_action(NewAction::new(sess.id.clone(), desc, vec![])).await.unwrap();
        }
        store.update_session_summary(&sess.id, "manual_end", vec![0.0; DIMS]).await.unwrap();
        let updated = store.get_session(&sess.id).await.unwrap().unwrap();
        assert_eq!(updated.event_count, 2);
        assert_eq!(updated.summary, "manual_end");
    }

    #[tokio::test]
    async fn wrong_size_summary_embedding_is_zeroed() {
        let store = storage();
        let sess = store.create_session("Session started", "p").await.unwrap();
        store.update_session_summary(&sess.id, "x", vec![1.0; 3]).await.unwrap();
        let updated = store.get_session(&sess.id).await.unwrap().unwrap();
        assert_eq!(updated.embedding, vec![0.0; DIMS]);
    }

    #[tokio::test]
    async fn events_and_last_active_file() {
        let store = storage();
        store
            .log_event(&EventRecord::new(EventType::FileOpen, "src/lib.rs", serde_json::Value::Null))
            .await
            .unwrap();
        store
            .log_event(&EventRecord::new(EventType::FileClose, "src/other.rs", serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(store.get_recent_events(10).await.unwrap().len(), 2);
        assert_eq!(store.get_last_active_file().await.unwrap().as_deref(), Some("src/lib.rs"));
    }
}
