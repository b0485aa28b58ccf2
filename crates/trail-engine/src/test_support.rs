//! In-memory collaborators shared by the engine's unit tests.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use trail_core::{ActionRecord, ActionId, EventRecord, NewAction, SessionId, SessionRecord};
use trail_store::{Scored, Storage, StoreError};

use crate::error::EngineError;
use crate::vcs::{Commit, VcsClient};

#[derive(Default)]
pub(crate) struct MemoryStorage {
    pub events: Mutex<Vec<EventRecord>>,
    pub actions: Mutex<Vec<ActionRecord>>,
    pub sessions: Mutex<Vec<SessionRecord>>,
    pub similarity_queries: Mutex<Vec<String>>,
    pub fail_event_path: Option<String>,
    pub event_delay: Option<Duration>,
    pub fail_similarity: bool,
    pub fail_create_session: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_paths(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.file_path.clone()).collect()
    }

    pub fn session(&self, id: &SessionId) -> Option<SessionRecord> {
        self.sessions.lock().iter().find(|s| &s.id == id).cloned()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn log_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        if let Some(delay) = self.event_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_event_path.as_deref() == Some(event.file_path.as_str()) {
            return Err(StoreError::NotFound(format!("rejected {}", event.file_path)));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn add_action(&self, action: NewAction) -> Result<ActionRecord, StoreError> {
        let record = ActionRecord {
            id: ActionId::new(),
            session_id: action.session_id,
            timestamp: action.timestamp,
            description: action.description,
            diff: action.diff,
            files: action.files,
            embedding: vec![0.0; 4],
        };
        self.actions.lock().push(record.clone());
        Ok(record)
    }

    async fn create_session(&self, summary: &str, project: &str) -> Result<SessionRecord, StoreError> {
        if self.fail_create_session {
            return Err(StoreError::NotFound("session table unavailable".into()));
        }
        let record = SessionRecord {
            id: SessionId::new(),
            timestamp: chrono::Utc::now(),
            summary: summary.to_string(),
            embedding: vec![0.0; 4],
            project: project.to_string(),
            event_count: 0,
        };
        self.sessions.lock().push(record.clone());
        Ok(record)
    }

    async fn update_session_summary(
        &self,
        id: &SessionId,
        summary: &str,
        embedding: Vec<f32>,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        session.summary = summary.to_string();
        session.embedding = embedding;
        Ok(())
    }

    async fn get_recent_events(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self.events.lock().iter().rev().take(limit).cloned().collect())
    }

    async fn get_similar_sessions(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<Scored<SessionRecord>>, StoreError> {
        self.similarity_queries.lock().push(query.to_string());
        if self.fail_similarity {
            return Err(StoreError::NotFound("vector index offline".into()));
        }
        Ok(self
            .sessions
            .lock()
            .iter()
            .take(k)
            .map(|s| Scored { item: s.clone(), similarity: 1.0 })
            .collect())
    }

    async fn get_similar_actions(
        &self,
        _query: &str,
        k: usize,
    ) -> Result<Vec<Scored<ActionRecord>>, StoreError> {
        Ok(self
            .actions
            .lock()
            .iter()
            .take(k)
            .map(|a| Scored { item: a.clone(), similarity: 1.0 })
            .collect())
    }

    async fn get_last_active_file(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .events
            .lock()
            .iter()
            .rev()
            .find(|e| e.event_type.touches_active_file())
            .map(|e| e.file_path.clone()))
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.session(id))
    }

    async fn get_actions_for_session(&self, id: &SessionId) -> Result<Vec<ActionRecord>, StoreError> {
        Ok(self
            .actions
            .lock()
            .iter()
            .filter(|a| &a.session_id == id)
            .cloned()
            .collect())
    }
}

/// VCS double whose branch can be switched mid-test.
pub(crate) struct StaticVcs {
    pub branch: Mutex<String>,
    pub commits: Vec<Commit>,
    pub changes: Vec<String>,
    pub diff: String,
}

impl StaticVcs {
    pub fn on_branch(branch: &str) -> Self {
        Self {
            branch: Mutex::new(branch.to_string()),
            commits: Vec::new(),
            changes: Vec::new(),
            diff: String::new(),
        }
    }

    pub fn switch_to(&self, branch: &str) {
        *self.branch.lock() = branch.to_string();
    }
}

#[async_trait]
impl VcsClient for StaticVcs {
    async fn current_branch(&self) -> String {
        self.branch.lock().clone()
    }

    async fn recent_commits(&self, n: usize) -> Vec<Commit> {
        self.commits.iter().take(n).cloned().collect()
    }

    async fn uncommitted_changes(&self) -> Vec<String> {
        self.changes.clone()
    }

    async fn diff(&self) -> String {
        self.diff.clone()
    }

    async fn show_commit(&self, hash: &str) -> Option<Commit> {
        self.commits.iter().find(|c| c.hash == hash).cloned()
    }

    async fn commit_diff(&self, hash: &str) -> String {
        if self.commits.iter().any(|c| c.hash == hash) {
            self.diff.clone()
        } else {
            String::new()
        }
    }

    async fn create_branch(&self, name: &str) -> Result<(), EngineError> {
        self.switch_to(name);
        Ok(())
    }

    async fn commit(&self, _message: &str, _files: &[String]) -> Result<String, EngineError> {
        Ok("0000000".into())
    }
}
