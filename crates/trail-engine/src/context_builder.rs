//! Assembles the bounded prompt context for LLM analysis.
//!
//! Live state is trimmed to fixed windows and blended with the sessions most
//! similar to what the developer is doing now. Retrieval is best-effort: any
//! storage problem yields an empty history rather than an error.

use std::collections::BTreeMap;

use tracing::warn;
use trail_llm::{AnalysisContext, CursorPosition, PastSession};
use trail_store::Storage;

use crate::truncate::{prefix_chars, truncate_chars};

pub const MAX_COMMITS: usize = 10;
pub const MAX_ERRORS: usize = 5;
pub const MAX_DIFF_CHARS: usize = 8000;
pub const RAG_TOP_K: usize = 3;
const QUERY_DIFF_CHARS: usize = 100;

/// Unbounded live state gathered by the orchestrator.
#[derive(Clone, Debug, Default)]
pub struct RawContextInput {
    pub branch: String,
    pub active_file: Option<String>,
    pub cursor: Option<CursorPosition>,
    /// Newest first.
    pub recent_commits: Vec<String>,
    pub uncommitted_changes: Vec<String>,
    pub open_files: Vec<String>,
    pub errors: Vec<String>,
    pub diff: Option<String>,
    pub edit_history: Vec<String>,
    pub file_contents: BTreeMap<String, String>,
}

pub struct ContextBuilder;

impl ContextBuilder {
    pub async fn build(input: &RawContextInput, storage: Option<&dyn Storage>) -> AnalysisContext {
        let related_files = input
            .open_files
            .iter()
            .filter(|f| input.active_file.as_deref() != Some(f.as_str()))
            .cloned()
            .collect();

        let relevant_past_sessions = match (storage, Self::similarity_query(input)) {
            (Some(storage), Some(query)) => Self::past_sessions(storage, &query).await,
            _ => Vec::new(),
        };

        AnalysisContext {
            branch: input.branch.clone(),
            active_file: input.active_file.clone(),
            cursor: input.cursor,
            recent_commits: input.recent_commits.iter().take(MAX_COMMITS).cloned().collect(),
            uncommitted_changes: input.uncommitted_changes.clone(),
            related_files,
            errors: input.errors.iter().take(MAX_ERRORS).cloned().collect(),
            diff: input.diff.as_deref().map(|d| truncate_chars(d, MAX_DIFF_CHARS)),
            edit_history: input.edit_history.clone(),
            file_contents: input.file_contents.clone(),
            relevant_past_sessions,
        }
    }

    /// `Working on <active>` when a file is active, else the head of the diff.
    fn similarity_query(input: &RawContextInput) -> Option<String> {
        if let Some(active) = input.active_file.as_deref().filter(|a| !a.is_empty()) {
            return Some(format!("Working on {active}"));
        }
        input
            .diff
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(|d| prefix_chars(d, QUERY_DIFF_CHARS))
    }

    async fn past_sessions(storage: &dyn Storage, query: &str) -> Vec<PastSession> {
        match storage.get_similar_sessions(query, RAG_TOP_K).await {
            Ok(scored) => scored
                .into_iter()
                .map(|s| PastSession {
                    session_id: s.item.id.to_string(),
                    summary: s.item.summary,
                    timestamp: s.item.timestamp.to_rfc3339(),
                    project: s.item.project,
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "similar session lookup failed, continuing without history");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStorage;

    fn input() -> RawContextInput {
        RawContextInput {
            branch: "main".into(),
            active_file: Some("src/auth.rs".into()),
            recent_commits: (0..15).map(|i| format!("c{i}")).collect(),
            errors: (0..8).map(|i| format!("e{i}")).collect(),
            open_files: vec!["src/auth.rs".into(), "src/db.rs".into()],
            diff: Some("d".repeat(9000)),
            ..RawContextInput::default()
        }
    }

    async fn seeded() -> MemoryStorage {
        let storage = MemoryStorage::new();
        for summary in ["Switched from main to auth", "Idle for 40 minutes", "manual_end", "extra"] {
            let s = storage.create_session("Session started", "trail").await.unwrap();
            storage.update_session_summary(&s.id, summary, vec![]).await.unwrap();
        }
        storage
    }

    #[tokio::test]
    async fn bounds_live_state() {
        let ctx = ContextBuilder::build(&input(), None).await;
        assert_eq!(ctx.recent_commits.len(), MAX_COMMITS);
        assert_eq!(ctx.recent_commits[0], "c0");
        assert_eq!(ctx.errors, vec!["e0", "e1", "e2", "e3", "e4"]);
        assert_eq!(ctx.related_files, vec!["src/db.rs"]);
        let diff = ctx.diff.unwrap();
        assert!(diff.starts_with(&"d".repeat(MAX_DIFF_CHARS)));
        assert!(diff.contains("[truncated: 9000 chars -> 8000 chars]"));
        assert!(ctx.relevant_past_sessions.is_empty());
    }

    #[tokio::test]
    async fn retrieves_top_three_for_active_file() {
        let storage = seeded().await;
        let ctx = ContextBuilder::build(&input(), Some(&storage)).await;
        assert_eq!(ctx.relevant_past_sessions.len(), RAG_TOP_K);
        assert_eq!(ctx.relevant_past_sessions[0].summary, "Switched from main to auth");
        assert_eq!(*storage.similarity_queries.lock(), vec!["Working on src/auth.rs"]);
    }

    #[tokio::test]
    async fn falls_back_to_diff_prefix_query() {
        let storage = seeded().await;
        let raw = RawContextInput {
            active_file: None,
            diff: Some(format!("{}{}", "+".repeat(100), "tail")),
            ..input()
        };
        ContextBuilder::build(&raw, Some(&storage)).await;
        assert_eq!(*storage.similarity_queries.lock(), vec!["+".repeat(100)]);
    }

    #[tokio::test]
    async fn no_query_without_active_file_or_diff() {
        let storage = seeded().await;
        let raw = RawContextInput {
            active_file: None,
            diff: None,
            ..input()
        };
        let ctx = ContextBuilder::build(&raw, Some(&storage)).await;
        assert!(ctx.relevant_past_sessions.is_empty());
        assert!(storage.similarity_queries.lock().is_empty());
    }

    #[tokio::test]
    async fn retrieval_failure_yields_empty_history() {
        let storage = MemoryStorage {
            fail_similarity: true,
            ..MemoryStorage::new()
        };
        let ctx = ContextBuilder::build(&input(), Some(&storage)).await;
        assert!(ctx.relevant_past_sessions.is_empty());
        assert_eq!(ctx.branch, "main");
    }

    #[tokio::test]
    async fn building_twice_is_identical() {
        let storage = seeded().await;
        let a = ContextBuilder::build(&input(), Some(&storage)).await;
        let b = ContextBuilder::build(&input(), Some(&storage)).await;
        assert_eq!(a, b);
    }
}
