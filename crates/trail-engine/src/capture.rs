//! Adapter from editor and VCS callbacks to ingestion tasks.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use trail_core::{EventRecord, EventType, IngestionTask, NewAction};

use crate::context_builder::MAX_DIFF_CHARS;
use crate::debounce::EditDebouncer;
use crate::ingestion::IngestionQueue;
use crate::session::SessionDetector;
use crate::truncate::truncate_chars;

/// Changed line span reported by the editor, zero-based and inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// Span of `after` that differs from `before`, `None` when the texts agree
/// line for line. A pure deletion reports the line where text was removed.
pub fn changed_lines(before: &str, after: &str) -> Option<LineRange> {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();
    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    if prefix == old.len() && prefix == new.len() {
        return None;
    }
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let start = prefix as u32;
    let end = (new.len() - suffix).saturating_sub(1).max(prefix) as u32;
    Some(LineRange { start, end })
}

pub struct EventCapture {
    queue: Arc<IngestionQueue>,
    debouncer: EditDebouncer,
    detector: Arc<SessionDetector>,
}

impl EventCapture {
    pub fn new(queue: Arc<IngestionQueue>, debouncer: EditDebouncer, detector: Arc<SessionDetector>) -> Self {
        Self {
            queue,
            debouncer,
            detector,
        }
    }

    pub async fn on_file_open(&self, path: &str) {
        self.queue.enqueue(IngestionTask::Event(EventRecord::new(
            EventType::FileOpen,
            path,
            serde_json::Value::Null,
        )));
        self.detector.record_activity(path).await;
    }

    pub async fn on_file_close(&self, path: &str) {
        self.queue.enqueue(IngestionTask::Event(EventRecord::new(
            EventType::FileClose,
            path,
            serde_json::Value::Null,
        )));
        self.detector.touch_at(Utc::now());
    }

    /// Edits are debounced per file; the first changed line is kept for
    /// function attribution.
    pub async fn on_file_change(&self, path: &str, ranges: &[LineRange]) {
        let first_line = ranges.iter().map(|r| r.start).min();
        self.debouncer.notify_edit(path, first_line);
        self.detector.record_activity(path).await;
    }

    pub async fn on_active_editor_change(&self, path: Option<&str>) {
        match path {
            Some(path) => {
                self.detector.record_activity(path).await;
            }
            None => self.detector.touch_at(Utc::now()),
        }
    }

    /// `diff` is the commit's patch; it is stored on the action, truncated.
    pub async fn on_git_commit(&self, hash: &str, message: &str, files: &[String], diff: &str) {
        self.queue.enqueue(IngestionTask::Event(EventRecord::new(
            EventType::GitCommit,
            files.first().cloned().unwrap_or_default(),
            json!({ "hash": hash, "message": message, "files": files }),
        )));
        match self.detector.current_session() {
            Some(session_id) => self.queue.enqueue(IngestionTask::Action(
                NewAction::new(session_id, format!("Committed: {message}"), files.to_vec())
                    .with_diff(truncate_chars(diff, MAX_DIFF_CHARS)),
            )),
            None => debug!(hash, "commit observed with no active session"),
        }
        self.detector.touch_at(Utc::now());
    }

    /// Cancel pending debounced edits.
    pub fn dispose(&self) {
        self.debouncer.dispose();
    }
}
