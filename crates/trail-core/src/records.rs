//! Durable record types and the in-memory ingestion task.
//!
//! Records are structured: `metadata`, `diff` and `files` travel as native
//! values and are serialized once, at the storage boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ActionId, EventId, SessionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FileOpen,
    FileEdit,
    FileClose,
    GitCommit,
    FunctionEdit,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        Self::FileOpen,
        Self::FileEdit,
        Self::FileClose,
        Self::GitCommit,
        Self::FunctionEdit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileOpen => "file_open",
            Self::FileEdit => "file_edit",
            Self::FileClose => "file_close",
            Self::GitCommit => "git_commit",
            Self::FunctionEdit => "function_edit",
        }
    }

    /// Whether the event marks a file the developer was actively working in.
    pub fn touches_active_file(&self) -> bool {
        matches!(self, Self::FileOpen | Self::FileEdit | Self::FunctionEdit)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file_open" => Ok(Self::FileOpen),
            "file_edit" => Ok(Self::FileEdit),
            "file_close" => Ok(Self::FileClose),
            "git_commit" => Ok(Self::GitCommit),
            "function_edit" => Ok(Self::FunctionEdit),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// One observed editor or VCS activity. Append-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub file_path: String,
    pub metadata: serde_json::Value,
}

impl EventRecord {
    /// Build a record stamped with the current time.
    pub fn new(event_type: EventType, file_path: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self::at(Utc::now(), event_type, file_path, metadata)
    }

    pub fn at(
        timestamp: DateTime<Utc>,
        event_type: EventType,
        file_path: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            timestamp,
            event_type,
            file_path: file_path.into(),
            metadata,
        }
    }
}

/// An action waiting to be persisted. Storage assigns the embedding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewAction {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub diff: String,
    pub files: Vec<String>,
}

impl NewAction {
    pub fn new(session_id: SessionId, description: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            session_id,
            timestamp: Utc::now(),
            description: description.into(),
            diff: String::new(),
            files,
        }
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = diff.into();
        self
    }

    /// Text used to compute the action's embedding.
    pub fn embedding_text(&self) -> String {
        if self.files.is_empty() {
            self.description.clone()
        } else {
            format!("{}\n{}", self.description, self.files.join(" "))
        }
    }
}

/// A semantically summarized unit of work. Immutable after creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub diff: String,
    pub files: Vec<String>,
    pub embedding: Vec<f32>,
}

/// One bounded span of developer activity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub project: String,
    pub event_count: u64,
}

/// Queued work for the ingestion flush loop. Never persisted directly.
#[derive(Clone, Debug)]
pub enum IngestionTask {
    Event(EventRecord),
    Action(NewAction),
}

impl IngestionTask {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Action(_) => "action",
        }
    }

    /// Short distinguishing label for failure logs.
    pub fn label(&self) -> String {
        match self {
            Self::Event(e) => format!("{} {}", e.event_type, e.file_path),
            Self::Action(a) => a.description.chars().take(80).collect(),
        }
    }
}
