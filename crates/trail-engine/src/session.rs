//! Session boundary detection.
//!
//! The detector keeps exactly one active session per workspace and rolls it
//! over on a branch change, on a drift in the area of the codebase being
//! touched, or after a long idle gap. Rollover finalizes the old record in
//! place (summary plus embedding), creates the next one, and only then
//! publishes the new id. Any failure leaves the old id current.

use std::collections::VecDeque;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trail_core::{EventBus, SessionId};
use trail_llm::LlmClient;
use trail_store::Storage;

use crate::error::EngineError;
use crate::vcs::{VcsClient, UNKNOWN_BRANCH};

pub const SESSION_STARTED_SUMMARY: &str = "Session started";
pub const MANUAL_END_SUMMARY: &str = "manual_end";

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub project: String,
    pub idle_timeout: Duration,
    pub idle_check_interval: Duration,
    pub min_session_age: Duration,
    /// Drift needs strictly more than this many recent files.
    pub min_recent_files: usize,
    pub recent_file_window: usize,
    pub ignored_extensions: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            idle_timeout: Duration::from_secs(30 * 60),
            idle_check_interval: Duration::from_secs(5 * 60),
            min_session_age: Duration::from_secs(5 * 60),
            min_recent_files: 3,
            recent_file_window: 5,
            ignored_extensions: [".log", ".txt", ".md", ".json", ".yaml", ".yml"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl SessionConfig {
    fn is_ignored(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        self.ignored_extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }
}

/// Groups a file path into a coarse "area" of the codebase.
pub trait AreaPolicy: Send + Sync {
    fn area(&self, path: &str) -> String;
}

/// Area = the first `depth` directory-or-file segments relative to `root`.
pub struct PathPrefixPolicy {
    root: PathBuf,
    depth: usize,
}

impl PathPrefixPolicy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            depth: 2,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }
}

impl AreaPolicy for PathPrefixPolicy {
    fn area(&self, path: &str) -> String {
        let path = Path::new(path);
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .take(self.depth)
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundaryReason {
    BranchChange { from: String, to: String },
    PatternDrift { from: String, to: String },
    Idle { minutes: i64 },
    Manual,
}

impl BoundaryReason {
    pub fn summary(&self) -> String {
        match self {
            Self::BranchChange { from, to } | Self::PatternDrift { from, to } => {
                format!("Switched from {from} to {to}")
            }
            Self::Idle { minutes } => format!("Idle for {minutes} minutes"),
            Self::Manual => MANUAL_END_SUMMARY.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Started { session_id: SessionId },
    Finalized { session_id: SessionId, reason: BoundaryReason, summary: String },
    Idle { session_id: SessionId, minutes: i64 },
    Active { session_id: SessionId, path: String },
}

struct State {
    current: Option<SessionId>,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    last_branch: Option<String>,
    recent_files: VecDeque<String>,
}

struct IdleChecker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct DetectorInner {
    config: SessionConfig,
    storage: Arc<dyn Storage>,
    embedder: Arc<dyn LlmClient>,
    vcs: Arc<dyn VcsClient>,
    policy: Box<dyn AreaPolicy>,
    state: Mutex<State>,
    /// Serializes transitions; held across storage awaits.
    transition: tokio::sync::Mutex<()>,
    publisher: watch::Sender<Option<SessionId>>,
    events: EventBus<SessionEvent>,
    idle_checker: Mutex<Option<IdleChecker>>,
}

pub struct SessionDetector {
    inner: Arc<DetectorInner>,
}

impl SessionDetector {
    pub fn new(
        config: SessionConfig,
        storage: Arc<dyn Storage>,
        embedder: Arc<dyn LlmClient>,
        vcs: Arc<dyn VcsClient>,
        policy: Box<dyn AreaPolicy>,
    ) -> Self {
        let (publisher, _) = watch::channel(None);
        let now = Utc::now();
        Self {
            inner: Arc::new(DetectorInner {
                config,
                storage,
                embedder,
                vcs,
                policy,
                state: Mutex::new(State {
                    current: None,
                    started_at: now,
                    last_activity: now,
                    last_branch: None,
                    recent_files: VecDeque::new(),
                }),
                transition: tokio::sync::Mutex::new(()),
                publisher,
                events: EventBus::new(),
                idle_checker: Mutex::new(None),
            }),
        }
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.inner.state.lock().current.clone()
    }

    /// Receiver of the published session id. `None` before `start` and after
    /// a manual end.
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionId>> {
        self.inner.publisher.subscribe()
    }

    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.inner.events
    }

    pub fn recent_files(&self) -> Vec<String> {
        self.inner.state.lock().recent_files.iter().cloned().collect()
    }

    pub async fn start(&self) -> Result<SessionId, EngineError> {
        self.start_at(Utc::now()).await
    }

    /// Open the first session. Returns the current id if one is already open.
    pub async fn start_at(&self, now: DateTime<Utc>) -> Result<SessionId, EngineError> {
        let _transition = self.inner.transition.lock().await;
        if let Some(current) = self.current_session() {
            return Ok(current);
        }
        let branch = self.inner.vcs.current_branch().await;
        let id = self.inner.open_session(now).await?;
        if branch != UNKNOWN_BRANCH {
            self.inner.state.lock().last_branch = Some(branch);
        }
        Ok(id)
    }

    pub async fn record_activity(&self, path: &str) -> Option<BoundaryReason> {
        self.record_activity_at(path, Utc::now()).await
    }

    /// Note activity on `path`, rolling the session over when a boundary is
    /// crossed. Returns the boundary that was applied, if any.
    pub async fn record_activity_at(&self, path: &str, now: DateTime<Utc>) -> Option<BoundaryReason> {
        let _transition = self.inner.transition.lock().await;
        let current = {
            let mut state = self.inner.state.lock();
            state.last_activity = now;
            state.current.clone()
        };
        let current = current?;
        self.inner.events.emit(&SessionEvent::Active {
            session_id: current,
            path: path.to_string(),
        });

        if let Some(reason) = self.inner.branch_change().await {
            if self.inner.rollover_logged(reason.clone(), now).await {
                if let BoundaryReason::BranchChange { to, .. } = &reason {
                    self.inner.state.lock().last_branch = Some(to.clone());
                }
                self.inner.track_file(path);
                return Some(reason);
            }
        }

        if self.inner.config.is_ignored(path) {
            return None;
        }
        if let Some(reason) = self.inner.pattern_drift(path, now) {
            if self.inner.rollover_logged(reason.clone(), now).await {
                self.inner.track_file(path);
                return Some(reason);
            }
            return None;
        }
        self.inner.track_file(path);
        None
    }

    /// Refresh the activity clock without considering boundaries.
    pub fn touch_at(&self, now: DateTime<Utc>) {
        self.inner.state.lock().last_activity = now;
    }

    /// Roll over if the workspace has been quiet longer than the idle timeout.
    pub async fn check_idle_at(&self, now: DateTime<Utc>) -> Option<BoundaryReason> {
        self.inner.check_idle_at(now).await
    }

    /// Finalize the current session with no successor.
    pub async fn end_session(&self) -> Result<(), EngineError> {
        let _transition = self.inner.transition.lock().await;
        if self.current_session().is_none() {
            return Ok(());
        }
        self.inner.rollover(BoundaryReason::Manual, Utc::now()).await
    }

    /// Start the periodic idle check. No-op when already running.
    pub fn start_idle_checker(&self) {
        let mut slot = self.inner.idle_checker.lock();
        if slot.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let period = inner.config.idle_check_interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.check_idle_at(Utc::now()).await;
                    }
                }
            }
        });
        *slot = Some(IdleChecker { cancel, handle });
    }

    /// Stop the idle checker. Safe to call repeatedly.
    pub fn dispose(&self) {
        if let Some(checker) = self.inner.idle_checker.lock().take() {
            checker.cancel.cancel();
            checker.handle.abort();
        }
    }
}

impl Drop for SessionDetector {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl DetectorInner {
    async fn open_session(&self, now: DateTime<Utc>) -> Result<SessionId, EngineError> {
        let record = self
            .storage
            .create_session(SESSION_STARTED_SUMMARY, &self.config.project)
            .await?;
        {
            let mut state = self.state.lock();
            state.current = Some(record.id.clone());
            state.started_at = now;
            state.last_activity = now;
            state.recent_files.clear();
        }
        self.publisher.send_replace(Some(record.id.clone()));
        info!(session_id = %record.id, project = %self.config.project, "session started");
        self.events.emit(&SessionEvent::Started {
            session_id: record.id.clone(),
        });
        Ok(record.id)
    }

    async fn branch_change(&self) -> Option<BoundaryReason> {
        let branch = self.vcs.current_branch().await;
        if branch == UNKNOWN_BRANCH {
            return None;
        }
        let mut state = self.state.lock();
        match &state.last_branch {
            None => {
                state.last_branch = Some(branch);
                None
            }
            Some(previous) if *previous != branch => Some(BoundaryReason::BranchChange {
                from: previous.clone(),
                to: branch,
            }),
            Some(_) => None,
        }
    }

    fn pattern_drift(&self, path: &str, now: DateTime<Utc>) -> Option<BoundaryReason> {
        let state = self.state.lock();
        let age = (now - state.started_at).to_std().unwrap_or_default();
        if age <= self.config.min_session_age || state.recent_files.len() <= self.config.min_recent_files {
            return None;
        }
        let area = self.policy.area(path);
        if state.recent_files.iter().any(|f| self.policy.area(f) == area) {
            return None;
        }
        let from = state
            .recent_files
            .back()
            .map(|f| self.policy.area(f))
            .unwrap_or_default();
        Some(BoundaryReason::PatternDrift { from, to: area })
    }

    fn track_file(&self, path: &str) {
        if self.config.is_ignored(path) {
            return;
        }
        let mut state = self.state.lock();
        state.recent_files.retain(|f| f != path);
        state.recent_files.push_back(path.to_string());
        while state.recent_files.len() > self.config.recent_file_window {
            state.recent_files.pop_front();
        }
    }

    async fn check_idle_at(&self, now: DateTime<Utc>) -> Option<BoundaryReason> {
        let _transition = self.transition.lock().await;
        let (current, last_activity) = {
            let state = self.state.lock();
            (state.current.clone(), state.last_activity)
        };
        let current = current?;
        let gap = (now - last_activity).to_std().unwrap_or_default();
        if gap <= self.config.idle_timeout {
            return None;
        }
        let minutes = (now - last_activity).num_minutes();
        self.events.emit(&SessionEvent::Idle {
            session_id: current,
            minutes,
        });
        let reason = BoundaryReason::Idle { minutes };
        self.rollover_logged(reason.clone(), now).await.then_some(reason)
    }

    async fn rollover_logged(&self, reason: BoundaryReason, now: DateTime<Utc>) -> bool {
        match self.rollover(reason, now).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "session rollover failed, keeping current session");
                false
            }
        }
    }

    /// Caller holds `transition`.
    async fn rollover(&self, reason: BoundaryReason, now: DateTime<Utc>) -> Result<(), EngineError> {
        let Some(old) = self.state.lock().current.clone() else {
            return Ok(());
        };
        let summary = reason.summary();
        let embedding = self.embedder.get_embedding(&summary).await?;
        self.storage.update_session_summary(&old, &summary, embedding).await?;
        info!(session_id = %old, summary = %summary, "session finalized");
        self.events.emit(&SessionEvent::Finalized {
            session_id: old.clone(),
            reason: reason.clone(),
            summary,
        });

        if reason == BoundaryReason::Manual {
            {
                let mut state = self.state.lock();
                state.current = None;
                state.recent_files.clear();
            }
            self.publisher.send_replace(None);
            return Ok(());
        }
        let new_id = self.open_session(now).await?;
        debug!(from = %old, to = %new_id, "session rolled over");
        Ok(())
    }
}
