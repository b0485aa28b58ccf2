//! `trail watch`: filesystem notifications in, sessions and analyses out.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use trail_engine::{
    changed_lines, DefinitionScanner, EditDebouncer, EventCapture, IngestionConfig, IngestionQueue,
    LineRange, Orchestrator, PipelineEvent, SessionDetector, SessionEvent, VcsClient,
};

use crate::app::App;

const IGNORED_DIRS: &[&str] = &[".git", "target", "node_modules", "dist", "build", "__pycache__", ".venv"];
const REFLOG: &str = ".git/logs/HEAD";

struct Watch {
    app: App,
    queue: Arc<IngestionQueue>,
    detector: Arc<SessionDetector>,
    capture: EventCapture,
    orchestrator: Orchestrator,
    /// Files modified since the last observed commit.
    touched: BTreeSet<String>,
    /// Last seen content per file, for locating the changed lines of an edit.
    snapshots: HashMap<String, String>,
    commits: CommitTracker,
}

/// Remembers the newest commit already reported from the reflog. A single
/// commit usually produces several reflog notifications.
#[derive(Default)]
struct CommitTracker {
    last_hash: Option<String>,
}

impl CommitTracker {
    /// `(hash, message)` when the reflog's last line is a commit not seen before.
    fn observe(&mut self, reflog: &str) -> Option<(String, String)> {
        let (hash, message) = reflog.lines().last().and_then(parse_reflog_commit)?;
        if self.last_hash.as_deref() == Some(hash.as_str()) {
            return None;
        }
        self.last_hash = Some(hash.clone());
        Some((hash, message))
    }
}

pub async fn run(app: App) -> Result<()> {
    let ingestion = &app.settings.ingestion;
    let queue = Arc::new(IngestionQueue::new(
        app.storage.clone(),
        IngestionConfig {
            flush_interval: Duration::from_millis(ingestion.flush_interval_ms),
            batch_size: ingestion.batch_size,
        },
    ));
    let debounce = Duration::from_millis(ingestion.debounce_ms);
    queue.start();

    let detector = Arc::new(app.session_detector());
    detector.events().subscribe(log_session_event);
    let session_id = detector.start().await.context("failed to open session")?;
    detector.start_idle_checker();

    let symbols = Arc::new(DefinitionScanner::new(app.root.clone()));
    let debouncer = EditDebouncer::new(debounce, queue.clone(), symbols, detector.subscribe());
    let capture = EventCapture::new(queue.clone(), debouncer, detector.clone());
    let orchestrator = app.orchestrator();
    orchestrator.events().subscribe(log_pipeline_event);

    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })
    .context("failed to create file watcher")?;
    watcher
        .watch(&app.root, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {}", app.root.display()))?;

    let mut pipeline_ticker = match app.settings.pipeline.interval_secs {
        0 => None,
        secs => {
            let period = Duration::from_secs(secs);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(ticker)
        }
    };

    let mut commits = CommitTracker::default();
    if let Ok(reflog) = tokio::fs::read_to_string(app.root.join(REFLOG)).await {
        // Commits made before the watch started are not reported.
        commits.observe(&reflog);
    }

    info!(root = %app.root.display(), session_id = %session_id, "watching workspace");
    let mut watch = Watch {
        app,
        queue,
        detector,
        capture,
        orchestrator,
        touched: BTreeSet::new(),
        snapshots: HashMap::new(),
        commits,
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                break;
            }
            Some(res) = rx.recv() => match res {
                Ok(event) => watch.handle(event).await,
                Err(e) => warn!(error = %e, "file watcher error"),
            },
            _ = next_tick(&mut pipeline_ticker) => watch.run_pipeline().await,
        }
    }

    drop(watcher);
    watch.shutdown().await;
    Ok(())
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Watch {
    async fn handle(&mut self, event: Event) {
        for path in &event.paths {
            if path.ends_with(REFLOG) {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    self.on_reflog_change(path).await;
                }
                continue;
            }
            let Some(rel) = relevant_path(&self.app.root, path) else {
                continue;
            };
            match event.kind {
                EventKind::Create(CreateKind::File | CreateKind::Any) => {
                    self.app.workspace.open_file(&rel);
                    if let Ok(content) = tokio::fs::read_to_string(path).await {
                        self.snapshots.insert(rel.clone(), content);
                    }
                    self.capture.on_file_open(&rel).await;
                }
                EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
                    self.app.workspace.set_active(&rel, None);
                    let ranges = self.edited_lines(&rel, path).await;
                    self.capture.on_file_change(&rel, &ranges).await;
                    self.touched.insert(rel);
                }
                EventKind::Remove(_) => {
                    self.app.workspace.close_file(&rel);
                    self.snapshots.remove(&rel);
                    self.capture.on_file_close(&rel).await;
                }
                _ => {}
            }
        }
    }

    /// Lines that differ from the previous snapshot of `rel`. Empty when the
    /// file was not seen before or cannot be read as text.
    async fn edited_lines(&mut self, rel: &str, path: &Path) -> Vec<LineRange> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => {
                debug!(file = rel, error = %e, "edited file unreadable");
                return Vec::new();
            }
        };
        let range = self
            .snapshots
            .get(rel)
            .and_then(|before| changed_lines(before, &content));
        self.snapshots.insert(rel.to_string(), content);
        range.into_iter().collect()
    }

    async fn on_reflog_change(&mut self, reflog: &Path) {
        let content = match tokio::fs::read_to_string(reflog).await {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "reflog unreadable");
                return;
            }
        };
        let Some((hash, message)) = self.commits.observe(&content) else {
            return;
        };
        let touched: Vec<String> = std::mem::take(&mut self.touched).into_iter().collect();
        let files = match self.app.vcs.show_commit(&hash).await {
            Some(commit) if !commit.files.is_empty() => commit.files,
            _ => touched,
        };
        let diff = self.app.vcs.commit_diff(&hash).await;
        self.capture.on_git_commit(&hash, &message, &files, &diff).await;
    }

    async fn run_pipeline(&self) {
        match self.orchestrator.run().await {
            Ok(result) => info!(
                files = result.summary.total_files,
                issues = result.summary.total_issues,
                risk = %result.summary.overall_risk_level,
                "scheduled analysis finished"
            ),
            Err(e) => warn!(error = %e, "scheduled analysis failed"),
        }
    }

    async fn shutdown(self) {
        self.capture.dispose();
        self.detector.dispose();
        if let Err(e) = self.detector.end_session().await {
            warn!(error = %e, "failed to finalize session on shutdown");
        }
        self.queue.stop().await;
        // Flush what is left; anything still failing is dropped.
        while !self.queue.is_empty() {
            let outcome = self.queue.process_queue().await;
            if outcome.taken == 0 {
                break;
            }
        }
        info!("watch stopped");
    }
}

/// Root-relative path for workspace files, `None` for ignored locations.
fn relevant_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let ignored = rel.components().any(|c| match c {
        Component::Normal(part) => part.to_str().is_some_and(|p| IGNORED_DIRS.contains(&p)),
        _ => false,
    });
    if ignored || rel.as_os_str().is_empty() {
        return None;
    }
    Some(rel.to_string_lossy().replace('\\', "/"))
}

/// `(hash, message)` from a reflog line recording a commit.
fn parse_reflog_commit(line: &str) -> Option<(String, String)> {
    let (header, message) = line.split_once('\t')?;
    let hash = header.split_whitespace().nth(1)?;
    let (kind, message) = message.split_once(": ")?;
    if !kind.starts_with("commit") {
        return None;
    }
    Some((hash.to_string(), message.trim().to_string()))
}

fn log_pipeline_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Failed { error } => warn!(error = %error, "pipeline failed"),
        PipelineEvent::BatchFallback { error } => warn!(error = %error, "batch analysis fell back"),
        PipelineEvent::FileAnalyzed { file_path, fix } => {
            debug!(file = %file_path, fix = ?fix, "file analyzed")
        }
        other => debug!(event = ?other, "pipeline event"),
    }
}

fn log_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::Finalized { session_id, summary, .. } => {
            info!(session_id = %session_id, summary = %summary, "session closed")
        }
        SessionEvent::Started { session_id } => info!(session_id = %session_id, "session opened"),
        other => debug!(event = ?other, "session event"),
    }
}
