//! The analysis pipeline.
//!
//! A run collects live workspace state, selects files, lints them, asks the
//! LLM for analysis (one batch call or one call per file), decides what to do
//! with each lint patch, and aggregates a summary. Progress is published on
//! the pipeline event bus.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};
use trail_core::{EventBus, RiskLevel};
use trail_llm::{AnalysisContext, CodeAnalysis, CursorPosition, LintClient, LintResult, LlmClient};
use trail_store::Storage;

use crate::context_builder::{ContextBuilder, RawContextInput, MAX_COMMITS};
use crate::error::EngineError;
use crate::fix_decision::{self, FixAction, FixKind};
use crate::vcs::{Commit, VcsClient};
use crate::workspace::{WorkspaceFile, WorkspaceHost};

const EDIT_HISTORY_LIMIT: usize = 10;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub analyze_all_files: bool,
    pub max_files_to_analyze: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            analyze_all_files: false,
            max_files_to_analyze: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Batch,
    Sequential,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started,
    ContextCollected { files: usize, active_file: Option<String> },
    FilesSelected { count: usize, mode: AnalysisMode },
    BatchFallback { error: String },
    FileAnalyzed { file_path: String, fix: Option<FixKind> },
    Completed { summary: PipelineSummary },
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysisResult {
    pub file_path: String,
    pub lint_result: Option<LintResult>,
    pub llm_analysis: Option<CodeAnalysis>,
    pub errors: Vec<String>,
    pub fix_action: Option<FixAction>,
}

impl FileAnalysisResult {
    pub fn issue_count(&self) -> usize {
        self.lint_result.as_ref().map_or(0, |l| l.warnings.len())
            + self.llm_analysis.as_ref().map_or(0, |a| a.issues.len())
    }

    pub fn risk(&self) -> RiskLevel {
        RiskLevel::worst_of(
            self.lint_result
                .as_ref()
                .map(|l| l.severity)
                .into_iter()
                .chain(self.llm_analysis.as_ref().map(|a| a.risk_level)),
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub total_files: usize,
    pub files_with_issues: usize,
    pub total_issues: usize,
    pub overall_risk_level: RiskLevel,
}

impl PipelineSummary {
    pub fn from_results(results: &[FileAnalysisResult]) -> Self {
        Self {
            total_files: results.len(),
            files_with_issues: results.iter().filter(|r| r.issue_count() > 0).count(),
            total_issues: results.iter().map(FileAnalysisResult::issue_count).sum(),
            overall_risk_level: RiskLevel::worst_of(results.iter().map(FileAnalysisResult::risk)),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub summary: PipelineSummary,
    pub files: Vec<FileAnalysisResult>,
    pub mode: Option<AnalysisMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_summary: Option<String>,
}

/// Live state captured at the start of a run.
#[derive(Clone, Debug, Default)]
pub struct CollectedContext {
    pub root: PathBuf,
    pub branch: String,
    pub recent_commits: Vec<Commit>,
    pub uncommitted_changes: Vec<String>,
    pub diff: String,
    pub files: Vec<WorkspaceFile>,
    pub active_file: Option<String>,
    pub active_content: Option<String>,
    pub cursor: Option<CursorPosition>,
    pub open_files: Vec<String>,
    pub diagnostics: Vec<String>,
    pub edit_history: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedFile {
    pub path: String,
    pub content: String,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    host: Arc<dyn WorkspaceHost>,
    vcs: Arc<dyn VcsClient>,
    lint: Arc<dyn LintClient>,
    llm: Arc<dyn LlmClient>,
    storage: Option<Arc<dyn Storage>>,
    events: EventBus<PipelineEvent>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        host: Arc<dyn WorkspaceHost>,
        vcs: Arc<dyn VcsClient>,
        lint: Arc<dyn LintClient>,
        llm: Arc<dyn LlmClient>,
        storage: Option<Arc<dyn Storage>>,
    ) -> Self {
        Self {
            config,
            host,
            vcs,
            lint,
            llm,
            storage,
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus<PipelineEvent> {
        &self.events
    }

    /// Run the full pipeline once. Only a failure to resolve the workspace
    /// itself is returned as `Err`.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<PipelineResult, EngineError> {
        self.events.emit(&PipelineEvent::Started);
        let collected = match self.collect_context().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "pipeline aborted during context collection");
                self.events.emit(&PipelineEvent::Failed { error: e.to_string() });
                return Err(e);
            }
        };
        self.events.emit(&PipelineEvent::ContextCollected {
            files: collected.files.len(),
            active_file: collected.active_file.clone(),
        });

        let selected = self.select_files(&collected);
        if selected.is_empty() {
            let result = PipelineResult {
                summary: PipelineSummary::default(),
                files: Vec::new(),
                mode: None,
                global_summary: None,
            };
            self.events.emit(&PipelineEvent::Completed {
                summary: result.summary.clone(),
            });
            return Ok(result);
        }

        let mode = if selected.len() > 1 && self.llm.is_ready() {
            AnalysisMode::Batch
        } else {
            AnalysisMode::Sequential
        };
        self.events.emit(&PipelineEvent::FilesSelected {
            count: selected.len(),
            mode,
        });

        let (files, global_summary) = match mode {
            AnalysisMode::Batch => self.analyze_batch(&collected, &selected).await,
            AnalysisMode::Sequential => (self.analyze_sequential(&collected, &selected, None).await, None),
        };

        let summary = PipelineSummary::from_results(&files);
        info!(
            files = summary.total_files,
            issues = summary.total_issues,
            risk = %summary.overall_risk_level,
            "pipeline completed"
        );
        self.events.emit(&PipelineEvent::Completed {
            summary: summary.clone(),
        });
        Ok(PipelineResult {
            summary,
            files,
            mode: Some(mode),
            global_summary,
        })
    }

    /// Gather git state, the workspace snapshot and editor state. Everything
    /// but the workspace root degrades to an empty default.
    pub async fn collect_context(&self) -> Result<CollectedContext, EngineError> {
        let root = self.host.workspace_root()?;

        let (branch, recent_commits, uncommitted_changes, diff) = tokio::join!(
            self.vcs.current_branch(),
            self.vcs.recent_commits(MAX_COMMITS),
            self.vcs.uncommitted_changes(),
            self.vcs.diff(),
        );

        let files = self.host.list_files().await.unwrap_or_else(|e| {
            warn!(error = %e, "workspace listing failed, continuing with no files");
            Vec::new()
        });

        let (mut active_file, mut active_content, mut cursor) = (None, None, None);
        if let Some(doc) = self.host.active_document().await {
            active_file = Some(doc.path);
            active_content = Some(doc.content);
            cursor = doc.cursor;
        } else if let Some(path) = self.last_active_from_history().await {
            active_content = self.host.read_file(&path).await;
            active_file = Some(path);
        }

        let edit_history = self.edit_history().await;
        Ok(CollectedContext {
            root,
            branch,
            recent_commits,
            uncommitted_changes,
            diff,
            files,
            active_file,
            active_content,
            cursor,
            open_files: self.host.open_files().await,
            diagnostics: self.host.diagnostics().await,
            edit_history,
        })
    }

    async fn last_active_from_history(&self) -> Option<String> {
        let storage = self.storage.as_ref()?;
        match storage.get_last_active_file().await {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "last active file lookup failed");
                None
            }
        }
    }

    async fn edit_history(&self) -> Vec<String> {
        let Some(storage) = &self.storage else {
            return Vec::new();
        };
        match storage.get_recent_events(EDIT_HISTORY_LIMIT).await {
            Ok(events) => events
                .iter()
                .map(|e| format!("{} {} {}", e.timestamp.to_rfc3339(), e.event_type, e.file_path))
                .collect(),
            Err(e) => {
                warn!(error = %e, "recent events lookup failed");
                Vec::new()
            }
        }
    }

    pub fn select_files(&self, collected: &CollectedContext) -> Vec<SelectedFile> {
        if self.config.analyze_all_files {
            return collected
                .files
                .iter()
                .take(self.config.max_files_to_analyze)
                .map(|f| SelectedFile {
                    path: f.path.clone(),
                    content: f.content.clone(),
                })
                .collect();
        }

        let Some(active) = collected.active_file.as_deref() else {
            return Vec::new();
        };
        if let Some(file) = collected.files.iter().find(|f| paths_match(&f.path, active)) {
            return vec![SelectedFile {
                path: file.path.clone(),
                content: file.content.clone(),
            }];
        }
        // Unsaved or out-of-tree buffer.
        match &collected.active_content {
            Some(content) => vec![SelectedFile {
                path: active.to_string(),
                content: content.clone(),
            }],
            None => Vec::new(),
        }
    }

    fn raw_input(&self, collected: &CollectedContext, active: Option<&str>, contents: BTreeMap<String, String>) -> RawContextInput {
        RawContextInput {
            branch: collected.branch.clone(),
            active_file: active.map(str::to_string),
            cursor: collected.cursor.filter(|_| active == collected.active_file.as_deref()),
            recent_commits: collected.recent_commits.iter().map(Commit::oneline).collect(),
            uncommitted_changes: collected.uncommitted_changes.clone(),
            open_files: collected.open_files.clone(),
            errors: collected.diagnostics.clone(),
            diff: Some(collected.diff.clone()).filter(|d| !d.is_empty()),
            edit_history: collected.edit_history.clone(),
            file_contents: contents,
        }
    }

    async fn build_context(&self, input: &RawContextInput) -> AnalysisContext {
        ContextBuilder::build(input, self.storage.as_deref()).await
    }

    async fn lint_all(&self, files: &[SelectedFile]) -> Vec<Option<LintResult>> {
        join_all(files.iter().map(|f| self.lint.lint(&f.content))).await
    }

    async fn analyze_batch(
        &self,
        collected: &CollectedContext,
        files: &[SelectedFile],
    ) -> (Vec<FileAnalysisResult>, Option<String>) {
        let lints = self.lint_all(files).await;
        let contents: BTreeMap<String, String> =
            files.iter().map(|f| (f.path.clone(), f.content.clone())).collect();
        let input = self.raw_input(collected, collected.active_file.as_deref(), contents.clone());
        let context = self.build_context(&input).await;

        let batch = match self.llm.run_batch(&contents, &context).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, files = files.len(), "batch analysis failed, falling back to per-file analysis");
                self.events.emit(&PipelineEvent::BatchFallback { error: e.to_string() });
                return (self.analyze_sequential(collected, files, Some(lints)).await, None);
            }
        };

        let results = files
            .iter()
            .zip(lints)
            .map(|(file, lint)| {
                let analysis = batch.for_file(&file.path).cloned();
                let fix = lint
                    .as_ref()
                    .map(|l| fix_decision::refine(fix_decision::decide(l, &file.content), analysis.as_ref()));
                let result = FileAnalysisResult {
                    file_path: file.path.clone(),
                    lint_result: lint,
                    llm_analysis: analysis,
                    errors: Vec::new(),
                    fix_action: fix,
                };
                self.file_analyzed(&result);
                result
            })
            .collect();
        (results, Some(batch.global_summary))
    }

    /// Per-file analysis. `lints`, when given, are reused instead of linting
    /// again and must line up with `files`.
    async fn analyze_sequential(
        &self,
        collected: &CollectedContext,
        files: &[SelectedFile],
        lints: Option<Vec<Option<LintResult>>>,
    ) -> Vec<FileAnalysisResult> {
        let lints = match lints {
            Some(lints) => lints,
            None => self.lint_all(files).await,
        };
        let mut results = Vec::with_capacity(files.len());
        for (file, lint) in files.iter().zip(lints) {
            let result = self.analyze_one(collected, file, lint).await;
            self.file_analyzed(&result);
            results.push(result);
        }
        results
    }

    async fn analyze_one(
        &self,
        collected: &CollectedContext,
        file: &SelectedFile,
        lint: Option<LintResult>,
    ) -> FileAnalysisResult {
        let fix = lint.as_ref().map(|l| fix_decision::decide(l, &file.content));
        let code = match (&fix, &lint) {
            (Some(f), Some(l)) if f.kind == FixKind::Auto => l.fixed.clone(),
            _ => file.content.clone(),
        };

        let contents = BTreeMap::from([(file.path.clone(), code.clone())]);
        let input = self.raw_input(collected, Some(&file.path), contents);
        let context = self.build_context(&input).await;

        let mut errors = Vec::new();
        let analysis = match self.llm.analyze_code(&code, &context).await {
            Ok(a) => Some(a),
            Err(e) => {
                warn!(file = %file.path, error = %e, "llm analysis failed");
                errors.push(e.to_string());
                None
            }
        };
        FileAnalysisResult {
            file_path: file.path.clone(),
            fix_action: fix.map(|f| fix_decision::refine(f, analysis.as_ref())),
            lint_result: lint,
            llm_analysis: analysis,
            errors,
        }
    }

    fn file_analyzed(&self, result: &FileAnalysisResult) {
        self.events.emit(&PipelineEvent::FileAnalyzed {
            file_path: result.file_path.clone(),
            fix: result.fix_action.as_ref().map(|f| f.kind),
        });
    }
}

/// Snapshot paths are root-relative; the editor may report either form.
fn paths_match(snapshot_path: &str, active: &str) -> bool {
    snapshot_path == active || active.ends_with(&format!("/{snapshot_path}"))
}
