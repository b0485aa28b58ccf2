//! Component wiring shared by every subcommand.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;
use tracing::info;
use trail_engine::{
    FsWorkspace, GitCli, Orchestrator, OrchestratorConfig, PathPrefixPolicy, SessionConfig,
    SessionDetector,
};
use trail_llm::{
    GeminiClient, GeminiConfig, HttpLintClient, LintClient, LlmClient, MockLintClient, MockLlmClient,
};
use trail_settings::{trail_home, TrailSettings};
use trail_store::{Database, SqliteStorage, Storage};

pub struct App {
    pub settings: TrailSettings,
    pub root: PathBuf,
    pub storage: Arc<dyn Storage>,
    pub llm: Arc<dyn LlmClient>,
    pub lint: Arc<dyn LintClient>,
    pub vcs: Arc<GitCli>,
    pub workspace: Arc<FsWorkspace>,
}

impl App {
    pub fn build(settings: TrailSettings, root: PathBuf) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("workspace root not found: {}", root.display()))?;

        let llm = create_llm(&settings)?;
        let lint: Arc<dyn LintClient> = if settings.lint.enabled {
            Arc::new(HttpLintClient::new(
                settings.lint.url.clone(),
                Duration::from_millis(settings.lint.timeout_ms),
            ))
        } else {
            Arc::new(MockLintClient::offline())
        };

        let db_path = resolve_db_path(&settings.storage.db_path);
        ensure_parent_dir(&db_path)?;
        let db = Database::open(&db_path)
            .with_context(|| format!("failed to open database {}", db_path.display()))?;
        info!(path = %db_path.display(), "database opened");
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new(db, llm.clone()));

        let vcs = Arc::new(
            GitCli::new(&root).with_timeout(Duration::from_millis(settings.vcs.timeout_ms)),
        );
        let workspace = Arc::new(FsWorkspace::new(&root));

        Ok(Self {
            settings,
            root,
            storage,
            llm,
            lint,
            vcs,
            workspace,
        })
    }

    pub fn project(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string())
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig {
                analyze_all_files: self.settings.pipeline.analyze_all_files,
                max_files_to_analyze: self.settings.pipeline.max_files_to_analyze,
            },
            self.workspace.clone(),
            self.vcs.clone(),
            self.lint.clone(),
            self.llm.clone(),
            Some(self.storage.clone()),
        )
    }

    pub fn session_detector(&self) -> SessionDetector {
        let s = &self.settings.session;
        SessionDetector::new(
            SessionConfig {
                project: self.project(),
                idle_timeout: Duration::from_millis(s.idle_timeout_ms),
                idle_check_interval: Duration::from_millis(s.idle_check_interval_ms),
                min_session_age: Duration::from_millis(s.min_session_age_ms),
                min_recent_files: s.min_recent_files,
                recent_file_window: s.recent_file_window,
                ignored_extensions: s.ignored_extensions.clone(),
            },
            self.storage.clone(),
            self.llm.clone(),
            self.vcs.clone(),
            Box::new(PathPrefixPolicy::new(&self.root)),
        )
    }
}

fn create_llm(settings: &TrailSettings) -> Result<Arc<dyn LlmClient>> {
    let llm = &settings.llm;
    if llm.mock {
        info!(dimensions = llm.embedding_dimensions, "using offline mock LLM");
        return Ok(Arc::new(MockLlmClient::new(llm.embedding_dimensions)));
    }
    let client = GeminiClient::new(GeminiConfig {
        api_key: llm.api_key.clone().map(SecretString::from),
        model: llm.model.clone(),
        embedding_model: llm.embedding_model.clone(),
        embedding_dimensions: llm.embedding_dimensions,
        base_url: llm.api_base.clone(),
        timeout: Duration::from_millis(llm.timeout_ms),
    })
    .context("failed to create Gemini client")?;
    Ok(Arc::new(client))
}

fn resolve_db_path(configured: &str) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() {
        path
    } else {
        trail_home().join(path)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}
