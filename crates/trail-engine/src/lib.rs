pub mod capture;
pub mod context_builder;
pub mod debounce;
pub mod error;
pub mod fix_decision;
pub mod ingestion;
pub mod orchestrator;
pub mod session;
pub mod symbols;
pub mod truncate;
pub mod vcs;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;

pub use capture::{changed_lines, EventCapture, LineRange};
pub use context_builder::{ContextBuilder, RawContextInput};
pub use debounce::{EditDebouncer, NoSymbols, SymbolResolver};
pub use error::EngineError;
pub use fix_decision::{FixAction, FixKind};
pub use ingestion::{FlushOutcome, IngestionConfig, IngestionQueue};
pub use orchestrator::{
    AnalysisMode, CollectedContext, FileAnalysisResult, Orchestrator, OrchestratorConfig,
    PipelineEvent, PipelineResult, PipelineSummary, SelectedFile,
};
pub use session::{
    AreaPolicy, BoundaryReason, PathPrefixPolicy, SessionConfig, SessionDetector, SessionEvent,
};
pub use symbols::{DefinitionScanner, Language};
pub use vcs::{Commit, GitCli, VcsClient};
pub use workspace::{ActiveDocument, FsWorkspace, WorkspaceFile, WorkspaceHost};
