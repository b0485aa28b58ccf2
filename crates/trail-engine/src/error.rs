use trail_core::ProviderError;
use trail_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("vcs error: {0}")]
    Vcs(String),

    /// Workspace context could not be established; fails a pipeline run.
    #[error("context error: {0}")]
    Context(String),

    #[error("{0}")]
    Internal(String),
}
