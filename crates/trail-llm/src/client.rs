use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use trail_core::ProviderError;

use crate::types::{AnalysisContext, BatchAnalysis, CodeAnalysis, LintResult};

/// Code-analysis and embedding provider.
///
/// Malformed model output is not an error: implementations recover a
/// best-effort value via [`crate::parse`]. `Err` means the call itself failed
/// (transport, timeout, missing configuration).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn analyze_code(
        &self,
        code: &str,
        context: &AnalysisContext,
    ) -> Result<CodeAnalysis, ProviderError>;

    /// One call covering every file in `files` (path → content).
    async fn run_batch(
        &self,
        files: &BTreeMap<String, String>,
        context: &AnalysisContext,
    ) -> Result<BatchAnalysis, ProviderError>;

    /// Fixed-dimension embedding of `text`.
    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    fn is_ready(&self) -> bool;

    fn embedding_dimensions(&self) -> usize;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn analyze_code(
        &self,
        code: &str,
        context: &AnalysisContext,
    ) -> Result<CodeAnalysis, ProviderError> {
        (**self).analyze_code(code, context).await
    }

    async fn run_batch(
        &self,
        files: &BTreeMap<String, String>,
        context: &AnalysisContext,
    ) -> Result<BatchAnalysis, ProviderError> {
        (**self).run_batch(files, context).await
    }

    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        (**self).get_embedding(text).await
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn embedding_dimensions(&self) -> usize {
        (**self).embedding_dimensions()
    }
}

/// Static lint/format service. `None` means unreachable, timed out, or
/// unusable; it never fails the caller.
#[async_trait]
pub trait LintClient: Send + Sync {
    async fn lint(&self, code: &str) -> Option<LintResult>;
}
