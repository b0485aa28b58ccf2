//! Offline clients with deterministic, schema-valid output.
//!
//! `MockLlmClient` backs `llm.mock = true` and every engine test. Embeddings
//! are a hashed bag-of-words so texts sharing words land close together.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use trail_core::{IssueSeverity, ProviderError, RiskLevel};

use crate::client::{LintClient, LlmClient};
use crate::types::{AnalysisContext, BatchAnalysis, CodeAnalysis, Issue, LintResult, PerFileAnalysis};

pub struct MockLlmClient {
    dims: usize,
    ready: bool,
    analysis: Option<CodeAnalysis>,
    fail_analysis: bool,
    fail_batch: bool,
    fail_embeddings: bool,
    analyze_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    embedding_calls: AtomicUsize,
    analyzed_code: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            ready: true,
            analysis: None,
            fail_analysis: false,
            fail_batch: false,
            fail_embeddings: false,
            analyze_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            embedding_calls: AtomicUsize::new(0),
            analyzed_code: Mutex::new(Vec::new()),
        }
    }

    /// Return `analysis` for every file instead of the heuristic fixture.
    pub fn with_analysis(mut self, analysis: CodeAnalysis) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn failing_analysis(mut self) -> Self {
        self.fail_analysis = true;
        self
    }

    pub fn failing_batch(mut self) -> Self {
        self.fail_batch = true;
        self
    }

    pub fn failing_embeddings(mut self) -> Self {
        self.fail_embeddings = true;
        self
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::Relaxed)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::Relaxed)
    }

    pub fn embedding_calls(&self) -> usize {
        self.embedding_calls.load(Ordering::Relaxed)
    }

    /// Code passed to `analyze_code`, in call order.
    pub fn analyzed_code(&self) -> Vec<String> {
        self.analyzed_code.lock().clone()
    }

    fn fixture(&self, code: &str) -> CodeAnalysis {
        if let Some(analysis) = &self.analysis {
            return analysis.clone();
        }
        let mut issues = Vec::new();
        for (idx, line) in code.lines().enumerate() {
            let line_no = u32::try_from(idx + 1).unwrap_or(u32::MAX);
            if line.contains("TODO") || line.contains("FIXME") {
                issues.push(Issue {
                    severity: IssueSeverity::Info,
                    message: "unresolved marker".into(),
                    line: Some(line_no),
                });
            }
            if line.contains("unwrap()") || line.contains("eval(") {
                issues.push(Issue {
                    severity: IssueSeverity::Warning,
                    message: "unchecked failure path".into(),
                    line: Some(line_no),
                });
            }
        }
        let risk_level = match issues.len() {
            0 => RiskLevel::None,
            1 | 2 => RiskLevel::Low,
            _ => RiskLevel::Medium,
        };
        CodeAnalysis {
            summary: Some(format!("{} lines reviewed, {} issues", code.lines().count(), issues.len())),
            issues,
            suggestions: Vec::new(),
            risk_level,
            tests: None,
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn analyze_code(
        &self,
        code: &str,
        _context: &AnalysisContext,
    ) -> Result<CodeAnalysis, ProviderError> {
        self.analyze_calls.fetch_add(1, Ordering::Relaxed);
        self.analyzed_code.lock().push(code.to_string());
        if self.fail_analysis {
            return Err(ProviderError::Http("mock analysis failure".into()));
        }
        Ok(self.fixture(code))
    }

    async fn run_batch(
        &self,
        files: &BTreeMap<String, String>,
        _context: &AnalysisContext,
    ) -> Result<BatchAnalysis, ProviderError> {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_batch {
            return Err(ProviderError::Timeout(std::time::Duration::from_secs(60)));
        }
        let per_file_results = files
            .iter()
            .map(|(path, code)| PerFileAnalysis {
                file_path: path.clone(),
                analysis: self.fixture(code),
            })
            .collect();
        Ok(BatchAnalysis {
            global_summary: format!("Reviewed {} files", files.len()),
            per_file_results,
        })
    }

    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embedding_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_embeddings {
            return Err(ProviderError::Http("mock embedding failure".into()));
        }
        Ok(hashed_embedding(text, self.dims))
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn embedding_dimensions(&self) -> usize {
        self.dims
    }
}

/// L2-normalized bag-of-words vector. Each lowercase alphanumeric token is
/// hashed to a bucket and sign. Empty text maps to the zero vector.
pub fn hashed_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    if dims == 0 {
        return v;
    }
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let bucket = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        let idx = usize::try_from(bucket % dims as u64).unwrap_or(0);
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

type LintFn = dyn Fn(&str) -> Option<LintResult> + Send + Sync;

/// Lint client answering from a closure.
pub struct MockLintClient {
    respond: Box<LintFn>,
    calls: AtomicUsize,
}

impl MockLintClient {
    pub fn from_fn(respond: impl Fn(&str) -> Option<LintResult> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always unreachable.
    pub fn offline() -> Self {
        Self::from_fn(|_| None)
    }

    /// Echo the input back unchanged with no warnings.
    pub fn clean() -> Self {
        Self::from_fn(|code| {
            Some(LintResult {
                fixed: code.to_string(),
                language: "unknown".into(),
                linted: true,
                severity: RiskLevel::None,
                warnings: Vec::new(),
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LintClient for MockLintClient {
    async fn lint(&self, code: &str) -> Option<LintResult> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        (self.respond)(code)
    }
}
