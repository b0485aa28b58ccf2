pub mod client;
pub mod gemini;
pub mod lint;
pub mod mock;
pub mod parse;
pub mod types;

pub use client::{LintClient, LlmClient};
pub use gemini::{GeminiClient, GeminiConfig};
pub use lint::HttpLintClient;
pub use mock::{MockLintClient, MockLlmClient};
pub use types::{
    AnalysisContext, BatchAnalysis, CodeAnalysis, CursorPosition, Issue, LintResult, LintWarning,
    PastSession, PerFileAnalysis,
};
