use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trail_core::{IssueSeverity, RiskLevel};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Issue {
    pub fn new(severity: IssueSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            line: None,
        }
    }
}

/// Single-file LLM analysis.
///
/// `risk_level` is the one required field: an object without it is not an
/// analysis and must not decode as a clean result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeAnalysis {
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(alias = "riskLevel")]
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Generated test code, when the model produced any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<String>,
}

impl CodeAnalysis {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity.is_error())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerFileAnalysis {
    #[serde(alias = "file_path", alias = "file")]
    pub file_path: String,
    #[serde(flatten)]
    pub analysis: CodeAnalysis,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAnalysis {
    #[serde(default, alias = "global_summary")]
    pub global_summary: String,
    #[serde(alias = "per_file_results")]
    pub per_file_results: Vec<PerFileAnalysis>,
}

impl BatchAnalysis {
    pub fn for_file(&self, path: &str) -> Option<&CodeAnalysis> {
        self.per_file_results
            .iter()
            .find(|r| r.file_path == path)
            .map(|r| &r.analysis)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: u32,
    pub character: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PastSession {
    pub session_id: String,
    pub summary: String,
    pub timestamp: String,
    pub project: String,
}

/// Bounded prompt context handed to the LLM.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisContext {
    pub branch: String,
    pub active_file: Option<String>,
    pub cursor: Option<CursorPosition>,
    pub recent_commits: Vec<String>,
    pub uncommitted_changes: Vec<String>,
    pub related_files: Vec<String>,
    pub errors: Vec<String>,
    pub diff: Option<String>,
    pub edit_history: Vec<String>,
    pub file_contents: BTreeMap<String, String>,
    /// Always present; empty when no history could be retrieved.
    pub relevant_past_sessions: Vec<PastSession>,
}

/// Lint micro-service warning: either a bare string or a structured entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LintWarning {
    Message(String),
    Detailed {
        message: String,
        #[serde(default)]
        line: Option<u32>,
        #[serde(default)]
        rule: Option<String>,
    },
}

impl LintWarning {
    pub fn message(&self) -> &str {
        match self {
            Self::Message(m) => m,
            Self::Detailed { message, .. } => message,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LintResult {
    pub fixed: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub linted: bool,
    #[serde(default)]
    pub severity: RiskLevel,
    #[serde(default)]
    pub warnings: Vec<LintWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_accepts_camel_case_risk() {
        let a: CodeAnalysis =
            serde_json::from_str(r#"{"riskLevel": "high", "issues": []}"#).unwrap();
        assert_eq!(a.risk_level, RiskLevel::High);
        assert!(a.suggestions.is_empty());
    }

    #[test]
    fn objects_without_risk_level_are_rejected() {
        assert!(serde_json::from_str::<CodeAnalysis>(r#"{"unrelated": true}"#).is_err());
        assert!(serde_json::from_str::<CodeAnalysis>(r#"{"issues": []}"#).is_err());
        assert!(serde_json::from_str::<BatchAnalysis>(r#"{"globalSummary": "x"}"#).is_err());
    }

    #[test]
    fn batch_lookup_by_path() {
        let batch: BatchAnalysis = serde_json::from_value(serde_json::json!({
            "globalSummary": "two files",
            "perFileResults": [
                {"filePath": "a.rs", "risk_level": "low", "issues": []},
                {"file_path": "b.rs", "risk_level": "medium",
                 "issues": [{"severity": "error", "message": "panic"}]}
            ]
        }))
        .unwrap();
        assert_eq!(batch.for_file("a.rs").unwrap().risk_level, RiskLevel::Low);
        assert!(batch.for_file("b.rs").unwrap().has_errors());
        assert!(batch.for_file("c.rs").is_none());
    }

    #[test]
    fn lint_warnings_accept_strings_and_objects() {
        let lint: LintResult = serde_json::from_value(serde_json::json!({
            "fixed": "x",
            "language": "python",
            "linted": true,
            "severity": "medium",
            "warnings": ["unused import", {"message": "long line", "line": 4}]
        }))
        .unwrap();
        assert_eq!(lint.warnings.len(), 2);
        assert_eq!(lint.warnings[1].message(), "long line");
    }

    #[test]
    fn context_serializes_empty_past_sessions() {
        let value = serde_json::to_value(AnalysisContext::default()).unwrap();
        assert_eq!(value["relevantPastSessions"], serde_json::json!([]));
    }
}
