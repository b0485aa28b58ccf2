//! Decides what to do with a lint patch.
//!
//! Small, low-risk patches are applied automatically; risky ones are
//! discarded; everything else is proposed to the developer. A later LLM
//! analysis can upgrade a proposal to automatic, never the reverse.

use serde::{Deserialize, Serialize};
use trail_core::RiskLevel;
use trail_llm::{CodeAnalysis, LintResult};

/// Patches changing fewer characters than this are candidates for auto-apply.
pub const AUTO_FIX_MAX_DELTA: usize = 20;
/// Most LLM issues tolerated when upgrading a proposal.
pub const OVERRIDE_MAX_ISSUES: usize = 2;
pub const OVERRIDE_REASON: &str = "confirmed by deep analysis";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixKind {
    Auto,
    Prompt,
    None,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAction {
    pub kind: FixKind,
    pub reason: String,
}

impl FixAction {
    fn new(kind: FixKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Absolute difference in character counts.
pub fn char_delta(original: &str, fixed: &str) -> usize {
    original.chars().count().abs_diff(fixed.chars().count())
}

pub fn decide(lint: &LintResult, original: &str) -> FixAction {
    let delta = char_delta(original, &lint.fixed);
    match lint.severity {
        RiskLevel::High => FixAction::new(FixKind::None, "high severity lint result, patch rejected"),
        RiskLevel::Low | RiskLevel::Medium if delta < AUTO_FIX_MAX_DELTA => FixAction::new(
            FixKind::Auto,
            format!("minor safe formatting change ({delta} chars)"),
        ),
        _ => FixAction::new(
            FixKind::Prompt,
            format!("{} severity change of {delta} chars needs review", lint.severity),
        ),
    }
}

/// Upgrade a prompt to auto when the LLM found the code low risk with at most
/// two non-error issues. Any other input is returned unchanged.
pub fn refine(action: FixAction, analysis: Option<&CodeAnalysis>) -> FixAction {
    let Some(analysis) = analysis else {
        return action;
    };
    let confirmed = action.kind == FixKind::Prompt
        && analysis.risk_level == RiskLevel::Low
        && analysis.issues.len() <= OVERRIDE_MAX_ISSUES
        && !analysis.has_errors();
    if confirmed {
        FixAction::new(FixKind::Auto, OVERRIDE_REASON)
    } else {
        action
    }
}
