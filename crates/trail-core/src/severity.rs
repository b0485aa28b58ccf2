use serde::{Deserialize, Serialize};

/// Risk/severity scale shared by lint results and LLM analyses.
///
/// Variant order is the aggregation order: `None < Low < Medium < High`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Worst level in the iterator, `None` when empty.
    pub fn worst_of(levels: impl IntoIterator<Item = RiskLevel>) -> RiskLevel {
        levels.into_iter().max().unwrap_or(RiskLevel::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a single issue reported by LLM analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

impl IssueSeverity {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}
