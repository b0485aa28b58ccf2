use std::time::Duration;

/// Errors from external collaborators: LLM provider, embedding endpoint,
/// lint service. Classifies transient failures (recover with a default) versus
/// configuration failures (surface to the caller).
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProviderError {
    // Configuration: no safe default exists
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("provider not ready")]
    NotReady,

    // Transient-external
    #[error("http error: {0}")]
    Http(String),
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // Data-integrity
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Server { .. } | Self::Timeout(_)
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotConfigured(_) | Self::NotReady)
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "not_configured",
            Self::NotReady => "not_ready",
            Self::Http(_) => "http",
            Self::Server { .. } => "server",
            Self::Timeout(_) => "timeout",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }

    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::NotConfigured(format!("rejected credentials: {body}")),
            _ => Self::Server { status, body },
        }
    }
}
