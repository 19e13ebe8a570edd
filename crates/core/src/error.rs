//! Closed error taxonomy shared by every component boundary.
//!
//! Every public fn in this crate returns `Result<T, RagError>`. Private
//! helpers that never cross a component boundary may still return
//! `Result<T, String>` for terse leaf-level parsing code.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("config error: {0}")]
    Config(String),

    #[error("path traversal rejected: {0}")]
    PathSecurity(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("extractor error: {0}")]
    Extractor(String),

    #[error("backend error ({kind}): {message}")]
    Backend { kind: BackendFailureKind, message: String },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    /// Short machine-routable code for CLI/API error reporting.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Config(_) => "CONFIG_ERROR",
            RagError::PathSecurity(_) => "PATH_TRAVERSAL",
            RagError::Store(_) => "INDEX_UNAVAILABLE",
            RagError::Extractor(_) => "EXTRACTOR_ERROR",
            RagError::Backend { .. } => "BACKEND_ERROR",
            RagError::Embedding(_) => "EMBEDDING_ERROR",
            RagError::BudgetExceeded(_) => "BUDGET_EXCEEDED",
            RagError::NotFound(_) => "NOT_FOUND",
            RagError::Internal(_) => "INTERNAL",
        }
    }
}

/// Failure taxonomy for a single backend attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFailureKind {
    Ok,
    Timeout,
    TransportError,
    RateLimited,
    AuthError,
    ValidationFailed,
    Overloaded,
    NonLatin1Output,
}

impl std::fmt::Display for BackendFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendFailureKind::Ok => "ok",
            BackendFailureKind::Timeout => "timeout",
            BackendFailureKind::TransportError => "transport_error",
            BackendFailureKind::RateLimited => "rate_limited",
            BackendFailureKind::AuthError => "auth_error",
            BackendFailureKind::ValidationFailed => "validation_failed",
            BackendFailureKind::Overloaded => "overloaded",
            BackendFailureKind::NonLatin1Output => "non_latin1_output",
        };
        f.write_str(s)
    }
}

impl From<rusqlite::Error> for RagError {
    fn from(e: rusqlite::Error) -> Self {
        RagError::Store(e.to_string())
    }
}

impl From<std::io::Error> for RagError {
    fn from(e: std::io::Error) -> Self {
        RagError::Store(e.to_string())
    }
}

impl From<reqwest::Error> for RagError {
    fn from(e: reqwest::Error) -> Self {
        RagError::Backend { kind: BackendFailureKind::TransportError, message: e.to_string() }
    }
}

impl From<toml::de::Error> for RagError {
    fn from(e: toml::de::Error) -> Self {
        RagError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        RagError::Internal(e.to_string())
    }
}
