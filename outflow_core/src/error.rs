use serde::{Deserialize, Serialize};
use std::error::Error as StdError;

/// Common error type for `outflow_core`.
///
/// Store and client implementations should preserve the underlying error chain
/// where possible via `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The destination refused to clear its records before a full refresh.
    #[error("full refresh failed: {0}")]
    FullRefreshFailed(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

/// Coarse classification of an [`Error`], used by retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    FullRefreshFailed,
    WorkflowNotFound,
    Cancelled,
    Timeout,
    Backend,
}

impl Error {
    #[tracing::instrument(level = "debug", name = "outflow.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Convenience: wrap a serde_json error with the given context.
    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Backend {
            context: format!("json: {}", context.into()),
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::FullRefreshFailed(_) => ErrorKind::FullRefreshFailed,
            Error::WorkflowNotFound(_) => ErrorKind::WorkflowNotFound,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Backend { .. } | Error::BackendMessage(_) => ErrorKind::Backend,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::backend("sqlx", e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_groups_backend_variants() {
        let io = std::io::Error::other("disk gone");
        assert_eq!(Error::backend("sqlite", io).kind(), ErrorKind::Backend);
        assert_eq!(
            Error::BackendMessage("x".into()).kind(),
            ErrorKind::Backend
        );
        assert_eq!(
            Error::FullRefreshFailed("nope".into()).kind(),
            ErrorKind::FullRefreshFailed
        );
    }

    #[test]
    fn backend_keeps_source_chain() {
        let io = std::io::Error::other("disk gone");
        let err = Error::backend("open db", io);
        assert_eq!(err.to_string(), "backend error: open db");
        assert_eq!(
            StdError::source(&err).map(|s| s.to_string()),
            Some("disk gone".to_string())
        );
    }
}
