use crate::client::ClientError;
use std::error::Error as StdError;

/// Common error type for `refsync_core`.
///
/// Storage backends should preserve the underlying error chain where possible via
/// `Error::backend`. Failures reported by the external service are carried as
/// `Error::Client` so the orchestrator can tell them apart from local failures.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("external service error: {0}")]
    Client(#[from] ClientError),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "refsync.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True when the failure originated at the external service (transport error,
    /// non-success status, malformed or missing payload).
    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client(_))
    }

    /// The client error, if this is one.
    pub fn as_client(&self) -> Option<&ClientError> {
        match self {
            Self::Client(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
