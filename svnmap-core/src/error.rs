//! Error types for svnmap
//!
//! Every fallible engine operation returns [`MapError`]. Failures reported by the
//! repository access layer are folded into [`MapError::SourceUnavailable`].

/// Result type for mapping operations
pub type Result<T> = std::result::Result<T, MapError>;

/// Errors that can occur while classifying paths or resolving file ids
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("Not a branch under the active scheme: {0:?}")]
    NotAContainer(String),

    #[error("Path {path:?} does not exist in {container:?} at revision {revision}")]
    PathNotLive {
        path: String,
        container: String,
        revision: u64,
    },

    #[error("Invalid branching scheme: {0:?}")]
    InvalidSchemeSpec(String),

    #[error("Unable to fetch {what}: {reason}")]
    SourceUnavailable { what: String, reason: String },

    #[error("Invalid revision key: {0:?}")]
    InvalidRevisionKey(String),

    #[error("Copy of {path:?} in r{revision} references r{source_revision}, which is not older")]
    InvalidCopySource {
        path: String,
        revision: u64,
        source_revision: u64,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MapError {
    /// Wrap a collaborator failure
    pub(crate) fn source_unavailable(what: impl Into<String>, err: anyhow::Error) -> Self {
        MapError::SourceUnavailable {
            what: what.into(),
            reason: format!("{:#}", err),
        }
    }
}
