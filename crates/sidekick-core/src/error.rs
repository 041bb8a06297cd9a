use thiserror::Error;

/// Error taxonomy shared by every component in the persisted activity layer.
///
/// Workflow engines generally carry activity failures across process
/// boundaries as a string code, not a typed payload, so every variant also
/// exposes a stable [`CoreError::code`] for that propagation path.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Programmer or workflow-author error: missing chat history, empty
    /// query vector, invalid path. Never retried.
    #[error("invalid argument: {0}")]
    Arg(String),

    /// Unknown provider, unresolved embedder, malformed config. Never
    /// retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// KV or filesystem I/O. Retried by the workflow engine.
    #[error("storage error: {0}")]
    Storage(String),

    /// LLM or embedder call failed in a non-user-recoverable way. Retried
    /// with backoff by the workflow engine.
    #[error("external service error: {0}")]
    External(String),

    /// Content-type mismatch (e.g. a non-image file given to the image
    /// activity). Surfaced to the user.
    #[error("type error: {0}")]
    Type(String),

    /// A stored value failed to decode into its expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// An expected value was absent from storage (e.g. a vector the index
    /// build expected to find).
    #[error("missing value: {0}")]
    Missing(String),

    /// A dimensionality mismatch between vectors that must agree.
    #[error("dimension mismatch: {0}")]
    Dim(String),
}

impl CoreError {
    /// Short error code string, stable across releases, suitable for
    /// cross-process propagation (activity-result payloads, trace records).
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Arg(_) => "FAIL_ARG",
            CoreError::Config(_) => "FAIL_CONFIG",
            CoreError::Storage(_) => "FAIL_STORAGE",
            CoreError::External(_) => "FAIL_EXTERNAL",
            CoreError::Type(_) => "FAIL_TYPE",
            CoreError::Decode(_) => "FAIL_DECODE",
            CoreError::Missing(_) => "FAIL_MISSING",
            CoreError::Dim(_) => "FAIL_DIM",
        }
    }

    /// Whether the workflow engine should retry the activity that raised
    /// this error. See spec §7.
    pub fn retriable(&self) -> bool {
        matches!(self, CoreError::Storage(_) | CoreError::External(_))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
