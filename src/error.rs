use thiserror::Error;

/// Fatal compilation errors. Recoverable problems are reported as warnings
/// through [`crate::CompileContext`] instead.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Invalid spec at '{path}': {message}")]
    InvalidSpec { path: String, message: String },

    #[error("Invalid '{kind}' transform:\n{source}")]
    InvalidTransform {
        kind: &'static str,
        source: serde_json::Error,
    },

    #[error("Invalid encoding for channel '{channel}': {message}")]
    InvalidEncoding { channel: String, message: String },

    #[error("Cannot stack both x and y: {0}")]
    ContradictoryStack(String),

    #[error("Dataflow graph is inconsistent: {0}")]
    InvalidGraph(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CompileError {
    pub(crate) fn spec(path: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::InvalidSpec {
            path: path.into(),
            message: message.into(),
        }
    }
}
