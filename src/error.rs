use axum::http::StatusCode;
use std::io;
use std::path::PathBuf;

/// Error type for the webhook intake and routine pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Header doesn't provide {0}")]
    MissingHeader(&'static str),

    #[error("Header {0} is not valid ASCII")]
    InvalidHeader(&'static str),

    #[error("Signature doesn't match secret")]
    SignatureMismatch,

    #[error("Invalid push payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Illegal characters in {field} <{value}>")]
    IllegalCharacters { field: &'static str, value: String },

    #[error("Could not create workspace {}: {source}", .path.display())]
    WorkspaceCreateFailed { path: PathBuf, source: io::Error },

    #[error("git clone failed: {detail}\n{output}")]
    CloneFailed { detail: String, output: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl PipelineError {
    /// Workspace and clone failures; these end the current routine and,
    /// under fail-fast, the rest of the dispatch.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            PipelineError::WorkspaceCreateFailed { .. } | PipelineError::CloneFailed { .. }
        )
    }

    /// Status code reported to the webhook caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::MissingHeader(_)
            | PipelineError::InvalidHeader(_)
            | PipelineError::SignatureMismatch
            | PipelineError::InvalidPayload(_)
            | PipelineError::IllegalCharacters { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Helper type for Results that use PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;
