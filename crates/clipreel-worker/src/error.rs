//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Required spacer asset '{0}' is unavailable")]
    MissingSpacer(String),

    #[error("Compilation {compilation} aborted: clip {clip_id} at position {position} failed")]
    CompilationAborted {
        compilation: usize,
        clip_id: String,
        position: usize,
    },

    #[error("Clip {clip_id} failed: {message}")]
    ClipFailed { clip_id: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media error: {0}")]
    Media(#[from] clipreel_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn clip_failed(clip_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClipFailed {
            clip_id: clip_id.into(),
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether this error was caused by the shutdown signal.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, WorkerError::Media(e) if e.is_interrupted())
    }

    /// Whether the error must stop the run instead of affecting one clip
    /// or asset.
    pub fn is_fatal(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_fatal(),
            WorkerError::MissingSpacer(_) | WorkerError::ConfigError(_) => true,
            _ => false,
        }
    }
}
