//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while driving external media tools.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Executable not found: {program}")]
    ExecutableNotFound { program: String },

    #[error("{tool} failed: {message}")]
    CommandFailed {
        tool: String,
        message: String,
        exit_code: Option<i32>,
        diagnostics: Option<String>,
    },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("Avatar fetch failed: {0}")]
    AvatarFailed(String),

    #[error("Interrupted by shutdown")]
    Interrupted,

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid command template: {0}")]
    InvalidTemplate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MediaError {
    /// Create a command failure error.
    pub fn command_failed(
        tool: impl Into<String>,
        message: impl Into<String>,
        exit_code: Option<i32>,
        diagnostics: Option<String>,
    ) -> Self {
        Self::CommandFailed {
            tool: tool.into(),
            message: message.into(),
            exit_code,
            diagnostics,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    /// Create an executable-not-found error.
    pub fn not_found(program: impl Into<String>) -> Self {
        Self::ExecutableNotFound {
            program: program.into(),
        }
    }

    /// Whether the failure was caused by the shutdown signal.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, MediaError::Interrupted)
    }

    /// Whether retrying can never help (missing executable, shutdown).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MediaError::ExecutableNotFound { .. } | MediaError::Interrupted
        )
    }

    /// Captured diagnostic tail, if the failure carried one.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            MediaError::CommandFailed { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(MediaError::Interrupted.is_interrupted());
        assert!(MediaError::Interrupted.is_fatal());
        assert!(MediaError::not_found("ffmpeg").is_fatal());
        assert!(!MediaError::not_found("ffmpeg").is_interrupted());

        let failed = MediaError::command_failed("ffmpeg", "exit 1", Some(1), Some("boom".into()));
        assert!(!failed.is_fatal());
        assert_eq!(failed.diagnostics(), Some("boom"));
        assert_eq!(failed.to_string(), "ffmpeg failed: exit 1");
    }
}
