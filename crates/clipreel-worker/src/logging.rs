//! Structured compilation logging and subscriber setup.
//!
//! Provides consistent, structured logging for compilation runs with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directives applied when `RUST_LOG` is unset or invalid.
pub const DEFAULT_DIRECTIVES: &str = "clipreel_worker=info,clipreel_media=info,clipreel_models=info";

/// Install the global subscriber: JSON when `LOG_FORMAT=json`, colored
/// text otherwise.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Logger for one compilation with consistent contextual fields.
#[derive(Debug, Clone)]
pub struct CompilationLogger {
    compilation: usize,
    operation: String,
}

impl CompilationLogger {
    /// Create a logger for `compilation` (zero-based) and an operation such
    /// as `"prepare"` or `"encode"`.
    pub fn new(compilation: usize, operation: &str) -> Self {
        Self {
            compilation,
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            compilation = self.compilation,
            operation = %self.operation,
            "Compilation started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            compilation = self.compilation,
            operation = %self.operation,
            "Compilation progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            compilation = self.compilation,
            operation = %self.operation,
            "Compilation warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            compilation = self.compilation,
            operation = %self.operation,
            "Compilation error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            compilation = self.compilation,
            operation = %self.operation,
            "Compilation completed: {}", message
        );
    }

    pub fn compilation(&self) -> usize {
        self.compilation
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the compilation fields, for instrumenting futures.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "compilation",
            index = self.compilation,
            operation = %self.operation
        )
    }
}
