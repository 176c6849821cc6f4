//! Retry policy with linear backoff and shutdown awareness.
//!
//! Wraps any fallible async step (download, encode) in a bounded loop.
//! A step that reports "already satisfied" ends the loop like a success,
//! and the shutdown signal aborts it between attempts and during backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use clipreel_media::{MediaError, ShutdownSignal};
use tracing::{debug, warn};

use crate::config::CompilerConfig;
use crate::error::WorkerError;

/// Successful result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T> {
    /// The step did its work
    Done(T),
    /// The output already exists and no work was needed
    AlreadySatisfied,
}

/// Final result of a retried step.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded(T),
    AlreadySatisfied,
    /// Every attempt failed, or the error was not retryable.
    Failed { error: E, attempts: u32 },
    /// The shutdown signal was observed.
    Interrupted,
}

impl<T, E> RetryOutcome<T, E> {
    /// Success or already satisfied.
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded(_) | RetryOutcome::AlreadySatisfied)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RetryOutcome::Interrupted)
    }
}

/// Classifies errors for the retry loop.
pub trait RetryClass {
    /// Caused by shutdown: stop without retrying and report interrupted.
    fn is_interrupted(&self) -> bool;

    /// Retrying cannot help: stop and report failure.
    fn is_fatal(&self) -> bool;
}

impl RetryClass for MediaError {
    fn is_interrupted(&self) -> bool {
        MediaError::is_interrupted(self)
    }

    fn is_fatal(&self) -> bool {
        MediaError::is_fatal(self)
    }
}

impl RetryClass for WorkerError {
    fn is_interrupted(&self) -> bool {
        WorkerError::is_interrupted(self)
    }

    fn is_fatal(&self) -> bool {
        WorkerError::is_fatal(self)
    }
}

/// Bounded retry with linear backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay after attempt `i` (0-based) is `(i + 1) * base_delay`
    pub base_delay: Duration,
    shutdown: ShutdownSignal,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration, shutdown: ShutdownSignal) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
            shutdown,
        }
    }

    pub fn from_config(config: &CompilerConfig, shutdown: ShutdownSignal) -> Self {
        Self::new(config.retry_attempts, config.retry_base_delay, shutdown)
    }

    /// Backoff after the failed attempt with 0-based index `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt + 1)
    }

    /// Run `operation` until it succeeds, is already satisfied, fails
    /// fatally, runs out of attempts, or shutdown is signaled.
    pub async fn run<F, Fut, T, E>(&self, name: &str, mut operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<StepOutcome<T>, E>>,
        E: RetryClass + Display,
    {
        let mut attempt = 0u32;

        loop {
            // Checked before every attempt; does not consume one
            if self.shutdown.is_signaled() {
                return RetryOutcome::Interrupted;
            }

            match operation().await {
                Ok(StepOutcome::Done(value)) => return RetryOutcome::Succeeded(value),
                Ok(StepOutcome::AlreadySatisfied) => return RetryOutcome::AlreadySatisfied,
                Err(e) if e.is_interrupted() => return RetryOutcome::Interrupted,
                Err(e) if e.is_fatal() => {
                    return RetryOutcome::Failed {
                        error: e,
                        attempts: attempt + 1,
                    }
                }
                Err(e) if attempt + 1 < self.attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    debug!(
                        step = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.signaled() => return RetryOutcome::Interrupted,
                    }
                }
                Err(e) => {
                    warn!(step = name, attempts = attempt + 1, error = %e, "All attempts failed");
                    return RetryOutcome::Failed {
                        error: e,
                        attempts: attempt + 1,
                    };
                }
            }
        }
    }
}
