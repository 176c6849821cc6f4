//! Per-clip status reporting.
//!
//! Reporters observe the pool; they never influence control flow.

use std::sync::Arc;

use clipreel_models::ClipStage;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receives stage updates keyed by position within the compilation.
pub trait StatusReporter: Send + Sync {
    fn report(&self, position: usize, clip_id: &str, stage: ClipStage);
}

pub type SharedReporter = Arc<dyn StatusReporter>;

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl StatusReporter for NoopReporter {
    fn report(&self, _position: usize, _clip_id: &str, _stage: ClipStage) {}
}

/// Logs updates through `tracing`.
///
/// Percent updates go to `debug` to keep `info` output readable.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn report(&self, position: usize, clip_id: &str, stage: ClipStage) {
        match stage {
            ClipStage::Failed { status } => {
                warn!(position, clip_id, status = %status, "Clip {}", stage)
            }
            ClipStage::Normalizing { percent: Some(_) } | ClipStage::Overlay { percent: Some(_) } => {
                debug!(position, clip_id, "Clip {}", stage)
            }
            _ => info!(position, clip_id, "Clip {}", stage),
        }
    }
}

/// A status update as sent over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub position: usize,
    pub clip_id: String,
    pub stage: ClipStage,
}

/// Forwards updates to a presentation layer.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<StatusUpdate>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusReporter for ChannelReporter {
    fn report(&self, position: usize, clip_id: &str, stage: ClipStage) {
        // A closed receiver only means nobody is watching
        let _ = self.tx.send(StatusUpdate {
            position,
            clip_id: clip_id.to_string(),
            stage,
        });
    }
}
