//! Clip compilation engine.
//!
//! This crate provides:
//! - Immutable run configuration
//! - Retry policy over fallible media steps
//! - Transition asset cache with a persisted build manifest
//! - Bounded clip preparation pool with live status reporting
//! - Compilation partitioning and concat script sequencing
//! - Output finalization and cache cleanup
//! - Run orchestration tying the stages together

pub mod asset_cache;
pub mod clip_pipeline;
pub mod compiler;
pub mod config;
pub mod error;
pub mod finalize;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod sequencing;

pub use asset_cache::{
    AssetEncoder, CachedAsset, FfmpegAssetEncoder, JsonManifestStore, ManifestStore, MemoryManifestStore,
    TransitionAssetCache,
};
pub use clip_pipeline::{
    ChannelReporter, ClipOutcome, ClipPool, ClipPreparer, MediaClipPreparer, NoopReporter, PreparedClip,
    SharedReporter, StatusReporter, StatusUpdate, TracingReporter,
};
pub use compiler::{CompilationOutcome, CompilationSummary, Compiler, RunSummary, SequencedCompilation};
pub use config::CompilerConfig;
pub use error::{WorkerError, WorkerResult};
pub use finalize::{DateWindow, FinalizeReport, OutputFinalizer};
pub use logging::CompilationLogger;
pub use retry::{RetryOutcome, RetryPolicy, StepOutcome};
pub use sequencing::{partition_compilations, Sequencer, TransitionPicker};
