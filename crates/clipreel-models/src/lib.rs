//! Shared data models for the clipreel compilation engine.
//!
//! This crate provides Serde-serializable types for:
//! - Clip records and per-clip status
//! - Compilations and concat scripts
//! - Transition asset build parameters and the asset manifest
//! - Encoding configuration

pub mod asset;
pub mod clip;
pub mod compilation;
pub mod encoding;
pub mod segment;

// Re-export common types
pub use asset::{AssetKind, AssetManifest, AssetManifestEntry, TransitionAssetSpec};
pub use clip::{fix_ascii, ClipRecord, ClipStage, ClipStatus};
pub use compilation::Compilation;
pub use encoding::EncodingConfig;
pub use segment::{ConcatScript, SegmentLine};
