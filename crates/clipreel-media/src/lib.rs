#![deny(unreachable_patterns)]
//! External-process layer of the clipreel compilation engine.
//!
//! This crate provides:
//! - The run-wide [`ShutdownSignal`] and the [`ProcessSupervisor`] registry
//! - Structured command building with placeholder templates
//! - A cancellable [`ProcessRunner`] with `-progress pipe:2` parsing
//! - FFprobe helpers and FFmpeg argument builders for every encoder pass
//! - Downloader invocation and avatar fetching
//! - Cross-device file moves and cache cleanup helpers

pub mod command;
pub mod download;
pub mod encode;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod shutdown;
pub mod supervisor;
pub mod template;

pub use command::{ProcessOutput, ProcessRunner};
pub use download::{AvatarFetcher, Downloader};
pub use encode::AssetAudioMode;
pub use error::{MediaError, MediaResult};
pub use probe::Prober;
pub use progress::{DiagnosticTail, ProgressCallback};
pub use shutdown::ShutdownSignal;
pub use supervisor::{ProcessHandle, ProcessSupervisor};
pub use template::{ArgTemplate, CommandSpec, TemplateVars};
