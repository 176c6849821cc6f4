//! Single-clip preparation: avatar, download, normalize, overlay.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use clipreel_media::progress::percent;
use clipreel_media::{
    encode, fs_utils, AvatarFetcher, CommandSpec, Downloader, MediaError, ProcessRunner, Prober,
    ProgressCallback,
};
use clipreel_models::{ClipRecord, ClipStage, ClipStatus};
use tracing::{debug, info, warn};

use super::status::SharedReporter;
use crate::config::CompilerConfig;
use crate::error::WorkerResult;
use crate::retry::{RetryOutcome, RetryPolicy, StepOutcome};

/// Avatar thumbnail inside a clip directory.
pub const AVATAR_FILE: &str = "avatar.png";
/// Raw downloader output.
pub const DOWNLOAD_FILE: &str = "clip.mp4";
/// Normalized clip before the overlay pass.
pub const NORMALIZED_FILE: &str = "normalized.mp4";

/// Whether `clip_id` can name a directory directly under the cache.
///
/// Accepts a single component of `[A-Za-z0-9._-]` that is not `.`/`..`,
/// not one of the `preserve` directories and not shaped like a concat
/// script (`comp<N>`) or an encoded output (`complete_*`).
pub fn is_valid_clip_id(clip_id: &str, preserve: &[String]) -> bool {
    let charset_ok = !clip_id.is_empty()
        && clip_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !charset_ok || clip_id == "." || clip_id == ".." {
        return false;
    }
    if preserve.iter().any(|p| p.trim().eq_ignore_ascii_case(clip_id)) {
        return false;
    }
    let lower = clip_id.to_ascii_lowercase();
    let script_like = lower
        .strip_prefix("comp")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
    !script_like && !lower.starts_with("complete_")
}

/// Per-clip scratch directory.
pub fn clip_dir(cache_dir: &Path, clip_id: &str) -> PathBuf {
    cache_dir.join(clip_id)
}

/// Final prepared file of a clip: `{cache}/{id}/{id}.mp4`.
pub fn final_clip_path(cache_dir: &Path, clip_id: &str) -> PathBuf {
    clip_dir(cache_dir, clip_id).join(format!("{}.mp4", clip_id))
}

/// Path of the final file relative to the cache, as written in concat scripts.
pub fn concat_entry(clip_id: &str) -> String {
    format!("{}/{}.mp4", clip_id, clip_id)
}

/// Result of preparing one clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipOutcome {
    pub status: ClipStatus,
    /// The final file already existed and nothing was run
    pub reused: bool,
}

impl ClipOutcome {
    pub fn done() -> Self {
        Self {
            status: ClipStatus::Done,
            reused: false,
        }
    }

    pub fn reused() -> Self {
        Self {
            status: ClipStatus::Done,
            reused: true,
        }
    }

    pub fn failed(status: ClipStatus) -> Self {
        Self {
            status,
            reused: false,
        }
    }
}

/// Turns a clip record into its final per-clip file.
///
/// Ordinary failures are reported through [`ClipOutcome::status`]. `Err` is
/// reserved for shutdown and missing executables, which stop the pool.
#[async_trait]
pub trait ClipPreparer: Send + Sync {
    async fn prepare(
        &self,
        position: usize,
        clip: &ClipRecord,
        reporter: &SharedReporter,
    ) -> WorkerResult<ClipOutcome>;
}

/// Preparer backed by the downloader and ffmpeg.
#[derive(Debug, Clone)]
pub struct MediaClipPreparer {
    config: Arc<CompilerConfig>,
    runner: ProcessRunner,
    downloader: Downloader,
    avatars: AvatarFetcher,
    prober: Prober,
    retry: RetryPolicy,
}

impl MediaClipPreparer {
    pub fn new(config: Arc<CompilerConfig>, runner: ProcessRunner) -> WorkerResult<Self> {
        let shutdown = runner.shutdown().clone();
        let downloader = Downloader::new(
            runner.clone(),
            &config.downloader_path,
            config.downloader_args.clone(),
            &config.download_format,
            &config.ffmpeg_path,
        );
        let avatars = AvatarFetcher::new(shutdown.clone())?;
        let prober = Prober::new(runner.clone(), &config.ffprobe_path);
        let retry = RetryPolicy::from_config(&config, shutdown);

        Ok(Self {
            config,
            runner,
            downloader,
            avatars,
            prober,
            retry,
        })
    }

    /// Download into `dest`, retrying from scratch after each failure.
    ///
    /// Leftovers are removed before the first attempt and after every
    /// failed one so a partial file is never taken as a finished download.
    async fn download(&self, clip: &ClipRecord, dest: &Path) -> RetryOutcome<(), MediaError> {
        if let Err(e) = fs_utils::remove_file_if_exists(dest).await {
            return RetryOutcome::Failed { error: e, attempts: 0 };
        }

        let downloader = &self.downloader;
        let url = clip.source_url.as_str();

        self.retry
            .run("download", move || async move {
                match downloader.download(url, dest).await {
                    Ok(()) => Ok(StepOutcome::Done(())),
                    Err(e) => {
                        if let Err(cleanup) = fs_utils::remove_file_if_exists(dest).await {
                            warn!(path = %dest.display(), error = %cleanup, "Could not remove partial download");
                        }
                        Err(e)
                    }
                }
            })
            .await
    }

    async fn encode(
        &self,
        step: &str,
        spec: &CommandSpec,
        progress: ProgressCallback,
    ) -> RetryOutcome<(), MediaError> {
        let runner = &self.runner;
        let progress = &progress;

        self.retry
            .run(step, move || async move {
                runner
                    .run_with_progress(spec, progress.clone())
                    .await?
                    .ensure_success("ffmpeg")?;
                Ok::<_, MediaError>(StepOutcome::Done(()))
            })
            .await
    }

    /// Map a failed step to the clip's outcome, escalating fatal errors.
    fn settle(
        &self,
        position: usize,
        clip: &ClipRecord,
        reporter: &SharedReporter,
        stage: &str,
        outcome: RetryOutcome<(), MediaError>,
        status: ClipStatus,
    ) -> WorkerResult<Option<ClipOutcome>> {
        match outcome {
            RetryOutcome::Succeeded(()) | RetryOutcome::AlreadySatisfied => Ok(None),
            RetryOutcome::Interrupted => {
                info!(clip_id = %clip.id, position, stage, "Interrupted by shutdown");
                Err(MediaError::Interrupted.into())
            }
            RetryOutcome::Failed { error, .. } if error.is_fatal() => Err(error.into()),
            RetryOutcome::Failed { error, attempts } => {
                warn!(
                    clip_id = %clip.id,
                    position,
                    stage,
                    attempts,
                    error = %error,
                    diagnostics = error.diagnostics().unwrap_or(""),
                    "Clip stage failed"
                );
                reporter.report(position, &clip.id, ClipStage::Failed { status });
                Ok(Some(ClipOutcome::failed(status)))
            }
        }
    }
}

#[async_trait]
impl ClipPreparer for MediaClipPreparer {
    async fn prepare(
        &self,
        position: usize,
        clip: &ClipRecord,
        reporter: &SharedReporter,
    ) -> WorkerResult<ClipOutcome> {
        if !is_valid_clip_id(&clip.id, &self.config.cache_preserve_dirs) {
            warn!(clip_id = %clip.id, position, "Clip id is not a usable cache key");
            let status = ClipStatus::FailedProcess;
            reporter.report(position, &clip.id, ClipStage::Failed { status });
            return Ok(ClipOutcome::failed(status));
        }

        let cache = &self.config.cache_dir;
        let dir = clip_dir(cache, &clip.id);
        let final_path = final_clip_path(cache, &clip.id);

        if !self.config.rebuild && is_nonempty_file(&final_path).await {
            debug!(clip_id = %clip.id, position, "Final clip present, skipping");
            reporter.report(position, &clip.id, ClipStage::Done);
            return Ok(ClipOutcome::reused());
        }
        if self.runner.shutdown().is_signaled() {
            return Err(MediaError::Interrupted.into());
        }
        tokio::fs::create_dir_all(&dir).await?;

        reporter.report(position, &clip.id, ClipStage::FetchingAvatar);
        let avatar = dir.join(AVATAR_FILE);
        if let Err(e) = self.avatars.ensure_avatar(&clip.avatar_url, &avatar).await {
            if e.is_interrupted() {
                return Err(e.into());
            }
            warn!(clip_id = %clip.id, error = %e, "Avatar unavailable");
        }

        reporter.report(position, &clip.id, ClipStage::Downloading);
        let download_path = dir.join(DOWNLOAD_FILE);
        let outcome = self.download(clip, &download_path).await;
        if let Some(failed) =
            self.settle(position, clip, reporter, "download", outcome, ClipStatus::FailedDownload)?
        {
            return Ok(failed);
        }

        let duration = match self.prober.duration(&download_path).await {
            Ok(d) => d,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                debug!(clip_id = %clip.id, error = %e, "Duration probe failed");
                None
            }
        };

        reporter.report(position, &clip.id, ClipStage::Normalizing { percent: None });
        let normalized = dir.join(NORMALIZED_FILE);
        let spec = encode::normalize_clip(
            &self.config.ffmpeg_path,
            &download_path,
            &normalized,
            &self.config.encoding,
        );
        let progress = stage_progress(reporter, position, &clip.id, duration, |p| {
            ClipStage::Normalizing { percent: Some(p) }
        });
        let outcome = self.encode("normalize", &spec, progress).await;
        if let Some(failed) =
            self.settle(position, clip, reporter, "normalize", outcome, ClipStatus::FailedProcess)?
        {
            fs_utils::remove_file_if_exists(&normalized).await?;
            return Ok(failed);
        }
        fs_utils::remove_file_if_exists(&download_path).await?;

        if self.config.enable_overlay {
            reporter.report(position, &clip.id, ClipStage::Overlay { percent: None });
            let spec = encode::overlay_clip(
                &self.config.ffmpeg_path,
                &normalized,
                &avatar,
                &final_path,
                &clip.overlay_author(),
                self.config.fontfile.as_deref(),
                &self.config.encoding,
            );
            let progress = stage_progress(reporter, position, &clip.id, duration, |p| {
                ClipStage::Overlay { percent: Some(p) }
            });
            let outcome = self.encode("overlay", &spec, progress).await;
            if let Some(failed) =
                self.settle(position, clip, reporter, "overlay", outcome, ClipStatus::FailedProcess)?
            {
                fs_utils::remove_file_if_exists(&final_path).await?;
                return Ok(failed);
            }
            fs_utils::remove_file_if_exists(&normalized).await?;
        } else {
            fs_utils::move_file(&normalized, &final_path).await?;
        }

        reporter.report(position, &clip.id, ClipStage::Done);
        Ok(ClipOutcome::done())
    }
}

/// Progress callback reporting whole-percent changes only.
fn stage_progress(
    reporter: &SharedReporter,
    position: usize,
    clip_id: &str,
    total: Option<f64>,
    stage: fn(u8) -> ClipStage,
) -> ProgressCallback {
    let reporter = reporter.clone();
    let clip_id = clip_id.to_string();
    let last = AtomicU8::new(u8::MAX);

    Arc::new(move |elapsed: f64| {
        let Some(total) = total else { return };
        let pct = percent(elapsed, total);
        if last.swap(pct, Ordering::Relaxed) != pct {
            reporter.report(position, &clip_id, stage(pct));
        }
    })
}

async fn is_nonempty_file(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}
