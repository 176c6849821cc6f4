//! Run orchestration: partition, prepare, sequence, encode, finalize.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use clipreel_media::{encode, progress, MediaError, ProcessRunner, ProcessSupervisor, Prober, ProgressCallback};
use clipreel_models::{ClipRecord, Compilation, ConcatScript};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, Instrument};

use crate::asset_cache::{
    AssetEncoder, FfmpegAssetEncoder, JsonManifestStore, ManifestStore, TransitionAssetCache, MANIFEST_FILE,
};
use crate::clip_pipeline::{ClipPool, ClipPreparer, MediaClipPreparer, PreparedClip, SharedReporter};
use crate::config::CompilerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::finalize::{cache_output_date, cache_output_name, DateWindow, FinalizeReport, OutputFinalizer};
use crate::logging::CompilationLogger;
use crate::metrics;
use crate::sequencing::{partition_compilations, Sequencer};

/// A compilation that has a concat script on disk.
#[derive(Debug, Clone)]
pub struct SequencedCompilation {
    pub index: usize,
    pub prepared: Vec<PreparedClip>,
    pub script: ConcatScript,
    pub script_path: PathBuf,
}

/// How a compilation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilationOutcome {
    /// Encoded into the cache, ready to finalize
    Encoded(PathBuf),
    /// No clip survived preparation
    Empty,
    /// A failed clip with `skip_bad_clip` disabled
    Aborted { clip_id: String, position: usize },
    /// The concat encode failed
    EncodeFailed(String),
}

impl CompilationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompilationOutcome::Encoded(_) => "encoded",
            CompilationOutcome::Empty => "empty",
            CompilationOutcome::Aborted { .. } => "aborted",
            CompilationOutcome::EncodeFailed(_) => "encode_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilationSummary {
    pub index: usize,
    pub clips: usize,
    pub done: usize,
    pub outcome: CompilationOutcome,
}

/// Result of a whole run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub compilations: Vec<CompilationSummary>,
    pub finalized: FinalizeReport,
}

/// Owns every engine component for one run.
pub struct Compiler<P, E, M> {
    config: Arc<CompilerConfig>,
    runner: ProcessRunner,
    prober: Prober,
    pool: ClipPool<P>,
    sequencer: Sequencer<E, M>,
    finalizer: OutputFinalizer,
}

impl Compiler<MediaClipPreparer, FfmpegAssetEncoder, JsonManifestStore> {
    /// Wire the production components around `supervisor`.
    pub fn from_config(config: CompilerConfig, supervisor: Arc<ProcessSupervisor>) -> WorkerResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let runner = ProcessRunner::new(supervisor).with_command_logging(config.debug_commands);

        let preparer = Arc::new(MediaClipPreparer::new(config.clone(), runner.clone())?);
        let manifest = JsonManifestStore::load(config.transition_cache_dir().join(MANIFEST_FILE));
        let assets = Arc::new(TransitionAssetCache::new(
            config.clone(),
            FfmpegAssetEncoder::new(runner.clone(), &config),
            manifest,
            runner.shutdown().clone(),
        ));

        Ok(Self::new(config, runner, preparer, assets, StdRng::from_os_rng()))
    }
}

impl<P, E, M> Compiler<P, E, M>
where
    P: ClipPreparer + 'static,
    E: AssetEncoder,
    M: ManifestStore,
{
    pub fn new(
        config: Arc<CompilerConfig>,
        runner: ProcessRunner,
        preparer: Arc<P>,
        assets: Arc<TransitionAssetCache<E, M>>,
        rng: StdRng,
    ) -> Self {
        Self {
            prober: Prober::new(runner.clone(), config.ffprobe_path.clone()),
            pool: ClipPool::new(preparer, config.max_concurrency),
            sequencer: Sequencer::new(config.clone(), assets, rng),
            finalizer: OutputFinalizer::new(config.clone()),
            config,
            runner,
        }
    }

    /// Send per-clip status to `reporter` instead of the log.
    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.pool = self.pool.with_reporter(reporter);
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Split `clips` into this run's compilations.
    pub fn partition(&mut self, clips: &[ClipRecord]) -> Vec<Compilation> {
        partition_compilations(clips, &self.config, self.sequencer.rng_mut())
    }

    /// Prepare every clip of `compilation` and write its concat script.
    ///
    /// Returns `WorkerError::CompilationAborted` when a clip failed and
    /// skipping is disabled; no script is written in that case.
    pub async fn prepare_and_sequence(&mut self, compilation: &Compilation) -> WorkerResult<SequencedCompilation> {
        let prepared = self.pool.prepare_all(compilation).await?;
        let script = self.sequencer.build_script(compilation.index, &prepared).await?;
        let script_path = self.sequencer.write_script(compilation.index, &script).await?;
        Ok(SequencedCompilation {
            index: compilation.index,
            prepared,
            script,
            script_path,
        })
    }

    /// Encode a written concat script into the cache.
    ///
    /// Returns `Ok(None)` when the encode failed for a reason other than
    /// shutdown or a missing executable.
    pub async fn encode_concat(&self, sequenced: &SequencedCompilation) -> WorkerResult<Option<PathBuf>> {
        let logger = CompilationLogger::new(sequenced.index, "encode");
        let output = self.config.cache_dir.join(cache_output_name(
            sequenced.index,
            &cache_output_date(),
            &self.config.encoding.container_ext,
        ));
        logger.log_start(&format!("{} segments -> {}", sequenced.script.len(), output.display()));

        let total = match self
            .prober
            .concat_duration(&sequenced.script.render(), &self.config.cache_dir)
            .await
        {
            Ok(total) => total,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(_) => None,
        };

        let cmd = encode::concat(
            &self.config.ffmpeg_path,
            &sequenced.script_path,
            &output,
            &self.config.encoding,
        );
        let result = match total {
            Some(total) => {
                self.runner
                    .run_with_progress(&cmd, decile_progress(logger.clone(), total))
                    .await
            }
            None => self.runner.run(&cmd).await,
        }
        .and_then(|out| out.ensure_success("ffmpeg"));

        match result {
            Ok(_) => {
                logger.log_completion(&output.display().to_string());
                Ok(Some(output))
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                log_media_failure(&logger, &e);
                Ok(None)
            }
        }
    }

    /// Run every compilation for `clips` and finalize the outputs.
    ///
    /// Shutdown, a missing executable or a missing spacer stops the run.
    /// Aborted, empty or failed compilations are reported and skipped.
    pub async fn run(&mut self, clips: &[ClipRecord], identity: &str, window: &DateWindow) -> WorkerResult<RunSummary> {
        let compilations = self.partition(clips);
        info!(
            clips = clips.len(),
            compilations = compilations.len(),
            per_compilation = self.config.clips_per_compilation,
            "Starting run"
        );

        let mut summaries = Vec::with_capacity(compilations.len());
        for compilation in &compilations {
            let logger = CompilationLogger::new(compilation.index, "compile");
            let summary = self
                .compile_one(compilation, &logger)
                .instrument(logger.create_span())
                .await?;
            metrics::record_compilation(summary.outcome.as_str());
            summaries.push(summary);
        }

        let names = self.finalizer.plan_names(identity, window, compilations.len());
        let finalized = self.finalizer.finalize(&names).await?;
        info!(
            moved = finalized.moved.len(),
            missing = finalized.missing.len(),
            "Run finished"
        );

        Ok(RunSummary {
            compilations: summaries,
            finalized,
        })
    }

    async fn compile_one(
        &mut self,
        compilation: &Compilation,
        logger: &CompilationLogger,
    ) -> WorkerResult<CompilationSummary> {
        logger.log_start(&format!("{} clips", compilation.len()));
        let summary = |done, outcome| CompilationSummary {
            index: compilation.index,
            clips: compilation.len(),
            done,
            outcome,
        };

        let sequenced = match self.prepare_and_sequence(compilation).await {
            Ok(sequenced) => sequenced,
            Err(WorkerError::CompilationAborted { clip_id, position, .. }) => {
                logger.log_warning(&format!("aborted at clip {} (position {})", clip_id, position));
                return Ok(summary(0, CompilationOutcome::Aborted { clip_id, position }));
            }
            Err(e) => return Err(e),
        };

        let done = sequenced.script.clip_count();
        if done == 0 {
            logger.log_warning("no clip was prepared, skipping encode");
            return Ok(summary(0, CompilationOutcome::Empty));
        }

        let outcome = match self.encode_concat(&sequenced).await? {
            Some(path) => CompilationOutcome::Encoded(path),
            None => CompilationOutcome::EncodeFailed(format!("concat encode of comp{} failed", compilation.index)),
        };
        logger.log_completion(&format!("{} of {} clips, {}", done, compilation.len(), outcome.as_str()));
        Ok(summary(done, outcome))
    }
}

/// Logs encode progress each time it crosses a 10% step.
fn decile_progress(logger: CompilationLogger, total: f64) -> ProgressCallback {
    let last = AtomicU8::new(0);
    Arc::new(move |elapsed| {
        let decile = progress::percent(elapsed, total) / 10;
        if decile > last.swap(decile, Ordering::Relaxed) {
            logger.log_progress(&format!("{}%", u32::from(decile) * 10));
        }
    })
}

fn log_media_failure(logger: &CompilationLogger, e: &MediaError) {
    match e.diagnostics() {
        Some(tail) => logger.log_error(&format!("{}\n{}", e, tail)),
        None => logger.log_error(&e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_cache::tests::{setup, FakeEncoder};
    use crate::asset_cache::MemoryManifestStore;
    use crate::clip_pipeline::tests::{clips, ScriptedPreparer};
    use crate::clip_pipeline::NoopReporter;
    use clipreel_media::ShutdownSignal;
    use clipreel_models::ClipStatus;
    use std::collections::HashSet;

    fn build(
        config: CompilerConfig,
        preparer: ScriptedPreparer,
    ) -> Compiler<ScriptedPreparer, FakeEncoder, MemoryManifestStore> {
        let config = Arc::new(config);
        let shutdown = ShutdownSignal::new();
        let runner = ProcessRunner::new(Arc::new(ProcessSupervisor::new(shutdown.clone())));
        let assets = Arc::new(TransitionAssetCache::new(
            config.clone(),
            FakeEncoder::default(),
            MemoryManifestStore::new(),
            shutdown,
        ));
        Compiler::new(config, runner, Arc::new(preparer), assets, StdRng::seed_from_u64(11))
            .with_reporter(Arc::new(NoopReporter))
    }

    #[tokio::test]
    async fn test_partition_and_sequence_all() {
        let (_dir, mut config) = setup(&["static.mp4", "intro.mp4", "outro.mp4"]);
        config.clips_per_compilation = 3;
        config.compilations = 2;
        config.min_views = 0;
        let mut compiler = build(config, ScriptedPreparer::default());

        let comps = compiler.partition(&clips(&["a", "b", "c", "d", "e"]));
        assert_eq!(comps.len(), 2);

        let mut seen = HashSet::new();
        for comp in &comps {
            let sequenced = compiler.prepare_and_sequence(comp).await.unwrap();
            assert!(sequenced.script_path.exists());
            assert!(sequenced.script.spacers_follow_clips());
            for id in sequenced.script.clip_ids() {
                assert!(seen.insert(id.to_string()));
            }
        }
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn test_aborted_and_empty_compilations_are_reported() {
        let (_dir, mut config) = setup(&["static.mp4"]);
        config.min_views = 0;
        config.clips_per_compilation = 3;
        config.compilations = 1;
        config.skip_bad_clip = false;
        let preparer = ScriptedPreparer {
            failures: [("b".to_string(), ClipStatus::FailedDownload)].into(),
            ..Default::default()
        };
        let mut compiler = build(config.clone(), preparer);
        let comp = Compilation::new(0, clips(&["a", "b", "c"]));
        let logger = CompilationLogger::new(0, "compile");

        let summary = compiler.compile_one(&comp, &logger).await.unwrap();
        assert_eq!(summary.outcome.as_str(), "aborted");
        assert!(!crate::sequencing::script_path(&config, 0).exists());

        config.skip_bad_clip = true;
        let preparer = ScriptedPreparer {
            failures: ["a", "b", "c"]
                .iter()
                .map(|id| (id.to_string(), ClipStatus::FailedProcess))
                .collect(),
            ..Default::default()
        };
        let mut compiler = build(config, preparer);
        let summary = compiler.compile_one(&comp, &logger).await.unwrap();
        assert_eq!(summary.outcome, CompilationOutcome::Empty);
    }

    #[tokio::test]
    async fn test_missing_spacer_stops_the_run() {
        let (_dir, mut config) = setup(&[]);
        config.min_views = 0;
        let mut compiler = build(config, ScriptedPreparer::default());

        let err = compiler
            .run(&clips(&["a"]), "caster", &DateWindow::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::MissingSpacer(_)));
    }
}
