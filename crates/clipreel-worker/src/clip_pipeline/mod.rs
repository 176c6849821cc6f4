//! Bounded clip preparation pool.
//!
//! Every clip of a compilation is prepared on its own task, gated by a
//! semaphore sized to `max_concurrency`. Results come back in input order
//! whatever order the workers finish in.

use std::sync::Arc;
use std::time::Instant;

use clipreel_models::{ClipRecord, ClipStage, ClipStatus, Compilation};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

pub mod clip;
pub mod status;

pub use clip::{ClipOutcome, ClipPreparer, MediaClipPreparer};
pub use status::{ChannelReporter, NoopReporter, SharedReporter, StatusReporter, StatusUpdate, TracingReporter};

/// One clip after preparation, at its original position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedClip {
    pub position: usize,
    pub clip: ClipRecord,
    pub status: ClipStatus,
    pub reused: bool,
}

impl PreparedClip {
    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }
}

/// Fixed-size worker pool over a [`ClipPreparer`].
pub struct ClipPool<P> {
    preparer: Arc<P>,
    reporter: SharedReporter,
    max_concurrency: usize,
}

impl<P: ClipPreparer + 'static> ClipPool<P> {
    pub fn new(preparer: Arc<P>, max_concurrency: usize) -> Self {
        Self {
            preparer,
            reporter: Arc::new(TracingReporter),
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Prepare every clip of `compilation`.
    ///
    /// Per-clip failures only affect that clip's status. Shutdown or a
    /// missing executable in any worker fails the whole call once all
    /// workers have returned.
    pub async fn prepare_all(&self, compilation: &Compilation) -> WorkerResult<Vec<PreparedClip>> {
        info!(
            compilation = compilation.index,
            clips = compilation.len(),
            workers = self.max_concurrency,
            "Preparing clips"
        );
        for (position, clip) in compilation.clips.iter().enumerate() {
            self.reporter.report(position, &clip.id, ClipStage::Queued);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let handles: Vec<_> = compilation
            .clips
            .iter()
            .enumerate()
            .map(|(position, clip)| {
                let semaphore = semaphore.clone();
                let preparer = self.preparer.clone();
                let reporter = self.reporter.clone();
                let clip = clip.clone();

                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| WorkerError::clip_failed(&clip.id, "worker pool closed"))?;
                    let started = Instant::now();
                    let result = preparer.prepare(position, &clip, &reporter).await;
                    if let Ok(outcome) = &result {
                        metrics::record_clip(outcome.status.as_str(), started.elapsed().as_secs_f64());
                    }
                    result
                })
            })
            .collect();

        let results = join_all(handles).await;

        let mut prepared = Vec::with_capacity(results.len());
        let mut abort: Option<WorkerError> = None;

        for ((position, clip), joined) in compilation.clips.iter().enumerate().zip(results) {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) if e.is_fatal() => {
                    if e.is_interrupted() || abort.is_none() {
                        abort = Some(e);
                    }
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(clip_id = %clip.id, position, error = %e, "Clip preparation failed");
                    self.reporter.report(
                        position,
                        &clip.id,
                        ClipStage::Failed { status: ClipStatus::FailedProcess },
                    );
                    ClipOutcome::failed(ClipStatus::FailedProcess)
                }
                Err(join_error) => {
                    error!(clip_id = %clip.id, position, error = %join_error, "Clip worker panicked");
                    self.reporter.report(
                        position,
                        &clip.id,
                        ClipStage::Failed { status: ClipStatus::FailedProcess },
                    );
                    ClipOutcome::failed(ClipStatus::FailedProcess)
                }
            };

            prepared.push(PreparedClip {
                position,
                clip: clip.clone(),
                status: outcome.status,
                reused: outcome.reused,
            });
        }

        if let Some(e) = abort {
            return Err(e);
        }

        let done = prepared.iter().filter(|p| p.is_done()).count();
        info!(
            compilation = compilation.index,
            done,
            failed = prepared.len() - done,
            "Clip preparation finished"
        );
        Ok(prepared)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use clipreel_media::MediaError;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Preparer with per-clip delays and scripted outcomes.
    #[derive(Default)]
    pub(crate) struct ScriptedPreparer {
        pub delays: HashMap<String, Duration>,
        pub failures: HashMap<String, ClipStatus>,
        pub fatal: HashSet<String>,
        pub panics: HashSet<String>,
        pub in_flight: AtomicUsize,
        pub peak: AtomicUsize,
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ClipPreparer for ScriptedPreparer {
        async fn prepare(
            &self,
            position: usize,
            clip: &ClipRecord,
            reporter: &SharedReporter,
        ) -> WorkerResult<ClipOutcome> {
            self.calls.lock().unwrap().push(clip.id.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(&clip.id) {
                tokio::time::sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panics.contains(&clip.id) {
                panic!("scripted panic for {}", clip.id);
            }
            if self.fatal.contains(&clip.id) {
                return Err(MediaError::not_found("yt-dlp").into());
            }
            if let Some(status) = self.failures.get(&clip.id) {
                reporter.report(position, &clip.id, ClipStage::Failed { status: *status });
                return Ok(ClipOutcome::failed(*status));
            }
            reporter.report(position, &clip.id, ClipStage::Done);
            Ok(ClipOutcome::done())
        }
    }

    pub(crate) fn clips(ids: &[&str]) -> Vec<ClipRecord> {
        ids.iter()
            .map(|id| ClipRecord::new(*id, format!("author {}", id), 10, format!("https://clips.example.com/{}", id)))
            .collect()
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let ids = ["a", "b", "c", "d"];
        let preparer = ScriptedPreparer {
            // Earlier clips finish last
            delays: ids
                .iter()
                .enumerate()
                .map(|(i, id)| (id.to_string(), Duration::from_millis(80 - 20 * i as u64)))
                .collect(),
            ..Default::default()
        };
        let pool = ClipPool::new(Arc::new(preparer), 4).with_reporter(Arc::new(NoopReporter));

        let prepared = pool.prepare_all(&Compilation::new(0, clips(&ids))).await.unwrap();

        let order: Vec<_> = prepared.iter().map(|p| p.clip.id.as_str()).collect();
        assert_eq!(order, ids);
        assert!(prepared.iter().enumerate().all(|(i, p)| p.position == i && p.is_done()));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let ids = ["a", "b", "c", "d", "e", "f"];
        let preparer = Arc::new(ScriptedPreparer {
            delays: ids.iter().map(|id| (id.to_string(), Duration::from_millis(20))).collect(),
            ..Default::default()
        });
        let pool = ClipPool::new(preparer.clone(), 2).with_reporter(Arc::new(NoopReporter));

        pool.prepare_all(&Compilation::new(0, clips(&ids))).await.unwrap();

        assert!(preparer.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(preparer.calls.lock().unwrap().len(), ids.len());
    }

    #[tokio::test]
    async fn test_failures_and_panics_stay_contained() {
        let preparer = ScriptedPreparer {
            failures: [("b".to_string(), ClipStatus::FailedDownload)].into(),
            panics: ["c".to_string()].into(),
            ..Default::default()
        };
        let (reporter, mut rx) = ChannelReporter::new();
        let pool = ClipPool::new(Arc::new(preparer), 2).with_reporter(Arc::new(reporter));

        let prepared = pool.prepare_all(&Compilation::new(0, clips(&["a", "b", "c"]))).await.unwrap();

        let statuses: Vec<_> = prepared.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![ClipStatus::Done, ClipStatus::FailedDownload, ClipStatus::FailedProcess]
        );

        let mut terminal = HashMap::new();
        while let Ok(update) = rx.try_recv() {
            if update.stage.is_terminal() {
                terminal.insert(update.position, update.stage);
            }
        }
        assert_eq!(terminal.len(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_fails_the_pool() {
        let preparer = ScriptedPreparer {
            fatal: ["b".to_string()].into(),
            ..Default::default()
        };
        let pool = ClipPool::new(Arc::new(preparer), 2).with_reporter(Arc::new(NoopReporter));

        let err = pool
            .prepare_all(&Compilation::new(0, clips(&["a", "b", "c"])))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_empty_compilation() {
        let pool = ClipPool::new(Arc::new(ScriptedPreparer::default()), 4);
        let prepared = pool.prepare_all(&Compilation::new(0, Vec::new())).await.unwrap();
        assert!(prepared.is_empty());
    }
}
