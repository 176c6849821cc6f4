//! Compilation partitioning and concat script assembly.
//!
//! A script is emitted as:
//!
//! ```text
//! [intro, spacer]  (clip, spacer, [transition, spacer])*  [outro]
//! ```
//!
//! Optional assets that cannot be built are skipped. The spacer is
//! required: if it cannot be built the compilation fails.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use clipreel_models::{AssetKind, ClipRecord, Compilation, ConcatScript, SegmentLine};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::prelude::{IndexedRandom, SliceRandom};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::asset_cache::{AssetEncoder, CachedAsset, ManifestStore, TransitionAssetCache};
use crate::clip_pipeline::clip::{concat_entry, is_valid_clip_id};
use crate::clip_pipeline::PreparedClip;
use crate::config::CompilerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Split candidate clips into compilations.
///
/// Keeps clips with a usable id and `view_count >= min_views`, drops
/// repeated ids, shuffles, then takes up to `compilations` chunks of up to
/// `clips_per_compilation`.
pub fn partition_compilations<R: Rng + ?Sized>(
    clips: &[ClipRecord],
    config: &CompilerConfig,
    rng: &mut R,
) -> Vec<Compilation> {
    let mut seen = HashSet::new();
    let mut eligible: Vec<ClipRecord> = clips
        .iter()
        .filter(|c| {
            let usable = is_valid_clip_id(&c.id, &config.cache_preserve_dirs);
            if !usable {
                warn!(clip_id = %c.id, "Dropping clip with an unusable id");
            }
            usable
        })
        .filter(|c| c.is_eligible(config.min_views))
        .filter(|c| seen.insert(c.id.clone()))
        .cloned()
        .collect();
    eligible.shuffle(rng);

    let per = config.clips_per_compilation.max(1);
    let compilations: Vec<Compilation> = eligible
        .chunks(per)
        .take(config.compilations)
        .enumerate()
        .map(|(index, chunk)| Compilation::new(index, chunk.to_vec()))
        .collect();

    info!(
        candidates = clips.len(),
        eligible = eligible.len(),
        compilations = compilations.len(),
        "Created compilations"
    );
    compilations
}

/// Weighted transition choice with a cooldown on recent picks.
#[derive(Debug, Clone)]
pub struct TransitionPicker {
    candidates: Vec<(String, f64)>,
    cooldown: usize,
    recent: VecDeque<String>,
}

impl TransitionPicker {
    pub fn new(candidates: Vec<(String, f64)>, cooldown: usize) -> Self {
        Self {
            candidates,
            cooldown,
            recent: VecDeque::new(),
        }
    }

    pub fn from_config(config: &CompilerConfig) -> Self {
        let candidates = config
            .transition_assets
            .iter()
            .map(|name| (name.clone(), config.transition_weight(name)))
            .collect();
        Self::new(candidates, config.transition_cooldown)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Draw a transition, excluding the last `cooldown` recorded picks
    /// unless that would leave nothing to choose from.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        let mut pool: Vec<&(String, f64)> = self
            .candidates
            .iter()
            .filter(|(name, _)| !self.recent.contains(name))
            .collect();
        if pool.is_empty() {
            pool = self.candidates.iter().collect();
        }

        let weights: Vec<f64> = pool.iter().map(|(_, w)| w.max(0.0)).collect();
        let choice = match WeightedIndex::new(&weights) {
            Ok(dist) => pool.get(dist.sample(rng)),
            // Every weight non-positive: fall back to uniform
            Err(_) => pool.choose(rng),
        };
        choice.copied().map(|(name, _)| name.as_str())
    }

    /// Remember a transition that made it into the script.
    pub fn record(&mut self, name: &str) {
        if self.cooldown == 0 {
            return;
        }
        self.recent.push_back(name.to_string());
        while self.recent.len() > self.cooldown {
            self.recent.pop_front();
        }
    }
}

/// Builds concat scripts for prepared compilations.
pub struct Sequencer<E, M> {
    config: Arc<CompilerConfig>,
    assets: Arc<TransitionAssetCache<E, M>>,
    rng: StdRng,
}

impl<E: AssetEncoder, M: ManifestStore> Sequencer<E, M> {
    pub fn new(config: Arc<CompilerConfig>, assets: Arc<TransitionAssetCache<E, M>>, rng: StdRng) -> Self {
        Self { config, assets, rng }
    }

    /// Sequencer seeded from the OS.
    pub fn from_os_rng(config: Arc<CompilerConfig>, assets: Arc<TransitionAssetCache<E, M>>) -> Self {
        Self::new(config, assets, StdRng::from_os_rng())
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Assemble the script for one compilation from its prepared clips.
    ///
    /// Failed clips are dropped when `skip_bad_clip` is set; otherwise the
    /// first failed clip aborts the compilation.
    pub async fn build_script(
        &mut self,
        compilation: usize,
        prepared: &[PreparedClip],
    ) -> WorkerResult<ConcatScript> {
        let mut script = ConcatScript::new();
        let mut transitions = TransitionPicker::from_config(&self.config);

        if let Some(intro) = self.config.intro_assets.choose(&mut self.rng).cloned() {
            if self.push_optional(&mut script, &intro, AssetKind::Intro).await? {
                self.push_spacer(&mut script).await?;
            }
        }

        for clip in prepared {
            if !clip.is_done() {
                if !self.config.skip_bad_clip {
                    warn!(
                        compilation,
                        clip_id = %clip.clip.id,
                        position = clip.position,
                        status = %clip.status,
                        "Clip failed and skipping is disabled, aborting compilation"
                    );
                    return Err(WorkerError::CompilationAborted {
                        compilation,
                        clip_id: clip.clip.id.clone(),
                        position: clip.position,
                    });
                }
                warn!(
                    compilation,
                    clip_id = %clip.clip.id,
                    position = clip.position,
                    status = %clip.status,
                    "Skipping failed clip"
                );
                continue;
            }

            script.push(SegmentLine::Clip {
                clip_id: clip.clip.id.clone(),
                path: concat_entry(&clip.clip.id),
            });
            self.push_spacer(&mut script).await?;

            if self.config.no_random_transitions || transitions.is_empty() {
                continue;
            }
            if !self.rng.random_bool(transition_chance(self.config.transition_probability)) {
                continue;
            }
            let Some(choice) = transitions.pick(&mut self.rng).map(str::to_string) else {
                continue;
            };
            if self.push_optional(&mut script, &choice, AssetKind::Transition).await? {
                debug!(compilation, transition = %choice, "Inserted transition");
                metrics::record_transition(&choice);
                transitions.record(&choice);
                self.push_spacer(&mut script).await?;
            }
        }

        if let Some(outro) = self.config.outro_assets.choose(&mut self.rng).cloned() {
            self.push_optional(&mut script, &outro, AssetKind::Outro).await?;
        }

        info!(
            compilation,
            clips = script.clip_count(),
            segments = script.len(),
            "Sequenced compilation"
        );
        Ok(script)
    }

    /// Write the script to `{cache}/comp{index}` and return its path.
    pub async fn write_script(&self, compilation: usize, script: &ConcatScript) -> WorkerResult<PathBuf> {
        let path = script_path(&self.config, compilation);
        tokio::fs::create_dir_all(&self.config.cache_dir).await?;
        tokio::fs::write(&path, script.render()).await?;
        debug!(compilation, path = %path.display(), "Wrote concat script");
        Ok(path)
    }

    async fn push_optional(
        &self,
        script: &mut ConcatScript,
        name: &str,
        kind: AssetKind,
    ) -> WorkerResult<bool> {
        match self.assets.ensure_named(name, kind).await? {
            Some(asset) => {
                script.push(asset_line(asset, kind));
                Ok(true)
            }
            None => {
                warn!(asset = %name, kind = %kind, "Skipping unavailable asset");
                Ok(false)
            }
        }
    }

    async fn push_spacer(&self, script: &mut ConcatScript) -> WorkerResult<()> {
        let name = &self.config.static_asset;
        match self.assets.ensure_named(name, AssetKind::Static).await? {
            Some(asset) => {
                script.push(asset_line(asset, AssetKind::Static));
                Ok(())
            }
            None => Err(WorkerError::MissingSpacer(name.clone())),
        }
    }
}

/// Probability clamped to `0..=1`; NaN means never.
fn transition_chance(probability: f64) -> f64 {
    if probability.is_nan() {
        0.0
    } else {
        probability.clamp(0.0, 1.0)
    }
}

/// Scratch location of a compilation's concat script.
pub fn script_path(config: &CompilerConfig, compilation: usize) -> PathBuf {
    config.cache_dir.join(format!("comp{}", compilation))
}

fn asset_line(asset: CachedAsset, kind: AssetKind) -> SegmentLine {
    SegmentLine::Asset {
        name: asset.name,
        kind,
        path: asset.relative,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_cache::tests::{setup, FakeEncoder};
    use crate::asset_cache::MemoryManifestStore;
    use clipreel_media::ShutdownSignal;
    use clipreel_models::ClipStatus;

    fn prepared(ids: &[&str], failed: &[&str]) -> Vec<PreparedClip> {
        ids.iter()
            .enumerate()
            .map(|(position, id)| PreparedClip {
                position,
                clip: ClipRecord::new(*id, "author", 10, "https://clips.example.com"),
                status: if failed.contains(id) {
                    ClipStatus::FailedDownload
                } else {
                    ClipStatus::Done
                },
                reused: false,
            })
            .collect()
    }

    fn sequencer(config: CompilerConfig, seed: u64) -> Sequencer<FakeEncoder, MemoryManifestStore> {
        let config = Arc::new(config);
        let assets = Arc::new(TransitionAssetCache::new(
            config.clone(),
            FakeEncoder::default(),
            MemoryManifestStore::new(),
            ShutdownSignal::new(),
        ));
        Sequencer::new(config, assets, StdRng::seed_from_u64(seed))
    }

    const ASSETS: &[&str] = &[
        "static.mp4",
        "intro.mp4",
        "outro.mp4",
        "transition_01.mp4",
        "transition_02.mp4",
        "transition_03.mp4",
    ];

    fn config_with_assets(dir_config: CompilerConfig) -> CompilerConfig {
        CompilerConfig {
            intro_assets: vec!["intro.mp4".into()],
            outro_assets: vec!["outro.mp4".into()],
            transition_assets: vec![
                "transition_01.mp4".into(),
                "transition_02.mp4".into(),
                "transition_03.mp4".into(),
            ],
            ..dir_config
        }
    }

    #[test]
    fn test_partition_filters_and_caps() {
        let config = CompilerConfig {
            clips_per_compilation: 3,
            compilations: 2,
            min_views: 5,
            ..Default::default()
        };
        let mut clips: Vec<_> = (0..9)
            .map(|i| ClipRecord::new(format!("c{}", i), "a", if i == 0 { 1 } else { 10 }, "u"))
            .collect();
        clips.push(clips[1].clone());

        let comps = partition_compilations(&clips, &config, &mut StdRng::seed_from_u64(7));

        assert_eq!(comps.len(), 2);
        assert!(comps.iter().all(|c| c.len() == 3));
        let ids: HashSet<_> = comps.iter().flat_map(|c| c.clips.iter().map(|c| c.id.clone())).collect();
        assert_eq!(ids.len(), 6);
        assert!(!ids.contains("c0"));
        assert_eq!(comps[1].index, 1);
    }

    #[test]
    fn test_cooldown_prevents_repeats() {
        let candidates: Vec<_> = ["t1", "t2", "t3"].iter().map(|n| (n.to_string(), 1.0)).collect();
        for cooldown in 1..=2 {
            let mut picker = TransitionPicker::new(candidates.clone(), cooldown);
            let mut rng = StdRng::seed_from_u64(cooldown as u64);
            let mut history: Vec<String> = Vec::new();

            for _ in 0..200 {
                let pick = picker.pick(&mut rng).unwrap().to_string();
                let window = history.len().saturating_sub(cooldown);
                assert!(
                    !history[window..].contains(&pick),
                    "{} repeated within cooldown {}",
                    pick,
                    cooldown
                );
                picker.record(&pick);
                history.push(pick);
            }
        }
    }

    #[test]
    fn test_cooldown_falls_back_to_full_pool() {
        let mut picker = TransitionPicker::new(vec![("only".into(), 1.0)], 1);
        picker.record("only");
        assert_eq!(picker.pick(&mut StdRng::seed_from_u64(1)), Some("only"));
    }

    #[test]
    fn test_non_positive_weights_pick_uniformly() {
        let picker = TransitionPicker::new(vec![("a".into(), 0.0), ("b".into(), -1.0)], 0);
        let mut rng = StdRng::seed_from_u64(3);
        let seen: HashSet<_> = (0..50).map(|_| picker.pick(&mut rng).unwrap().to_string()).collect();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_partition_drops_unusable_ids() {
        let config = CompilerConfig {
            min_views: 0,
            ..Default::default()
        };
        let clips: Vec<_> = ["ok", "../../etc/x", "/abs", "_trans", "comp0"]
            .iter()
            .map(|id| ClipRecord::new(*id, "a", 10, "u"))
            .collect();

        let comps = partition_compilations(&clips, &config, &mut StdRng::seed_from_u64(1));

        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].clips.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_out_of_range_probability_is_clamped() {
        let (_dir, config) = setup(ASSETS);
        let config = config_with_assets(config);

        let mut always = sequencer(CompilerConfig { transition_probability: 5.0, ..config.clone() }, 3);
        let script = always.build_script(0, &prepared(&["a", "b"], &[])).await.unwrap();
        assert_eq!(script.len(), 2 + 2 * 4 + 1);

        for probability in [-1.0, f64::NAN] {
            let mut never = sequencer(CompilerConfig { transition_probability: probability, ..config.clone() }, 3);
            let script = never.build_script(0, &prepared(&["a", "b"], &[])).await.unwrap();
            assert_eq!(script.len(), 2 + 2 * 2 + 1);
        }
    }

    #[test]
    fn test_weights_are_respected() {
        let picker = TransitionPicker::new(vec![("never".into(), 0.0), ("always".into(), 1.0)], 0);
        let mut rng = StdRng::seed_from_u64(9);
        assert!((0..50).all(|_| picker.pick(&mut rng) == Some("always")));
    }

    #[tokio::test]
    async fn test_spacer_follows_every_clip() {
        let (_dir, config) = setup(ASSETS);
        let config = CompilerConfig {
            transition_probability: 1.0,
            ..config_with_assets(config)
        };
        let mut seq = sequencer(config, 42);

        let script = seq.build_script(0, &prepared(&["a", "b", "c"], &[])).await.unwrap();

        assert!(script.spacers_follow_clips());
        assert_eq!(script.clip_ids(), vec!["a", "b", "c"]);
        let lines = script.lines();
        assert!(matches!(&lines[0], SegmentLine::Asset { kind: AssetKind::Intro, .. }));
        assert!(lines[1].is_spacer());
        assert!(matches!(lines.last().unwrap(), SegmentLine::Asset { kind: AssetKind::Outro, .. }));
        // Probability 1.0: a transition and a spacer after every clip's spacer
        let transitions = lines
            .iter()
            .filter(|l| matches!(l, SegmentLine::Asset { kind: AssetKind::Transition, .. }))
            .count();
        assert_eq!(transitions, 3);
        assert_eq!(script.len(), 2 + 3 * 4 + 1);
    }

    #[tokio::test]
    async fn test_no_random_transitions() {
        let (_dir, config) = setup(ASSETS);
        let config = CompilerConfig {
            transition_probability: 1.0,
            no_random_transitions: true,
            ..config_with_assets(config)
        };
        let mut seq = sequencer(config, 1);

        let script = seq.build_script(0, &prepared(&["a", "b"], &[])).await.unwrap();
        assert_eq!(script.len(), 2 + 2 * 2 + 1);
    }

    #[tokio::test]
    async fn test_missing_optional_assets_are_skipped() {
        let (_dir, config) = setup(&["static.mp4"]);
        let mut seq = sequencer(config_with_assets(config), 5);

        let script = seq.build_script(0, &prepared(&["a"], &[])).await.unwrap();

        let rendered = script.render();
        assert_eq!(rendered, "file 'a/a.mp4'\nfile '_trans/static.mp4'\n");
    }

    #[tokio::test]
    async fn test_missing_spacer_is_an_error() {
        let (_dir, config) = setup(&["intro.mp4"]);
        let mut seq = sequencer(config_with_assets(config), 5);

        let err = seq.build_script(0, &prepared(&["a"], &[])).await.unwrap_err();
        assert!(matches!(err, WorkerError::MissingSpacer(name) if name == "static.mp4"));
    }

    #[tokio::test]
    async fn test_failed_clip_skipped_or_aborts() {
        let (_dir, config) = setup(&["static.mp4"]);
        let clips = prepared(&["a", "b", "c"], &["b"]);

        let mut seq = sequencer(config.clone(), 5);
        let script = seq.build_script(0, &clips).await.unwrap();
        assert_eq!(script.clip_ids(), vec!["a", "c"]);

        let mut strict = sequencer(
            CompilerConfig {
                skip_bad_clip: false,
                ..config
            },
            5,
        );
        let err = strict.build_script(1, &clips).await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::CompilationAborted { compilation: 1, position: 1, ref clip_id } if clip_id == "b"
        ));
    }

    #[tokio::test]
    async fn test_empty_compilation_gets_intro_and_outro_only() {
        let (_dir, config) = setup(ASSETS);
        let mut seq = sequencer(config_with_assets(config), 5);

        let script = seq.build_script(0, &[]).await.unwrap();
        assert_eq!(script.clip_count(), 0);
        assert_eq!(script.len(), 3);
    }

    #[tokio::test]
    async fn test_write_script() {
        let (_dir, config) = setup(&["static.mp4"]);
        let mut seq = sequencer(config.clone(), 5);
        let script = seq.build_script(2, &prepared(&["a"], &[])).await.unwrap();

        let path = seq.write_script(2, &script).await.unwrap();
        assert_eq!(path, config.cache_dir.join("comp2"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), script.render());
    }
}
