//! Transition asset cache.
//!
//! Builds normalized copies of intro, outro, spacer and transition files in
//! `{cache}/_trans`, and keeps a manifest of the audio parameters each copy
//! was built with. The manifest is the only staleness signal: a copy is
//! reused only when its recorded parameters equal the desired ones.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clipreel_media::{encode, AssetAudioMode, MediaResult, ProcessRunner, Prober, ShutdownSignal};
use clipreel_models::{AssetManifest, AssetManifestEntry, EncodingConfig, TransitionAssetSpec};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{CompilerConfig, TRANSITION_CACHE_DIR};
use crate::error::WorkerResult;
use crate::metrics;

/// File name of the persisted manifest inside the asset directory.
pub const MANIFEST_FILE: &str = "_manifest.json";

/// Key-value store of asset build provenance.
pub trait ManifestStore: Send {
    fn get(&self, name: &str) -> Option<AssetManifestEntry>;
    fn put(&mut self, name: &str, entry: AssetManifestEntry);
    fn flush(&mut self) -> WorkerResult<()>;
}

/// Manifest persisted as pretty JSON next to the built assets.
#[derive(Debug)]
pub struct JsonManifestStore {
    path: PathBuf,
    entries: AssetManifest,
    dirty: bool,
}

impl JsonManifestStore {
    /// Load the manifest; a missing or unreadable file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Asset manifest unreadable, starting fresh");
                AssetManifest::new()
            }),
            Err(_) => AssetManifest::new(),
        };
        Self {
            path,
            entries,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ManifestStore for JsonManifestStore {
    fn get(&self, name: &str) -> Option<AssetManifestEntry> {
        self.entries.get(name).copied()
    }

    fn put(&mut self, name: &str, entry: AssetManifestEntry) {
        if self.entries.insert(name.to_string(), entry) != Some(entry) {
            self.dirty = true;
        }
    }

    fn flush(&mut self) -> WorkerResult<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        Ok(())
    }
}

/// In-memory manifest for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    entries: AssetManifest,
    flushes: usize,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl ManifestStore for MemoryManifestStore {
    fn get(&self, name: &str) -> Option<AssetManifestEntry> {
        self.entries.get(name).copied()
    }

    fn put(&mut self, name: &str, entry: AssetManifestEntry) {
        self.entries.insert(name.to_string(), entry);
    }

    fn flush(&mut self) -> WorkerResult<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Produces cached asset copies.
#[async_trait]
pub trait AssetEncoder: Send + Sync {
    /// Whether the source has an audio stream.
    async fn has_audio(&self, src: &Path) -> MediaResult<bool>;

    /// Encode `src` into `dst` with the given audio handling.
    async fn encode(&self, src: &Path, dst: &Path, mode: AssetAudioMode) -> MediaResult<()>;
}

/// FFmpeg-backed asset encoder.
#[derive(Debug, Clone)]
pub struct FfmpegAssetEncoder {
    runner: ProcessRunner,
    prober: Prober,
    ffmpeg: String,
    encoding: EncodingConfig,
}

impl FfmpegAssetEncoder {
    pub fn new(runner: ProcessRunner, config: &CompilerConfig) -> Self {
        Self {
            prober: Prober::new(runner.clone(), &config.ffprobe_path),
            runner,
            ffmpeg: config.ffmpeg_path.clone(),
            encoding: config.encoding.clone(),
        }
    }
}

#[async_trait]
impl AssetEncoder for FfmpegAssetEncoder {
    async fn has_audio(&self, src: &Path) -> MediaResult<bool> {
        self.prober.has_audio(src).await
    }

    async fn encode(&self, src: &Path, dst: &Path, mode: AssetAudioMode) -> MediaResult<()> {
        let spec = encode::transition_asset(&self.ffmpeg, src, dst, mode, &self.encoding);
        self.runner.run(&spec).await?.ensure_success("ffmpeg")?;
        Ok(())
    }
}

/// A built asset ready to be referenced from a concat script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsset {
    pub name: String,
    /// Absolute location of the built copy
    pub path: PathBuf,
    /// Path relative to the cache directory, as written in concat scripts
    pub relative: String,
}

/// Audio modes to try, in order.
fn build_ladder(spec: &TransitionAssetSpec, has_audio: bool) -> Vec<AssetAudioMode> {
    if spec.is_forced_silent {
        return vec![AssetAudioMode::SynthSilent];
    }
    if !has_audio {
        return vec![AssetAudioMode::SynthSilent];
    }
    if spec.wants_loudness_normalize {
        vec![
            AssetAudioMode::Loudnorm,
            AssetAudioMode::Plain,
            AssetAudioMode::SynthSilent,
        ]
    } else {
        vec![AssetAudioMode::Plain, AssetAudioMode::SynthSilent]
    }
}

/// On-demand builder of normalized non-clip assets.
pub struct TransitionAssetCache<E, M> {
    config: Arc<CompilerConfig>,
    encoder: E,
    manifest: Mutex<M>,
    shutdown: ShutdownSignal,
}

impl<E: AssetEncoder, M: ManifestStore> TransitionAssetCache<E, M> {
    pub fn new(config: Arc<CompilerConfig>, encoder: E, manifest: M, shutdown: ShutdownSignal) -> Self {
        Self {
            config,
            encoder,
            manifest: Mutex::new(manifest),
            shutdown,
        }
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Locate the source file for an asset name.
    ///
    /// Absolute names are used as is; otherwise the configured roots are
    /// searched in order.
    pub fn resolve_source(&self, name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_absolute() {
            return direct.is_file().then(|| direct.to_path_buf());
        }
        self.config
            .transitions_roots
            .iter()
            .map(|root| root.join(name))
            .find(|p| p.is_file())
    }

    /// Ensure a cached copy matching `spec` exists.
    ///
    /// `Ok(None)` means the asset is unavailable (missing source or every
    /// build attempt failed) and should be skipped. Errors are reserved for
    /// shutdown and missing executables.
    pub async fn ensure(&self, spec: &TransitionAssetSpec) -> WorkerResult<Option<CachedAsset>> {
        if self.shutdown.is_signaled() {
            return Err(clipreel_media::MediaError::Interrupted.into());
        }

        let Some(src) = self.resolve_source(&spec.name) else {
            warn!(asset = %spec.name, kind = %spec.kind, "Asset file missing, skipping");
            return Ok(None);
        };

        let file_name = match Path::new(&spec.name).file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => {
                warn!(asset = %spec.name, "Asset name has no file name, skipping");
                return Ok(None);
            }
        };
        let dst = self.config.transition_cache_dir().join(&file_name);
        let asset = CachedAsset {
            name: file_name.clone(),
            path: dst.clone(),
            relative: format!("{}/{}", TRANSITION_CACHE_DIR, file_name),
        };

        // Held for the whole check-build-record sequence
        let mut manifest = self.manifest.lock().await;

        let desired = spec.desired_entry();
        if !self.config.rebuild_transitions
            && dst.is_file()
            && manifest.get(&file_name) == Some(desired)
        {
            debug!(asset = %file_name, "Asset cache hit");
            metrics::record_asset_cache_hit();
            return Ok(Some(asset));
        }

        tokio::fs::create_dir_all(self.config.transition_cache_dir()).await?;
        let has_audio = match self.encoder.has_audio(&src).await {
            Ok(has_audio) => has_audio,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(asset = %file_name, error = %e, "Audio probe failed, treating as silent");
                false
            }
        };

        for (i, mode) in build_ladder(spec, has_audio).into_iter().enumerate() {
            if self.shutdown.is_signaled() {
                return Err(clipreel_media::MediaError::Interrupted.into());
            }

            match self.encoder.encode(&src, &dst, mode).await {
                Ok(()) => {
                    metrics::record_asset_build(mode.as_str(), true);
                    // A first-attempt build realizes the desired parameters;
                    // fallbacks record what was actually built.
                    let entry = if i == 0 { desired } else { mode.manifest_entry() };
                    manifest.put(&file_name, entry);
                    if let Err(e) = manifest.flush() {
                        warn!(asset = %file_name, error = %e, "Failed to persist asset manifest");
                    }
                    info!(asset = %file_name, mode = mode.as_str(), "Built transition asset");
                    return Ok(Some(asset));
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    metrics::record_asset_build(mode.as_str(), false);
                    warn!(
                        asset = %file_name,
                        mode = mode.as_str(),
                        error = %e,
                        diagnostics = e.diagnostics().unwrap_or(""),
                        "Asset build failed"
                    );
                }
            }
        }

        warn!(asset = %file_name, "Asset unavailable after all build attempts");
        Ok(None)
    }

    /// Ensure `name` with parameters taken from the configuration.
    pub async fn ensure_named(
        &self,
        name: &str,
        kind: clipreel_models::AssetKind,
    ) -> WorkerResult<Option<CachedAsset>> {
        self.ensure(&self.config.asset_spec(name, kind)).await
    }

    /// Run `f` against the manifest.
    pub async fn with_manifest<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&*self.manifest.lock().await)
    }
}
