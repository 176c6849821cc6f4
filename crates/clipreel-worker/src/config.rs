//! Compiler configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clipreel_media::ArgTemplate;
use clipreel_models::{AssetKind, EncodingConfig, TransitionAssetSpec};

use crate::error::{WorkerError, WorkerResult};

/// Name of the transition-asset subdirectory inside the cache.
pub const TRANSITION_CACHE_DIR: &str = "_trans";

/// Default downloader format selector.
pub const DEFAULT_DOWNLOAD_FORMAT: &str =
    "bestvideo[ext=mp4][height<=1080]+bestaudio[ext=m4a]/best[ext=mp4][height<=1080]";

const DEFAULT_DOWNLOADER_ARGS: &[&str] = &[
    "--no-color",
    "--no-check-certificate",
    "--quiet",
    "--progress",
    "--retries",
    "5",
    "--ffmpeg-location",
    "{ffmpeg}",
    "--merge-output-format",
    "mp4",
    "--format",
    "{format}",
    "-o",
    "{dest}",
    "{url}",
];

/// Immutable engine configuration, shared by `Arc` across components.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Scratch space: per-clip directories, concat scripts, encoded outputs
    pub cache_dir: PathBuf,
    /// Final output location
    pub output_dir: PathBuf,
    /// Directories searched, in order, for intro/outro/spacer/transition files
    pub transitions_roots: Vec<PathBuf>,

    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub downloader_path: String,
    /// Downloader argument templates (`{dest}`, `{url}`, `{format}`, `{ffmpeg}`)
    pub downloader_args: Vec<ArgTemplate>,
    pub download_format: String,
    /// Font used by the author overlay
    pub fontfile: Option<String>,

    /// Maximum clips per compilation
    pub clips_per_compilation: usize,
    /// Maximum compilations per run
    pub compilations: usize,
    /// Minimum view count for a clip to be eligible
    pub min_views: u64,

    /// Mandatory spacer asset
    pub static_asset: String,
    pub intro_assets: Vec<String>,
    pub outro_assets: Vec<String>,
    pub transition_assets: Vec<String>,
    /// Chance of a transition after each clip
    pub transition_probability: f64,
    pub no_random_transitions: bool,
    /// Per-transition selection weight (default 1.0)
    pub transition_weights: HashMap<String, f64>,
    /// Recent transitions excluded from the next pick
    pub transition_cooldown: usize,

    /// Loudness-normalize non-silent assets
    pub audio_normalize_transitions: bool,
    pub silence_static: bool,
    pub silence_transitions: bool,
    pub silence_intro_outro: bool,
    /// Force silence on every non-clip asset
    pub silence_nonclip_assets: bool,

    pub encoding: EncodingConfig,

    /// Worker count of the clip preparation pool
    pub max_concurrency: usize,
    /// Drop failed clips instead of aborting the compilation
    pub skip_bad_clip: bool,
    /// Re-download and re-encode clips whose final file exists
    pub rebuild: bool,
    /// Rebuild cached transition assets
    pub rebuild_transitions: bool,
    pub enable_overlay: bool,

    /// Keep scratch space after finalization
    pub keep_cache: bool,
    /// Clear scratch space including preserved directories
    pub purge_cache: bool,
    pub overwrite_output: bool,
    /// Cache subdirectories kept across runs
    pub cache_preserve_dirs: Vec<String>,

    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    /// Log full command lines at info level
    pub debug_commands: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
            output_dir: PathBuf::from("./output"),
            transitions_roots: vec![PathBuf::from("./transitions")],
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            downloader_path: "yt-dlp".to_string(),
            downloader_args: DEFAULT_DOWNLOADER_ARGS.iter().copied().map(ArgTemplate::from).collect(),
            download_format: DEFAULT_DOWNLOAD_FORMAT.to_string(),
            fontfile: Some("assets/fonts/Roboto-Medium.ttf".to_string()),
            clips_per_compilation: 12,
            compilations: 2,
            min_views: 1,
            static_asset: "static.mp4".to_string(),
            intro_assets: vec!["intro.mp4".to_string(), "intro_2.mp4".to_string()],
            outro_assets: vec!["outro.mp4".to_string(), "outro_2.mp4".to_string()],
            transition_assets: ["01", "02", "03", "05", "07", "08"]
                .iter()
                .map(|n| format!("transition_{}.mp4", n))
                .collect(),
            transition_probability: 0.35,
            no_random_transitions: false,
            transition_weights: HashMap::new(),
            transition_cooldown: 1,
            audio_normalize_transitions: true,
            silence_static: false,
            silence_transitions: false,
            silence_intro_outro: false,
            silence_nonclip_assets: false,
            encoding: EncodingConfig::default(),
            max_concurrency: 4,
            skip_bad_clip: true,
            rebuild: false,
            rebuild_transitions: false,
            enable_overlay: true,
            keep_cache: false,
            purge_cache: false,
            overwrite_output: false,
            cache_preserve_dirs: vec![TRANSITION_CACHE_DIR.to_string()],
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(1500),
            poll_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(2),
            debug_commands: false,
        }
    }
}

impl CompilerConfig {
    /// Create config from `CLIPREEL_*` environment variables over the defaults.
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("CLIPREEL_CACHE_DIR") {
            cfg.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = get("CLIPREEL_OUTPUT_DIR") {
            cfg.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("CLIPREEL_TRANSITIONS_DIRS") {
            cfg.transitions_roots = parse_list(&v).into_iter().map(PathBuf::from).collect();
        }
        if let Some(v) = get("CLIPREEL_FFMPEG") {
            cfg.ffmpeg_path = v;
        }
        if let Some(v) = get("CLIPREEL_FFPROBE") {
            cfg.ffprobe_path = v;
        }
        if let Some(v) = get("CLIPREEL_DOWNLOADER") {
            cfg.downloader_path = v;
        }
        if let Some(v) = get("CLIPREEL_DOWNLOAD_FORMAT") {
            cfg.download_format = v;
        }
        if let Some(v) = get("CLIPREEL_FONTFILE") {
            cfg.fontfile = Some(v);
        }

        parse_into(&get, "CLIPREEL_CLIPS_PER_COMPILATION", &mut cfg.clips_per_compilation)?;
        parse_into(&get, "CLIPREEL_COMPILATIONS", &mut cfg.compilations)?;
        parse_into(&get, "CLIPREEL_MIN_VIEWS", &mut cfg.min_views)?;

        if let Some(v) = get("CLIPREEL_STATIC_ASSET") {
            cfg.static_asset = v;
        }
        if let Some(v) = lookup("CLIPREEL_INTRO_ASSETS") {
            cfg.intro_assets = parse_list(&v);
        }
        if let Some(v) = lookup("CLIPREEL_OUTRO_ASSETS") {
            cfg.outro_assets = parse_list(&v);
        }
        if let Some(v) = lookup("CLIPREEL_TRANSITION_ASSETS") {
            cfg.transition_assets = parse_list(&v);
        }
        parse_into(&get, "CLIPREEL_TRANSITION_PROBABILITY", &mut cfg.transition_probability)?;
        parse_flag(&get, "CLIPREEL_NO_RANDOM_TRANSITIONS", &mut cfg.no_random_transitions)?;
        if let Some(v) = get("CLIPREEL_TRANSITION_WEIGHTS") {
            cfg.transition_weights = parse_weights(&v)?;
        }
        parse_into(&get, "CLIPREEL_TRANSITION_COOLDOWN", &mut cfg.transition_cooldown)?;

        parse_flag(&get, "CLIPREEL_AUDIO_NORMALIZE_TRANSITIONS", &mut cfg.audio_normalize_transitions)?;
        parse_flag(&get, "CLIPREEL_SILENCE_STATIC", &mut cfg.silence_static)?;
        parse_flag(&get, "CLIPREEL_SILENCE_TRANSITIONS", &mut cfg.silence_transitions)?;
        parse_flag(&get, "CLIPREEL_SILENCE_INTRO_OUTRO", &mut cfg.silence_intro_outro)?;
        parse_flag(&get, "CLIPREEL_SILENCE_NONCLIP_ASSETS", &mut cfg.silence_nonclip_assets)?;

        if let Some(v) = get("CLIPREEL_BITRATE") {
            cfg.encoding.bitrate = v;
        }
        if let Some(v) = get("CLIPREEL_AUDIO_BITRATE") {
            cfg.encoding.audio_bitrate = v;
        }
        if let Some(v) = get("CLIPREEL_FPS") {
            cfg.encoding.fps = v;
        }
        if let Some(v) = get("CLIPREEL_RESOLUTION") {
            cfg.encoding.resolution = v;
        }
        if let Some(v) = get("CLIPREEL_VIDEO_CODEC") {
            cfg.encoding.video_codec = v;
        }
        if let Some(v) = get("CLIPREEL_PRESET") {
            cfg.encoding.preset = v;
        }
        if let Some(v) = get("CLIPREEL_CQ") {
            cfg.encoding.cq = v;
        }
        if let Some(v) = get("CLIPREEL_CONTAINER_EXT") {
            cfg.encoding.container_ext = v;
        }

        parse_into(&get, "CLIPREEL_MAX_CONCURRENCY", &mut cfg.max_concurrency)?;
        parse_flag(&get, "CLIPREEL_SKIP_BAD_CLIP", &mut cfg.skip_bad_clip)?;
        parse_flag(&get, "CLIPREEL_REBUILD", &mut cfg.rebuild)?;
        parse_flag(&get, "CLIPREEL_REBUILD_TRANSITIONS", &mut cfg.rebuild_transitions)?;
        parse_flag(&get, "CLIPREEL_ENABLE_OVERLAY", &mut cfg.enable_overlay)?;
        parse_flag(&get, "CLIPREEL_KEEP_CACHE", &mut cfg.keep_cache)?;
        parse_flag(&get, "CLIPREEL_PURGE_CACHE", &mut cfg.purge_cache)?;
        parse_flag(&get, "CLIPREEL_OVERWRITE_OUTPUT", &mut cfg.overwrite_output)?;
        if let Some(v) = lookup("CLIPREEL_CACHE_PRESERVE_DIRS") {
            cfg.cache_preserve_dirs = parse_list(&v);
        }

        parse_into(&get, "CLIPREEL_RETRY_ATTEMPTS", &mut cfg.retry_attempts)?;
        if let Some(ms) = parse_opt::<u64>(&get, "CLIPREEL_RETRY_BASE_DELAY_MS")? {
            cfg.retry_base_delay = Duration::from_millis(ms);
        }
        parse_flag(&get, "CLIPREEL_DEBUG", &mut cfg.debug_commands)?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.clips_per_compilation == 0 {
            return Err(WorkerError::config_error("clips_per_compilation must be at least 1"));
        }
        if self.max_concurrency == 0 {
            return Err(WorkerError::config_error("max_concurrency must be at least 1"));
        }
        if self.retry_attempts == 0 {
            return Err(WorkerError::config_error("retry_attempts must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.transition_probability) {
            return Err(WorkerError::config_error(format!(
                "transition_probability must be within 0..=1, got {}",
                self.transition_probability
            )));
        }
        if self.static_asset.trim().is_empty() {
            return Err(WorkerError::config_error("static_asset must be set"));
        }
        Ok(())
    }

    /// Directory holding built transition assets and their manifest.
    pub fn transition_cache_dir(&self) -> PathBuf {
        self.cache_dir.join(TRANSITION_CACHE_DIR)
    }

    /// Whether assets of this kind get a synthetic silent track.
    pub fn is_forced_silent(&self, kind: AssetKind) -> bool {
        self.silence_nonclip_assets
            || match kind {
                AssetKind::Static => self.silence_static,
                AssetKind::Transition => self.silence_transitions,
                AssetKind::Intro | AssetKind::Outro => self.silence_intro_outro,
            }
    }

    /// Desired build parameters for one asset.
    pub fn asset_spec(&self, name: &str, kind: AssetKind) -> TransitionAssetSpec {
        TransitionAssetSpec::new(
            name,
            kind,
            self.is_forced_silent(kind),
            self.audio_normalize_transitions,
        )
    }

    /// Selection weight of a transition.
    pub fn transition_weight(&self, name: &str) -> f64 {
        self.transition_weights.get(name).copied().unwrap_or(1.0)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `name=weight` pairs, comma separated.
fn parse_weights(raw: &str) -> WorkerResult<HashMap<String, f64>> {
    parse_list(raw)
        .into_iter()
        .map(|pair| {
            let (name, weight) = pair
                .split_once('=')
                .ok_or_else(|| WorkerError::config_error(format!("invalid transition weight '{}'", pair)))?;
            let weight: f64 = weight
                .trim()
                .parse()
                .map_err(|_| WorkerError::config_error(format!("invalid transition weight '{}'", pair)))?;
            Ok((name.trim().to_string(), weight))
        })
        .collect()
}

fn parse_opt<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> WorkerResult<Option<T>> {
    match get(key) {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| WorkerError::config_error(format!("{} has invalid value '{}'", key, v))),
        None => Ok(None),
    }
}

fn parse_into<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> WorkerResult<()> {
    if let Some(v) = parse_opt(get, key)? {
        *slot = v;
    }
    Ok(())
}

fn parse_flag(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) -> WorkerResult<()> {
    if let Some(v) = get(key) {
        *slot = match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(WorkerError::config_error(format!(
                    "{} has invalid boolean '{}'",
                    key, v
                )))
            }
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = CompilerConfig::default();
        assert_eq!(cfg.clips_per_compilation, 12);
        assert_eq!(cfg.transition_assets.len(), 6);
        assert_eq!(cfg.transition_assets[3], "transition_05.mp4");
        assert_eq!(cfg.cache_preserve_dirs, vec!["_trans"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let cfg = CompilerConfig::from_lookup(lookup(&[
            ("CLIPREEL_CLIPS_PER_COMPILATION", "3"),
            ("CLIPREEL_MIN_VIEWS", "0"),
            ("CLIPREEL_SKIP_BAD_CLIP", "no"),
            ("CLIPREEL_INTRO_ASSETS", ""),
            ("CLIPREEL_TRANSITION_WEIGHTS", "transition_01.mp4=3, transition_02.mp4=0.5"),
            ("CLIPREEL_TRANSITIONS_DIRS", "/a, /b"),
        ]))
        .unwrap();

        assert_eq!(cfg.clips_per_compilation, 3);
        assert_eq!(cfg.min_views, 0);
        assert!(!cfg.skip_bad_clip);
        assert!(cfg.intro_assets.is_empty());
        assert_eq!(cfg.transition_weight("transition_01.mp4"), 3.0);
        assert_eq!(cfg.transition_weight("transition_03.mp4"), 1.0);
        assert_eq!(cfg.transitions_roots, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(CompilerConfig::from_lookup(lookup(&[("CLIPREEL_COMPILATIONS", "many")])).is_err());
        assert!(CompilerConfig::from_lookup(lookup(&[("CLIPREEL_REBUILD", "maybe")])).is_err());
        assert!(CompilerConfig::from_lookup(lookup(&[("CLIPREEL_TRANSITION_PROBABILITY", "1.5")])).is_err());
        assert!(CompilerConfig::from_lookup(lookup(&[("CLIPREEL_MAX_CONCURRENCY", "0")])).is_err());
    }

    #[test]
    fn test_forced_silence_per_kind() {
        let mut cfg = CompilerConfig {
            silence_static: true,
            ..Default::default()
        };
        assert!(cfg.is_forced_silent(AssetKind::Static));
        assert!(!cfg.is_forced_silent(AssetKind::Intro));

        let spec = cfg.asset_spec("static.mp4", AssetKind::Static);
        assert!(spec.is_forced_silent);
        assert!(!spec.wants_loudness_normalize);
        assert!(cfg.asset_spec("intro.mp4", AssetKind::Intro).wants_loudness_normalize);

        cfg.silence_nonclip_assets = true;
        assert!(cfg.is_forced_silent(AssetKind::Transition));
    }
}
