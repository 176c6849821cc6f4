//! FFmpeg command builders for every encoder pass of a compilation.
//!
//! Every builder produces a [`CommandSpec`] with progress reporting on
//! stderr (`-progress pipe:2`), so the runner can forward elapsed time and
//! keep error lines apart.

use std::path::Path;

use clipreel_models::encoding::LOUDNORM_FILTER;
use clipreel_models::{AssetManifestEntry, EncodingConfig};

use crate::template::CommandSpec;

/// Window (seconds) in which the author overlay is visible.
pub const OVERLAY_WINDOW: (u32, u32) = (3, 10);

/// Synthetic silent stereo source matching the target sample rate.
const SILENT_AUDIO_SOURCE: &str = "anullsrc=channel_layout=stereo:sample_rate=48000";

/// Audio handling for a transition asset encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetAudioMode {
    /// Keep the source audio and apply loudness normalization
    Loudnorm,
    /// Keep the source audio as is
    Plain,
    /// Drop the source audio and mix in a silent stereo track
    SynthSilent,
}

impl AssetAudioMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetAudioMode::Loudnorm => "loudnorm",
            AssetAudioMode::Plain => "plain",
            AssetAudioMode::SynthSilent => "synth_silent",
        }
    }

    /// Manifest record of an asset built with this mode.
    pub fn manifest_entry(&self) -> AssetManifestEntry {
        AssetManifestEntry {
            silent: matches!(self, AssetAudioMode::SynthSilent),
            audio_normalized: matches!(self, AssetAudioMode::Loudnorm),
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Common head of every ffmpeg invocation.
fn ffmpeg(program: &str) -> CommandSpec {
    CommandSpec::new(program).args([
        "-y",
        "-hide_banner",
        "-nostdin",
        "-loglevel",
        "error",
        "-nostats",
        "-progress",
        "pipe:2",
    ])
}

/// Re-encode a downloaded clip to the target format.
pub fn normalize_clip(
    program: &str,
    input: &Path,
    output: &Path,
    encoding: &EncodingConfig,
) -> CommandSpec {
    ffmpeg(program)
        .args(["-i".to_string(), path_arg(input)])
        .args(encoding.to_ffmpeg_args())
        .args(["-movflags", "+faststart"])
        .arg(path_arg(output))
        .with_label("ffmpeg-normalize")
}

/// Escape a value embedded in a filter graph option.
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.replace('\\', "/").chars() {
        if matches!(c, '\'' | ':' | ',' | ';' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Filter graph drawing the "clip by" box, author name and avatar.
pub fn overlay_filter(author: &str, fontfile: Option<&str>) -> String {
    let (from, to) = OVERLAY_WINDOW;
    let enable = format!("enable='between(t,{},{})'", from, to);
    let font = fontfile
        .filter(|f| !f.is_empty())
        .map(|f| format!("fontfile={}:", escape_filter_value(f)))
        .unwrap_or_default();

    format!(
        "[0:v]drawbox={enable}:x=0:y=(ih)-238:h=157:w=1000:color=black@0.7:t=fill,\
         drawtext={enable}:x=198:y=(h)-190:{font}fontsize=28:fontcolor=white@0.4:text='clip by',\
         drawtext={enable}:x=198:y=(h)-160:{font}fontsize=48:fontcolor=white@0.9:text='{author}'[boxed];\
         [1:v]scale=128:128[avatar];\
         [boxed][avatar]overlay={enable}:x=50:y=H-223[overlay]",
        enable = enable,
        font = font,
        author = escape_filter_value(author),
    )
}

/// Composite the avatar and author name onto a normalized clip.
pub fn overlay_clip(
    program: &str,
    input: &Path,
    avatar: &Path,
    output: &Path,
    author: &str,
    fontfile: Option<&str>,
    encoding: &EncodingConfig,
) -> CommandSpec {
    ffmpeg(program)
        .args(["-i".to_string(), path_arg(input)])
        .args(["-i".to_string(), path_arg(avatar)])
        .args(["-filter_complex".to_string(), overlay_filter(author, fontfile)])
        .args(["-map", "[overlay]", "-map", "0:a?"])
        .args(encoding.to_ffmpeg_args())
        .args(["-movflags", "+faststart"])
        .arg(path_arg(output))
        .with_label("ffmpeg-overlay")
}

/// Build a cached copy of an intro/outro/spacer/transition asset.
pub fn transition_asset(
    program: &str,
    input: &Path,
    output: &Path,
    mode: AssetAudioMode,
    encoding: &EncodingConfig,
) -> CommandSpec {
    let mut cmd = ffmpeg(program).args(["-i".to_string(), path_arg(input)]);

    if mode == AssetAudioMode::SynthSilent {
        cmd = cmd.args(["-f", "lavfi", "-i", SILENT_AUDIO_SOURCE, "-map", "0:v", "-map", "1:a"]);
    }

    cmd = cmd.args(encoding.frame_args()).args(encoding.video_args());
    if mode == AssetAudioMode::Loudnorm {
        cmd = cmd.args(["-af", LOUDNORM_FILTER]);
    }
    cmd = cmd.args(encoding.audio_args());
    if mode == AssetAudioMode::SynthSilent {
        cmd = cmd.arg("-shortest");
    }

    cmd.args(["-movflags", "+faststart"])
        .arg(path_arg(output))
        .with_label(format!("ffmpeg-asset-{}", mode.as_str()))
}

/// Encode a concat script into one compilation file.
pub fn concat(
    program: &str,
    script: &Path,
    output: &Path,
    encoding: &EncodingConfig,
) -> CommandSpec {
    ffmpeg(program)
        .args(["-f", "concat", "-safe", "0", "-i"])
        .arg(path_arg(script))
        .args(encoding.to_ffmpeg_args())
        .args(encoding.container_flags.iter().cloned())
        .arg(path_arg(output))
        .with_label("ffmpeg-concat")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_pair(cmd: &CommandSpec, flag: &str, value: &str) -> bool {
        cmd.arguments()
            .windows(2)
            .any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_normalize_targets_encoding() {
        let enc = EncodingConfig::default();
        let cmd = normalize_clip("ffmpeg", Path::new("c/clip.mp4"), Path::new("c/normalized.mp4"), &enc);
        assert!(has_pair(&cmd, "-i", "c/clip.mp4"));
        assert!(has_pair(&cmd, "-s", "1920x1080"));
        assert!(has_pair(&cmd, "-progress", "pipe:2"));
        assert_eq!(cmd.arguments().last().unwrap(), "c/normalized.mp4");
        assert!(!cmd.uses_shell());
    }

    #[test]
    fn test_asset_modes() {
        let enc = EncodingConfig::default();
        let src = Path::new("intro.mp4");
        let dst = Path::new("_trans/intro.mp4");

        let loud = transition_asset("ffmpeg", src, dst, AssetAudioMode::Loudnorm, &enc);
        assert!(has_pair(&loud, "-af", LOUDNORM_FILTER));
        assert!(!loud.arguments().contains(&"-shortest".to_string()));

        let plain = transition_asset("ffmpeg", src, dst, AssetAudioMode::Plain, &enc);
        assert!(!plain.arguments().contains(&"-af".to_string()));

        let silent = transition_asset("ffmpeg", src, dst, AssetAudioMode::SynthSilent, &enc);
        assert!(has_pair(&silent, "-i", SILENT_AUDIO_SOURCE));
        assert!(has_pair(&silent, "-map", "1:a"));
        assert!(silent.arguments().contains(&"-shortest".to_string()));
    }

    #[test]
    fn test_mode_manifest_entries() {
        assert!(AssetAudioMode::Loudnorm.manifest_entry().audio_normalized);
        assert!(!AssetAudioMode::Plain.manifest_entry().silent);
        assert!(AssetAudioMode::SynthSilent.manifest_entry().silent);
    }

    #[test]
    fn test_overlay_filter_escapes_values() {
        let filter = overlay_filter("Some One", Some("C:\\fonts\\a.ttf"));
        assert!(filter.contains("text='Some One'"));
        assert!(filter.contains("fontfile=C\\:/fonts/a.ttf:"));
        assert!(filter.contains("between(t,3,10)"));
        assert!(filter.ends_with("[overlay]"));

        let no_font = overlay_filter("x", None);
        assert!(!no_font.contains("fontfile"));
    }

    #[test]
    fn test_concat_uses_container_flags() {
        let enc = EncodingConfig::default();
        let cmd = concat("ffmpeg", Path::new("cache/comp0"), Path::new("cache/out.mp4"), &enc);
        assert!(has_pair(&cmd, "-f", "concat"));
        assert!(has_pair(&cmd, "-i", "cache/comp0"));
        assert!(has_pair(&cmd, "-movflags", "+faststart"));
    }
}
