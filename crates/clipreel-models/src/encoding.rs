//! Target encoding parameters shared by every encoder pass.

use serde::{Deserialize, Serialize};

/// Default video codec (NVENC H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "h264_nvenc";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default maximum video bitrate
pub const DEFAULT_BITRATE: &str = "12M";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";
/// Default output frame rate
pub const DEFAULT_FPS: &str = "60";
/// Default output resolution
pub const DEFAULT_RESOLUTION: &str = "1920x1080";
/// Audio sample rate every segment is resampled to
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
/// Loudness normalization filter applied to transition assets
pub const LOUDNORM_FILTER: &str = "loudnorm=I=-16:TP=-1.5:LRA=11";

/// Encoding configuration applied to clips, assets and the final concat.
///
/// All segments of a compilation must share these parameters so the concat
/// step can join them safely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Maximum video bitrate (e.g., "12M")
    pub bitrate: String,
    /// Audio bitrate (e.g., "192k")
    pub audio_bitrate: String,
    /// Output frame rate
    pub fps: String,
    /// Output resolution as WIDTHxHEIGHT
    pub resolution: String,
    /// Video codec (e.g., "h264_nvenc", "libx264")
    pub video_codec: String,
    /// Audio codec
    pub audio_codec: String,
    /// Encoder preset
    pub preset: String,
    /// Constant quality value (NVENC `-cq`, x264 `-crf`)
    pub cq: String,
    /// Keyframe interval
    pub gop: String,
    pub rc_lookahead: String,
    pub spatial_aq: String,
    pub aq_strength: String,
    pub temporal_aq: String,
    /// Container extension of compiled outputs
    pub container_ext: String,
    /// Extra muxer flags for compiled outputs
    pub container_flags: Vec<String>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
            fps: DEFAULT_FPS.to_string(),
            resolution: DEFAULT_RESOLUTION.to_string(),
            video_codec: DEFAULT_VIDEO_CODEC.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            preset: "slow".to_string(),
            cq: "19".to_string(),
            gop: "120".to_string(),
            rc_lookahead: "20".to_string(),
            spatial_aq: "1".to_string(),
            aq_strength: "8".to_string(),
            temporal_aq: "1".to_string(),
            container_ext: "mp4".to_string(),
            container_flags: vec!["-movflags".to_string(), "+faststart".to_string()],
        }
    }
}

impl EncodingConfig {
    /// Create a new encoding configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the software x264 encoder instead of NVENC.
    pub fn with_software_encoder(mut self) -> Self {
        self.video_codec = "libx264".to_string();
        self.preset = "medium".to_string();
        self
    }

    fn uses_nvenc(&self) -> bool {
        self.video_codec.contains("nvenc")
    }

    /// Frame rate and scaling arguments.
    pub fn frame_args(&self) -> Vec<String> {
        vec![
            "-r".to_string(),
            self.fps.clone(),
            "-s".to_string(),
            self.resolution.clone(),
            "-sws_flags".to_string(),
            "lanczos".to_string(),
        ]
    }

    /// Video codec arguments, including rate control and tuning.
    pub fn video_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.video_codec.clone()];

        // NVENC takes -cq with VBR rate control, x264 takes -crf
        if self.uses_nvenc() {
            args.extend(
                [
                    "-rc", "vbr", "-cq", self.cq.as_str(), "-b:v", "0", "-maxrate", self.bitrate.as_str(),
                    "-bufsize", self.bitrate.as_str(), "-profile:v", "high", "-level", "4.2", "-g",
                    self.gop.as_str(), "-bf", "3", "-rc-lookahead", self.rc_lookahead.as_str(), "-spatial_aq",
                    self.spatial_aq.as_str(), "-aq-strength", self.aq_strength.as_str(), "-temporal-aq",
                    self.temporal_aq.as_str(),
                ]
                .map(str::to_string),
            );
        } else {
            args.extend(
                [
                    "-crf", self.cq.as_str(), "-maxrate", self.bitrate.as_str(), "-bufsize", self.bitrate.as_str(),
                    "-profile:v", "high", "-g", self.gop.as_str(),
                ]
                .map(str::to_string),
            );
        }

        args.extend(["-pix_fmt", "yuv420p", "-preset", self.preset.as_str()].map(str::to_string));
        args
    }

    /// Audio codec arguments, resampled to 48 kHz stereo.
    pub fn audio_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
            "-ar".to_string(),
            AUDIO_SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            "2".to_string(),
        ]
    }

    /// Full output arguments for a segment encode (frame, video, audio).
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = self.frame_args();
        args.extend(self.video_args());
        args.extend(self.audio_args());
        args
    }
}
