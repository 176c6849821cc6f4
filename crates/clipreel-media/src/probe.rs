//! FFprobe helpers used for progress totals and audio detection.

use std::path::Path;

use tracing::debug;

use crate::command::ProcessRunner;
use crate::error::MediaResult;
use crate::template::CommandSpec;

/// Thin ffprobe wrapper over a [`ProcessRunner`].
///
/// Probe failures other than shutdown or a missing executable degrade to
/// "unknown" (`None` / `false`) instead of failing the caller.
#[derive(Debug, Clone)]
pub struct Prober {
    runner: ProcessRunner,
    ffprobe: String,
}

impl Prober {
    pub fn new(runner: ProcessRunner, ffprobe: impl Into<String>) -> Self {
        Self {
            runner,
            ffprobe: ffprobe.into(),
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.ffprobe).args(["-v", "error"])
    }

    /// Container duration in seconds.
    pub async fn duration(&self, path: impl AsRef<Path>) -> MediaResult<Option<f64>> {
        let path = path.as_ref();
        let spec = self
            .command()
            .args([
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path.to_string_lossy());

        let out = self.runner.run_capture(&spec).await?;
        if !out.success {
            debug!(path = %path.display(), "Duration probe failed");
            return Ok(None);
        }
        Ok(parse_duration(&out.stdout_text()))
    }

    /// Whether the file has at least one audio stream.
    pub async fn has_audio(&self, path: impl AsRef<Path>) -> MediaResult<bool> {
        let path = path.as_ref();
        let spec = self
            .command()
            .args([
                "-select_streams",
                "a:0",
                "-show_entries",
                "stream=codec_type",
                "-of",
                "csv=p=0",
            ])
            .arg(path.to_string_lossy());

        let out = self.runner.run_capture(&spec).await?;
        Ok(out.success && out.stdout_text().contains("audio"))
    }

    /// Sum of the durations of the files referenced by a concat script.
    ///
    /// Paths in the script are resolved against `base_dir`. Returns `None`
    /// when nothing could be probed.
    pub async fn concat_duration(
        &self,
        script: &str,
        base_dir: impl AsRef<Path>,
    ) -> MediaResult<Option<f64>> {
        let base_dir = base_dir.as_ref();
        let mut total = 0.0;

        for rel in concat_entries(script) {
            if let Some(d) = self.duration(base_dir.join(rel)).await? {
                if d > 0.0 {
                    total += d;
                }
            }
        }

        Ok((total > 0.0).then_some(total))
    }
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

/// Paths of the `file '...'` directives of a concat script, unescaped.
pub fn concat_entries(script: &str) -> Vec<String> {
    script
        .lines()
        .filter_map(|line| line.trim().strip_prefix("file "))
        .map(|rest| {
            let rest = rest.trim();
            match rest.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
                Some(inner) => inner.replace(r"'\''", "'"),
                None => rest.to_string(),
            }
        })
        .collect()
}
