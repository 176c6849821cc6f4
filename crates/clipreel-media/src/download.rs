//! Clip download through the configured downloader and avatar fetching.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tracing::{debug, warn};

use crate::command::ProcessRunner;
use crate::error::{MediaError, MediaResult};
use crate::shutdown::ShutdownSignal;
use crate::template::{ArgTemplate, CommandSpec, TemplateVars};

/// Edge length avatars are thumbnailed to.
pub const AVATAR_SIZE: u32 = 128;

const AVATAR_TIMEOUT: Duration = Duration::from_secs(15);

/// Downloader invocation: program plus argument templates.
///
/// Templates may use `{dest}`, `{url}`, `{format}` and `{ffmpeg}`.
#[derive(Debug, Clone)]
pub struct Downloader {
    runner: ProcessRunner,
    program: String,
    args: Vec<ArgTemplate>,
    format: String,
    ffmpeg: String,
}

impl Downloader {
    pub fn new(
        runner: ProcessRunner,
        program: impl Into<String>,
        args: Vec<ArgTemplate>,
        format: impl Into<String>,
        ffmpeg: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            args,
            format: format.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Render the command for one download.
    pub fn command(&self, url: &str, dest: &Path) -> MediaResult<CommandSpec> {
        let vars = TemplateVars::new()
            .set("dest", dest.to_string_lossy())
            .set("url", url)
            .set("format", &self.format)
            .set("ffmpeg", &self.ffmpeg);
        Ok(CommandSpec::from_templates(&self.program, &self.args, &vars)?.with_label("downloader"))
    }

    /// Download `url` to `dest`.
    ///
    /// A zero exit without the destination file is still a failure.
    pub async fn download(&self, url: &str, dest: &Path) -> MediaResult<()> {
        if url.trim().is_empty() {
            return Err(MediaError::download_failed("empty source URL"));
        }

        let spec = self.command(url, dest)?;
        let out = self.runner.run(&spec).await?;
        if !out.success {
            let tail = out.diagnostic_tail();
            return Err(MediaError::download_failed(match out.exit_code {
                Some(code) if tail.is_empty() => format!("downloader exited with status {}", code),
                Some(code) => format!("downloader exited with status {}: {}", code, tail),
                None => "downloader terminated by signal".to_string(),
            }));
        }

        match tokio::fs::metadata(dest).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(MediaError::download_failed(format!(
                "downloader produced no file at {}",
                dest.display()
            ))),
        }
    }
}

/// Fetches author avatars over HTTP and stores them as PNG thumbnails.
#[derive(Debug, Clone)]
pub struct AvatarFetcher {
    client: reqwest::Client,
    shutdown: ShutdownSignal,
}

impl AvatarFetcher {
    pub fn new(shutdown: ShutdownSignal) -> MediaResult<Self> {
        let client = reqwest::Client::builder().timeout(AVATAR_TIMEOUT).build()?;
        Ok(Self { client, shutdown })
    }

    pub fn with_client(client: reqwest::Client, shutdown: ShutdownSignal) -> Self {
        Self { client, shutdown }
    }

    /// Ensure `dest` holds an avatar image.
    ///
    /// An existing file is kept. Fetch or decode failures fall back to the
    /// placeholder; only shutdown and filesystem errors are returned.
    pub async fn ensure_avatar(&self, url: &str, dest: &Path) -> MediaResult<PathBuf> {
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            return Ok(dest.to_path_buf());
        }

        match self.fetch(url).await {
            Ok(bytes) => match write_thumbnail(bytes, dest.to_path_buf()).await {
                Ok(()) => return Ok(dest.to_path_buf()),
                Err(e) => warn!(url, error = %e, "Avatar decode failed, using placeholder"),
            },
            Err(MediaError::Interrupted) => return Err(MediaError::Interrupted),
            Err(e) => warn!(url, error = %e, "Avatar fetch failed, using placeholder"),
        }

        write_placeholder(dest.to_path_buf()).await?;
        Ok(dest.to_path_buf())
    }

    async fn fetch(&self, url: &str) -> MediaResult<Vec<u8>> {
        if url.trim().is_empty() {
            return Err(MediaError::AvatarFailed("no avatar URL".to_string()));
        }
        if self.shutdown.is_signaled() {
            return Err(MediaError::Interrupted);
        }

        let request = async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            let bytes = response.bytes().await?;
            Ok::<_, MediaError>(bytes.to_vec())
        };

        tokio::select! {
            result = request => {
                let bytes = result?;
                debug!(url, bytes = bytes.len(), "Fetched avatar");
                Ok(bytes)
            }
            _ = self.shutdown.signaled() => Err(MediaError::Interrupted),
        }
    }
}

/// Decode, thumbnail and write as PNG.
async fn write_thumbnail(bytes: Vec<u8>, dest: PathBuf) -> MediaResult<()> {
    tokio::task::spawn_blocking(move || -> MediaResult<()> {
        let img = image::load_from_memory(&bytes)?;
        let thumb = img.thumbnail(AVATAR_SIZE, AVATAR_SIZE);
        save_png(&thumb, &dest)
    })
    .await
    .map_err(|e| MediaError::AvatarFailed(e.to_string()))?
}

/// Write a flat grey square so the overlay pass always has an input.
pub async fn write_placeholder(dest: PathBuf) -> MediaResult<()> {
    tokio::task::spawn_blocking(move || -> MediaResult<()> {
        let img = RgbaImage::from_pixel(AVATAR_SIZE, AVATAR_SIZE, Rgba([64, 64, 64, 255]));
        save_png(&DynamicImage::ImageRgba8(img), &dest)
    })
    .await
    .map_err(|e| MediaError::AvatarFailed(e.to_string()))?
}

fn save_png(img: &DynamicImage, dest: &Path) -> MediaResult<()> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    std::fs::write(dest, buf.into_inner())?;
    Ok(())
}
