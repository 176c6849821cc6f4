//! Filesystem helpers for scratch-space management.
//!
//! Compilation outputs are produced in the cache directory and moved to the
//! output directory, which may live on another filesystem.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::MediaResult;

/// Move a file, falling back to copy + delete across filesystems.
///
/// The cross-device copy goes through a temporary sibling of `dst` and is
/// renamed into place, so `dst` never holds a partial file.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(src = %src.display(), dst = %dst.display(), "Cross-device move, copying");
            let partial = dst.with_extension("partial");
            if let Err(e) = fs::copy(src, &partial).await {
                let _ = fs::remove_file(&partial).await;
                return Err(e.into());
            }
            if let Err(e) = fs::rename(&partial, dst).await {
                let _ = fs::remove_file(&partial).await;
                return Err(e.into());
            }
            if let Err(e) = fs::remove_file(src).await {
                warn!(src = %src.display(), error = %e, "Could not remove source after copy");
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV on Linux and macOS
    e.raw_os_error() == Some(18)
}

/// Remove a file; a missing file is not an error.
pub async fn remove_file_if_exists(path: impl AsRef<Path>) -> MediaResult<bool> {
    match fs::remove_file(path.as_ref()).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Delete every entry of `dir` except the top-level names in `preserve`
/// (compared case-insensitively).
///
/// Best-effort per entry: failures are logged and counted, not returned.
/// Returns the number of entries removed.
pub async fn clear_dir_except(dir: impl AsRef<Path>, preserve: &[String]) -> MediaResult<usize> {
    let dir = dir.as_ref();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if preserve.iter().any(|p| name.trim().eq_ignore_ascii_case(p.trim())) {
            continue;
        }

        let path = entry.path();
        let result = match entry.file_type().await {
            Ok(ft) if ft.is_dir() => fs::remove_dir_all(&path).await,
            _ => fs::remove_file(&path).await,
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache entry"),
        }
    }

    Ok(removed)
}
