//! Output naming, relocation and scratch cleanup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use clipreel_media::fs_utils;
use tracing::{info, warn};

use crate::config::CompilerConfig;
use crate::error::WorkerResult;

/// Identity used when the supplied one sanitizes to nothing.
pub const DEFAULT_IDENTITY: &str = "broadcaster";

const MAX_IDENTITY_LEN: usize = 80;

/// Lowercase and reduce to `[A-Za-z0-9._-]`, collapsing other runs to `_`.
pub fn sanitize_identity(identity: &str) -> String {
    let mut out = String::with_capacity(identity.len());
    let mut in_run = false;
    for c in identity.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out.truncate(MAX_IDENTITY_LEN);
    if out.is_empty() {
        DEFAULT_IDENTITY.to_string()
    } else {
        out
    }
}

/// Look-back window the clips were collected from, as ISO-8601 strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl DateWindow {
    pub fn new(start: Option<String>, end: Option<String>) -> Self {
        Self { start, end }
    }

    /// `<start>_to_<end>` from the date parts, or `today` when no bound is set.
    pub fn label(&self, today: NaiveDate) -> String {
        fn date_part(iso: &Option<String>) -> Option<&str> {
            iso.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.split('T').next().unwrap_or(s))
        }

        match (date_part(&self.start), date_part(&self.end)) {
            (None, None) => today.format("%Y-%m-%d").to_string(),
            (start, end) => {
                let start = start.unwrap_or("unknown");
                format!("{}_to_{}", start, end.unwrap_or(start))
            }
        }
    }
}

/// Final file names for `count` compilations.
pub fn output_names(identity: &str, window: &DateWindow, count: usize, ext: &str) -> Vec<String> {
    let base = format!(
        "{}_{}",
        sanitize_identity(identity),
        window.label(Utc::now().date_naive())
    );
    (0..count)
        .map(|i| {
            if count == 1 {
                format!("{}_compilation.{}", base, ext)
            } else {
                format!("{}_part{}.{}", base, i + 1, ext)
            }
        })
        .collect()
}

/// Make names unique against `out_dir` and each other by appending `_1`,
/// `_2`, ... before the extension. Comparison is case-insensitive.
pub fn ensure_unique_names(names: &[String], out_dir: &Path, overwrite: bool) -> Vec<String> {
    if overwrite {
        return names.to_vec();
    }

    let mut used: HashSet<String> = std::fs::read_dir(out_dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().to_lowercase())
                .collect()
        })
        .unwrap_or_default();

    names
        .iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut k = 1;
            while used.contains(&candidate.to_lowercase()) {
                candidate = with_suffix(name, k);
                k += 1;
            }
            used.insert(candidate.to_lowercase());
            candidate
        })
        .collect()
}

fn with_suffix(name: &str, k: usize) -> String {
    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!("{}_{}.{}", stem.to_string_lossy(), k, ext.to_string_lossy()),
        _ => format!("{}_{}", name, k),
    }
}

/// Scratch name the concat encode writes compilation `index` to.
pub fn cache_output_name(index: usize, date: &str, ext: &str) -> String {
    format!("complete_{}_{}.{}", date, index, ext)
}

/// Today's `cache_output_name` date component.
pub fn cache_output_date() -> String {
    Local::now().format("%d_%m_%y").to_string()
}

/// What finalization did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Final names, after any last-resort suffixing
    pub names: Vec<String>,
    pub moved: Vec<PathBuf>,
    /// Compilation indexes with no encoded output in the cache
    pub missing: Vec<usize>,
    /// Cache entries removed, `None` when the cache was kept
    pub cache_removed: Option<usize>,
}

/// Moves encoded compilations to the output directory.
#[derive(Debug, Clone)]
pub struct OutputFinalizer {
    config: Arc<CompilerConfig>,
}

impl OutputFinalizer {
    pub fn new(config: Arc<CompilerConfig>) -> Self {
        Self { config }
    }

    /// Collision-safe final names for this run.
    pub fn plan_names(&self, identity: &str, window: &DateWindow, count: usize) -> Vec<String> {
        let names = output_names(identity, window, count, &self.config.encoding.container_ext);
        ensure_unique_names(&names, &self.config.output_dir, self.config.overwrite_output)
    }

    /// Encoded output of compilation `index` in the cache, if any.
    ///
    /// Prefers today's name and falls back to any `complete_*_<index>.<ext>`.
    pub async fn locate(&self, index: usize) -> Option<PathBuf> {
        let ext = &self.config.encoding.container_ext;
        let exact = self
            .config
            .cache_dir
            .join(cache_output_name(index, &cache_output_date(), ext));
        if tokio::fs::try_exists(&exact).await.unwrap_or(false) {
            return Some(exact);
        }

        let suffix = format!("_{}.{}", index, ext);
        let mut entries = tokio::fs::read_dir(&self.config.cache_dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("complete_") && name.ends_with(&suffix) {
                return Some(entry.path());
            }
        }
        None
    }

    /// Move each compilation's output to `names[index]`, then clean up.
    pub async fn finalize(&self, names: &[String]) -> WorkerResult<FinalizeReport> {
        let mut report = FinalizeReport {
            names: names.to_vec(),
            ..Default::default()
        };
        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        for (index, name) in names.iter().enumerate() {
            let Some(src) = self.locate(index).await else {
                report.missing.push(index);
                continue;
            };

            let mut dest = self.config.output_dir.join(name);
            if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                if self.config.overwrite_output {
                    fs_utils::remove_file_if_exists(&dest).await?;
                } else {
                    let mut k = 1;
                    loop {
                        let candidate = with_suffix(name, k);
                        let path = self.config.output_dir.join(&candidate);
                        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                            report.names[index] = candidate;
                            dest = path;
                            break;
                        }
                        k += 1;
                    }
                }
            }

            fs_utils::move_file(&src, &dest).await?;
            report.moved.push(dest);
        }

        if !report.moved.is_empty() {
            let moved: Vec<_> = report
                .moved
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy())
                .collect();
            info!(count = moved.len(), files = %moved.join(", "), "Moved outputs");
        }
        if !report.missing.is_empty() {
            warn!(indexes = ?report.missing, "Missing compiled output in cache");
        }

        report.cache_removed = self.cleanup().await?;
        Ok(report)
    }

    /// Clear scratch space. Purge removes everything; otherwise preserved
    /// directories survive and `keep_cache` skips cleanup entirely.
    pub async fn cleanup(&self) -> WorkerResult<Option<usize>> {
        if self.config.keep_cache && !self.config.purge_cache {
            info!("Cache retained");
            return Ok(None);
        }

        let preserve: &[String] = if self.config.purge_cache {
            &[]
        } else {
            &self.config.cache_preserve_dirs
        };
        let removed = fs_utils::clear_dir_except(&self.config.cache_dir, preserve).await?;
        info!(removed, purge = self.config.purge_cache, "Cache cleaned");
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> CompilerConfig {
        CompilerConfig {
            cache_dir: dir.path().join("cache"),
            output_dir: dir.path().join("out"),
            ..Default::default()
        }
    }

    #[test]
    fn test_sanitize_identity() {
        assert_eq!(sanitize_identity("Some Streamer!!"), "some_streamer_");
        assert_eq!(sanitize_identity("a.b-c_d"), "a.b-c_d");
        assert_eq!(sanitize_identity(""), DEFAULT_IDENTITY);
        assert_eq!(sanitize_identity(&"x".repeat(200)).len(), 80);
    }

    #[test]
    fn test_window_label() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        assert_eq!(DateWindow::default().label(today), "2024-05-03");
        let window = DateWindow::new(Some("2024-05-01T00:00:00Z".into()), Some("2024-05-02T23:59:59Z".into()));
        assert_eq!(window.label(today), "2024-05-01_to_2024-05-02");
        let open_end = DateWindow::new(Some("2024-05-01T00:00:00Z".into()), None);
        assert_eq!(open_end.label(today), "2024-05-01_to_2024-05-01");
        let open_start = DateWindow::new(None, Some("2024-05-02".into()));
        assert_eq!(open_start.label(today), "unknown_to_2024-05-02");
    }

    #[test]
    fn test_output_names() {
        let window = DateWindow::new(Some("2024-05-01".into()), Some("2024-05-02".into()));
        assert_eq!(
            output_names("Caster", &window, 1, "mp4"),
            vec!["caster_2024-05-01_to_2024-05-02_compilation.mp4"]
        );
        assert_eq!(
            output_names("Caster", &window, 2, "mkv"),
            vec![
                "caster_2024-05-01_to_2024-05-02_part1.mkv",
                "caster_2024-05-01_to_2024-05-02_part2.mkv"
            ]
        );
    }

    #[test]
    fn test_unique_names_against_disk_and_batch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        let names = vec!["a.mp4".to_string(), "a.mp4".to_string()];

        assert_eq!(ensure_unique_names(&names, dir.path(), false), vec!["a_1.mp4", "a_2.mp4"]);
        assert_eq!(ensure_unique_names(&names, dir.path(), true), names);
        assert_eq!(
            ensure_unique_names(&["A.MP4".to_string()], dir.path(), false),
            vec!["A_1.MP4"]
        );
    }

    #[tokio::test]
    async fn test_finalize_moves_and_reports_missing() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(&config.cache_dir).unwrap();
        std::fs::create_dir_all(config.transition_cache_dir()).unwrap();
        std::fs::create_dir_all(config.cache_dir.join("clip1")).unwrap();
        std::fs::write(config.cache_dir.join(cache_output_name(0, &cache_output_date(), "mp4")), b"c0").unwrap();
        // Produced on a previous day
        std::fs::write(config.cache_dir.join("complete_01_01_20_2.mp4"), b"c2").unwrap();

        let finalizer = OutputFinalizer::new(Arc::new(config.clone()));
        let names: Vec<String> = ["x.mp4", "y.mp4", "z.mp4"].iter().map(|s| s.to_string()).collect();
        let report = finalizer.finalize(&names).await.unwrap();

        assert_eq!(report.moved.len(), 2);
        assert_eq!(report.missing, vec![1]);
        assert_eq!(std::fs::read(config.output_dir.join("x.mp4")).unwrap(), b"c0");
        assert_eq!(std::fs::read(config.output_dir.join("z.mp4")).unwrap(), b"c2");
        assert!(config.transition_cache_dir().exists());
        assert!(!config.cache_dir.join("clip1").exists());
        assert!(report.cache_removed.is_some());
    }

    #[tokio::test]
    async fn test_existing_output_is_suffixed_or_replaced() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.keep_cache = true;
        std::fs::create_dir_all(&config.cache_dir).unwrap();
        std::fs::create_dir_all(&config.output_dir).unwrap();
        std::fs::write(config.output_dir.join("x.mp4"), b"old").unwrap();
        let src = config.cache_dir.join(cache_output_name(0, &cache_output_date(), "mp4"));

        std::fs::write(&src, b"new").unwrap();
        let report = OutputFinalizer::new(Arc::new(config.clone()))
            .finalize(&["x.mp4".to_string()])
            .await
            .unwrap();
        assert_eq!(report.names, vec!["x_1.mp4"]);
        assert_eq!(std::fs::read(config.output_dir.join("x.mp4")).unwrap(), b"old");
        assert_eq!(report.cache_removed, None);

        std::fs::write(&src, b"newer").unwrap();
        config.overwrite_output = true;
        let report = OutputFinalizer::new(Arc::new(config.clone()))
            .finalize(&["x.mp4".to_string()])
            .await
            .unwrap();
        assert_eq!(report.names, vec!["x.mp4"]);
        assert_eq!(std::fs::read(config.output_dir.join("x.mp4")).unwrap(), b"newer");
    }

    #[tokio::test]
    async fn test_purge_overrides_keep_and_preserve() {
        let dir = TempDir::new().unwrap();
        let config = CompilerConfig {
            keep_cache: true,
            purge_cache: true,
            ..config(&dir)
        };
        std::fs::create_dir_all(config.transition_cache_dir()).unwrap();

        let removed = OutputFinalizer::new(Arc::new(config.clone())).cleanup().await.unwrap();
        assert_eq!(removed, Some(1));
        assert!(!config.transition_cache_dir().exists());
    }
}
