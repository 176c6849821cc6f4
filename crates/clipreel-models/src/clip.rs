//! Clip records and per-clip status models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A candidate clip supplied by the ingestion collaborator.
///
/// Immutable once ingested. `id` is the identity and doubles as the name of
/// the clip's cache subdirectory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRecord {
    /// Unique clip identifier
    pub id: String,
    /// When the clip was created on the source platform
    pub created_at: DateTime<Utc>,
    /// Display name of the clip author
    pub author_name: String,
    /// Author avatar image URL (may be empty)
    #[serde(default, rename = "avatarURL", alias = "avatarUrl")]
    pub avatar_url: String,
    /// View count reported by the source platform
    #[serde(default)]
    pub view_count: u64,
    /// Page or media URL handed to the downloader
    #[serde(rename = "sourceURL", alias = "sourceUrl")]
    pub source_url: String,
}

impl ClipRecord {
    /// Create a clip record.
    pub fn new(
        id: impl Into<String>,
        author_name: impl Into<String>,
        view_count: u64,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            author_name: author_name.into(),
            avatar_url: String::new(),
            view_count,
            source_url: source_url.into(),
        }
    }

    /// Set the avatar URL.
    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = url.into();
        self
    }

    /// Whether the clip reaches the configured view threshold.
    pub fn is_eligible(&self, min_views: u64) -> bool {
        self.view_count >= min_views
    }

    /// Author name reduced to ASCII letters, digits and spaces.
    ///
    /// Used for the overlay text, which is embedded in a filter graph.
    pub fn overlay_author(&self) -> String {
        fix_ascii(&self.author_name)
    }
}

/// Keep only `[A-Za-z0-9 ]`.
pub fn fix_ascii(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect()
}

/// Final status of a clip after preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    Done,
    FailedDownload,
    FailedProcess,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Done => "done",
            ClipStatus::FailedDownload => "failed_download",
            ClipStatus::FailedProcess => "failed_process",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ClipStatus::Done)
    }
}

impl fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live stage of a clip inside the preparation pool.
///
/// Emitted to status reporters only; never drives control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ClipStage {
    Queued,
    FetchingAvatar,
    Downloading,
    Normalizing { percent: Option<u8> },
    Overlay { percent: Option<u8> },
    Done,
    Failed { status: ClipStatus },
}

impl ClipStage {
    /// Whether no further updates are expected for the clip.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClipStage::Done | ClipStage::Failed { .. })
    }
}

impl fmt::Display for ClipStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipStage::Queued => f.write_str("queued"),
            ClipStage::FetchingAvatar => f.write_str("avatar downloading"),
            ClipStage::Downloading => f.write_str("downloading clip"),
            ClipStage::Normalizing { percent: None } => f.write_str("normalizing"),
            ClipStage::Normalizing { percent: Some(p) } => write!(f, "normalizing {}%", p),
            ClipStage::Overlay { percent: None } => f.write_str("overlay"),
            ClipStage::Overlay { percent: Some(p) } => write!(f, "overlay {}%", p),
            ClipStage::Done => f.write_str("done"),
            ClipStage::Failed { status: ClipStatus::FailedDownload } => {
                f.write_str("FAILED (download)")
            }
            ClipStage::Failed { .. } => f.write_str("FAILED (process)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_author_strips_symbols() {
        let clip = ClipRecord::new("c1", "Zoë_the 'Great'!", 10, "https://example.com/c1");
        assert_eq!(clip.overlay_author(), "Zothe Great");
    }

    #[test]
    fn test_eligibility_threshold_is_inclusive() {
        let clip = ClipRecord::new("c1", "a", 5, "u");
        assert!(clip.is_eligible(5));
        assert!(!clip.is_eligible(6));
    }

    #[test]
    fn test_deserialize_camel_case_record() {
        let json = r#"{
            "id": "abc",
            "createdAt": "2024-05-01T12:00:00Z",
            "authorName": "someone",
            "avatarURL": "https://example.com/a.png",
            "viewCount": 42,
            "sourceURL": "https://clips.example.com/abc"
        }"#;
        let clip: ClipRecord = serde_json::from_str(json).unwrap();
        assert_eq!(clip.id, "abc");
        assert_eq!(clip.view_count, 42);
        assert_eq!(clip.avatar_url, "https://example.com/a.png");
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(
            ClipStage::Normalizing { percent: Some(45) }.to_string(),
            "normalizing 45%"
        );
        assert_eq!(
            ClipStage::Failed { status: ClipStatus::FailedDownload }.to_string(),
            "FAILED (download)"
        );
        assert!(ClipStage::Done.is_terminal());
        assert!(!ClipStage::Queued.is_terminal());
    }
}
