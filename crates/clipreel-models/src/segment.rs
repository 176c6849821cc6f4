//! Concat script segments.
//!
//! A concat script is the flat, ordered list of files the encoder joins into
//! one compilation. It is written in the ffmpeg concat demuxer format, one
//! `file '<path>'` directive per line, with paths relative to the directory
//! holding the script.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::AssetKind;

/// One entry of a concat script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentLine {
    /// A prepared clip's final file
    Clip { clip_id: String, path: String },
    /// A built transition asset (intro, outro, spacer or transition)
    Asset {
        name: String,
        kind: AssetKind,
        path: String,
    },
}

impl SegmentLine {
    pub fn path(&self) -> &str {
        match self {
            SegmentLine::Clip { path, .. } | SegmentLine::Asset { path, .. } => path,
        }
    }

    pub fn is_clip(&self) -> bool {
        matches!(self, SegmentLine::Clip { .. })
    }

    /// Whether this line is the mandatory spacer asset.
    pub fn is_spacer(&self) -> bool {
        matches!(
            self,
            SegmentLine::Asset {
                kind: AssetKind::Static,
                ..
            }
        )
    }

    /// Render as a concat demuxer directive.
    pub fn render(&self) -> String {
        format!("file '{}'", escape_concat_path(self.path()))
    }
}

impl fmt::Display for SegmentLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Quote a path for a single-quoted concat directive.
fn escape_concat_path(path: &str) -> String {
    path.replace('\\', "/").replace('\'', r"'\''")
}

/// Ordered segment list for one compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatScript {
    lines: Vec<SegmentLine>,
}

impl ConcatScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: SegmentLine) {
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[SegmentLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of clip entries.
    pub fn clip_count(&self) -> usize {
        self.lines.iter().filter(|l| l.is_clip()).count()
    }

    /// Ids of the clip entries, in order.
    pub fn clip_ids(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                SegmentLine::Clip { clip_id, .. } => Some(clip_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether every clip entry is immediately followed by a spacer entry.
    pub fn spacers_follow_clips(&self) -> bool {
        self.lines.iter().enumerate().all(|(i, line)| {
            !line.is_clip() || self.lines.get(i + 1).is_some_and(SegmentLine::is_spacer)
        })
    }

    /// Render the whole script, newline terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.render());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spacer() -> SegmentLine {
        SegmentLine::Asset {
            name: "static.mp4".into(),
            kind: AssetKind::Static,
            path: "_trans/static.mp4".into(),
        }
    }

    #[test]
    fn test_render_quotes_paths() {
        let line = SegmentLine::Clip {
            clip_id: "it's".into(),
            path: "it's/it's.mp4".into(),
        };
        assert_eq!(line.render(), r"file 'it'\''s/it'\''s.mp4'");
    }

    #[test]
    fn test_spacers_follow_clips() {
        let mut script = ConcatScript::new();
        script.push(SegmentLine::Clip {
            clip_id: "a".into(),
            path: "a/a.mp4".into(),
        });
        assert!(!script.spacers_follow_clips());
        script.push(spacer());
        assert!(script.spacers_follow_clips());
        assert_eq!(script.clip_ids(), vec!["a"]);
        assert_eq!(
            script.render(),
            "file 'a/a.mp4'\nfile '_trans/static.mp4'\n"
        );
    }
}
