//! FFmpeg `-progress` stream parsing and the bounded diagnostic tail.

use std::collections::VecDeque;
use std::sync::Arc;

/// Receives elapsed output time in seconds.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Lines kept from a child's diagnostic stream.
pub const DEFAULT_TAIL_CAPACITY: usize = 200;

/// Lines of diagnostic output shown when a stage fails.
pub const LOGGED_TAIL_LINES: usize = 20;

/// Classification of one diagnostic-stream line.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// Elapsed output time in seconds
    Elapsed(f64),
    /// `progress=continue|end`
    State { ended: bool },
    /// Any other `-progress` key
    Stat,
}

/// Keys emitted by `-progress` besides the time markers.
const STAT_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "speed",
    "dup_frames",
    "drop_frames",
];

/// Classify a line. `None` means it is ordinary diagnostic output.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let (key, value) = line.trim().split_once('=')?;
    let value = value.trim();

    match key {
        "out_time" => Some(parse_clock(value).map_or(ProgressLine::Stat, ProgressLine::Elapsed)),
        // ffmpeg reports out_time_ms in microseconds too
        "out_time_us" | "out_time_ms" => Some(
            value
                .parse::<i64>()
                .ok()
                .filter(|us| *us >= 0)
                .map_or(ProgressLine::Stat, |us| ProgressLine::Elapsed(us as f64 / 1_000_000.0)),
        ),
        "progress" => Some(ProgressLine::State {
            ended: value == "end",
        }),
        k if STAT_KEYS.contains(&k) || k.starts_with("stream_") => Some(ProgressLine::Stat),
        _ => None,
    }
}

/// Parse `HH:MM:SS.micro` into seconds.
pub fn parse_clock(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let h: f64 = parts.next()?.trim().parse().ok()?;
    let m: f64 = parts.next()?.trim().parse().ok()?;
    let s: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() || h < 0.0 || m < 0.0 || s < 0.0 {
        return None;
    }
    Some(h * 3600.0 + m * 60.0 + s)
}

/// Whole percent of `elapsed` against `total`, clamped to 0..=100.
pub fn percent(elapsed: f64, total: f64) -> u8 {
    if total <= 0.0 || !elapsed.is_finite() {
        return 0;
    }
    (elapsed / total * 100.0).clamp(0.0, 100.0) as u8
}

/// Ring buffer holding the last lines of a child's diagnostic stream.
#[derive(Debug, Clone)]
pub struct DiagnosticTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for DiagnosticTail {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_CAPACITY)
    }
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Last `max_lines` non-blank lines of `lines`, trimmed and newline joined.
pub fn sanitize_tail<S: AsRef<str>>(lines: &[S], max_lines: usize) -> String {
    let kept: Vec<&str> = lines
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| !l.is_empty())
        .collect();
    let start = kept.len().saturating_sub(max_lines);
    kept[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_markers() {
        assert_eq!(
            parse_progress_line("out_time=00:01:02.500000"),
            Some(ProgressLine::Elapsed(62.5))
        );
        assert_eq!(
            parse_progress_line("out_time_ms=5000000"),
            Some(ProgressLine::Elapsed(5.0))
        );
        assert_eq!(
            parse_progress_line("out_time_us=250000"),
            Some(ProgressLine::Elapsed(0.25))
        );
        // Emitted before the first frame
        assert_eq!(parse_progress_line("out_time=N/A"), Some(ProgressLine::Stat));
    }

    #[test]
    fn test_parse_other_lines() {
        assert_eq!(
            parse_progress_line("progress=end"),
            Some(ProgressLine::State { ended: true })
        );
        assert_eq!(parse_progress_line("speed=1.5x"), Some(ProgressLine::Stat));
        assert_eq!(parse_progress_line("stream_0_0_q=23.0"), Some(ProgressLine::Stat));
        assert_eq!(parse_progress_line("[h264_nvenc] No capable devices found"), None);
        assert_eq!(parse_progress_line("Error opening input: x=y"), None);
    }

    #[test]
    fn test_tail_is_bounded() {
        let mut tail = DiagnosticTail::new(3);
        for i in 0..10 {
            tail.push(format!("line {}", i));
        }
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.into_lines(), vec!["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn test_sanitize_tail() {
        let lines = vec!["  a  ", "", "b", "c"];
        assert_eq!(sanitize_tail(&lines, 2), "b\nc");
        assert_eq!(sanitize_tail(&lines, 10), "a\nb\nc");
    }

    #[test]
    fn test_percent_clamps() {
        assert_eq!(percent(5.0, 10.0), 50);
        assert_eq!(percent(12.0, 10.0), 100);
        assert_eq!(percent(1.0, 0.0), 0);
    }
}
