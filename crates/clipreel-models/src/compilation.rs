//! Compilation model.

use serde::{Deserialize, Serialize};

use crate::ClipRecord;

/// An ordered list of clips destined for one output file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compilation {
    /// Position of this compilation within the run (0-based)
    pub index: usize,
    /// Clips in sequencing order
    pub clips: Vec<ClipRecord>,
}

impl Compilation {
    /// Create a compilation, dropping repeated clip ids while keeping first occurrences.
    pub fn new(index: usize, clips: Vec<ClipRecord>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let clips = clips
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .collect();
        Self { index, clips }
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn contains(&self, clip_id: &str) -> bool {
        self.clips.iter().any(|c| c.id == clip_id)
    }
}
