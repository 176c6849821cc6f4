//! Transition asset build parameters and manifest entries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of a non-clip asset within a compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Intro,
    Outro,
    /// The mandatory spacer placed after every clip
    Static,
    Transition,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Intro => "intro",
            AssetKind::Outro => "outro",
            AssetKind::Static => "static",
            AssetKind::Transition => "transition",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired build parameters for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionAssetSpec {
    /// File name (or absolute path) of the source asset
    pub name: String,
    pub kind: AssetKind,
    /// Replace the asset's audio with a synthetic silent track
    pub is_forced_silent: bool,
    /// Apply loudness normalization to the asset's own audio
    pub wants_loudness_normalize: bool,
}

impl TransitionAssetSpec {
    /// Build the desired parameters from the per-asset silence decision and the global
    /// loudness-normalization flag. Forced silence always wins.
    pub fn new(
        name: impl Into<String>,
        kind: AssetKind,
        is_forced_silent: bool,
        audio_normalize: bool,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            is_forced_silent,
            wants_loudness_normalize: !is_forced_silent && audio_normalize,
        }
    }

    /// The manifest entry a successful build with these parameters records.
    pub fn desired_entry(&self) -> AssetManifestEntry {
        AssetManifestEntry {
            silent: self.is_forced_silent,
            audio_normalized: self.wants_loudness_normalize,
        }
    }
}

/// Build provenance of a cached asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetManifestEntry {
    pub silent: bool,
    #[serde(alias = "aud_norm")]
    pub audio_normalized: bool,
}

/// Persisted manifest: asset name to build provenance.
pub type AssetManifest = BTreeMap<String, AssetManifestEntry>;
