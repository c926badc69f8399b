//! Asset references produced by generation and export

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// What an asset depicts within a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Scene background (also produced by establishing shots)
    Background,
    /// Character portrait for a speaker
    Portrait,
    /// Close-up frame strip
    CloseUp,
}

impl AssetKind {
    /// Short role name used in generated file names
    pub fn role(&self) -> &'static str {
        match self {
            Self::Background => "bg",
            Self::Portrait => "portrait",
            Self::CloseUp => "closeup",
        }
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Background => write!(f, "background"),
            Self::Portrait => write!(f, "portrait"),
            Self::CloseUp => write!(f, "close_up"),
        }
    }
}

/// How an asset came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetOrigin {
    /// Generated from scratch
    Fresh,
    /// Generated from an earlier asset as reference
    DerivedVariant,
}

/// Reference to an asset written to a moment's working directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    /// What the asset depicts
    pub kind: AssetKind,

    /// File on disk holding the asset bytes
    pub path: PathBuf,

    /// MIME type reported by the generator
    pub mime_type: String,

    /// Size of the asset in bytes
    pub byte_len: u64,

    /// Cost charged by the generator for this asset (USD)
    pub cost: f64,

    /// Fresh generation or derived variant
    pub origin: AssetOrigin,
}

impl AssetRef {
    /// File extension for a MIME type
    pub fn extension_for(mime_type: &str) -> &'static str {
        debug!(%mime_type, "AssetRef::extension_for: called");
        match mime_type {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "video/mp4" => "mp4",
            _ => "bin",
        }
    }
}

/// Assets produced for one sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceAssets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<AssetRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portrait: Option<AssetRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_up: Option<AssetRef>,

    /// Files written by the export collaborator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exported: Vec<PathBuf>,
}

impl SequenceAssets {
    /// Generated (non-export) assets in a stable order
    pub fn generated(&self) -> Vec<&AssetRef> {
        [&self.background, &self.portrait, &self.close_up]
            .into_iter()
            .filter_map(|a| a.as_ref())
            .collect()
    }

    /// True if nothing was generated or exported
    pub fn is_empty(&self) -> bool {
        self.generated().is_empty() && self.exported.is_empty()
    }
}
