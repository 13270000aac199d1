use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The one folder every vault has. Cannot be deleted or renamed.
pub const UNSORTED_FOLDER: &str = "Unsorted";

/// Informational document version written into the manifest.
pub const MANIFEST_VERSION: &str = "1.0";

/// Free-text musical metadata, independently settable per field.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SongMeta {
    #[serde(default)]
    pub bpm: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub genre: String,
}

/// What the last scan pass did with a song. Runtime-only, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanStatus {
    /// First time this filename was seen.
    New,
    /// A prior manifest entry was re-read and merged with embedded tags.
    Updated,
    /// The prior manifest entry was reused verbatim.
    #[default]
    Unchanged,
}

/// Resolved cover artwork for display. Runtime-only; the persisted form is
/// the song's `cover_path` reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CoverArt {
    /// Picture bytes pulled out of the file's embedded tags.
    Embedded(Vec<u8>),
    /// A saved cover image inside the vault's covers subdirectory.
    LocalFile(PathBuf),
    #[default]
    None,
}

impl CoverArt {
    pub fn is_none(&self) -> bool {
        matches!(self, CoverArt::None)
    }
}

/// One entry per audio file in the vault.
///
/// Serialized camelCase into `vault.json`; the `path`, `status` and `cover`
/// fields are runtime-only and skipped.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    /// Assigned once at first discovery, never regenerated. Ids come from a
    /// monotonic per-vault sequence, so descending id order is newest-first.
    pub id: u64,
    /// On-disk name. The join key between directory entries and manifest
    /// entries; case-sensitive exact match, unique within the manifest.
    pub filename: String,
    pub title: String,
    pub persona: String,
    /// Exactly one folder membership. Always names an entry in the folder
    /// list.
    pub folder: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: SongMeta,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub lyrics: String,
    #[serde(default)]
    pub memo: String,
    /// `YYYY-MM-DD`, fixed at first discovery.
    pub created_at: String,
    /// Relative path of a saved cover image inside the covers subdirectory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_path: Option<String>,

    /// Absolute path of the underlying file, refreshed every scan.
    #[serde(skip)]
    pub path: Option<PathBuf>,
    #[serde(skip)]
    pub status: ScanStatus,
    #[serde(skip)]
    pub cover: CoverArt,
}

impl Song {
    /// Add a free-form tag, preserving insertion order and uniqueness.
    /// Returns false if the tag was empty or already present.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.tags.iter().any(|t| t == tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }

    /// Remove a tag by exact name. Returns whether anything was removed.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        self.tags.len() != before
    }
}

/// The persisted manifest document: `{version, folders, songs}`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,
    #[serde(default)]
    pub songs: Vec<Song>,
}

fn default_version() -> String {
    MANIFEST_VERSION.to_string()
}

fn default_folders() -> Vec<String> {
    vec![UNSORTED_FOLDER.to_string()]
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: default_version(),
            folders: default_folders(),
            songs: Vec::new(),
        }
    }
}

impl Manifest {
    /// Next id to mint for a newly discovered song.
    pub fn next_song_id(&self) -> u64 {
        self.songs.iter().map(|s| s.id).max().unwrap_or(0) + 1
    }

    pub fn song_by_filename(&self, filename: &str) -> Option<&Song> {
        self.songs.iter().find(|s| s.filename == filename)
    }

    /// Restore structural invariants after deserializing arbitrary input:
    /// the folder list is deduplicated (first occurrence wins) and always
    /// contains "Unsorted".
    pub fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.folders.retain(|f| seen.insert(f.clone()));
        if !self.folders.iter().any(|f| f == UNSORTED_FOLDER) {
            self.folders.insert(0, UNSORTED_FOLDER.to_string());
        }
    }
}

/// Today's date as the `createdAt` day stamp.
pub fn today_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}
