use crate::logging::LogState;
use crate::models::Manifest;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// The manifest document at the vault root.
pub const MANIFEST_FILE: &str = "vault.json";
/// Subdirectory for locally saved cover images.
pub const COVERS_DIR: &str = "covers";

/// Recognized audio extensions (case-insensitive).
pub const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "wav", "ogg", "m4a"];

/// Everything file-system-adjacent is recoverable; only a missing or denied
/// vault root is treated as blocking by callers.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Vault root is not accessible: {path}")]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to save manifest: {0}")]
    ManifestSave(String),
    #[error("Failed to write tags to {filename}: {reason}")]
    TagWrite { filename: String, reason: String },
    #[error("Unknown song id {0}")]
    UnknownSong(u64),
    #[error("Unknown folder \"{0}\"")]
    UnknownFolder(String),
    #[error("Folder \"{0}\" already exists")]
    DuplicateFolder(String),
    #[error("Invalid folder name")]
    InvalidFolderName,
    #[error("The \"Unsorted\" folder is reserved")]
    UnsortedReserved,
}

/// A recognized audio file found at the vault root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEntry {
    pub filename: String,
    pub path: PathBuf,
}

pub fn is_audio_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| AUDIO_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

/// Owns the vault root directory: manifest load/save, cover persistence,
/// and directory listing. All methods treat permission loss as a
/// recoverable error.
#[derive(Debug)]
pub struct VaultStore {
    root: PathBuf,
    log: Arc<LogState>,
}

impl VaultStore {
    /// Open a vault rooted at `root`. Fails only if the directory itself
    /// cannot be listed (missing grant, revoked permission).
    pub fn open(root: PathBuf, log: Arc<LogState>) -> Result<Self, VaultError> {
        if let Err(source) = fs::read_dir(&root) {
            return Err(VaultError::RootUnavailable { path: root, source });
        }
        Ok(Self { root, log })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Absolute path of an audio file by its manifest filename.
    pub fn song_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Load the manifest, failing soft: a missing or unparsable document
    /// yields the empty default so a broken file never blocks the vault.
    pub fn load_manifest(&self) -> Manifest {
        let path = self.manifest_path();
        match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Manifest>(&text) {
                Ok(mut manifest) => {
                    manifest.normalize();
                    manifest
                }
                Err(e) => {
                    self.log
                        .warn(&format!("Manifest unparsable, starting fresh: {}", e));
                    Manifest::default()
                }
            },
            Err(_) => {
                self.log.info("No vault.json found, creating fresh state");
                Manifest::default()
            }
        }
    }

    /// Serialize and persist the manifest. The full document is buffered
    /// and committed with a rename so a failed write cannot corrupt the
    /// previous manifest on disk.
    pub fn save_manifest(&self, manifest: &Manifest) -> Result<(), VaultError> {
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| VaultError::ManifestSave(e.to_string()))?;

        let tmp = self.root.join(format!("{}.tmp", MANIFEST_FILE));
        fs::write(&tmp, json).map_err(|e| VaultError::ManifestSave(e.to_string()))?;
        fs::rename(&tmp, self.manifest_path())
            .map_err(|e| VaultError::ManifestSave(e.to_string()))?;
        Ok(())
    }

    /// List recognized audio files at the vault root, sorted by filename
    /// for deterministic iteration. Subdirectories are skipped: there is no
    /// recursive scan yet.
    pub fn list_audio_entries(&self) -> Result<Vec<AudioEntry>, VaultError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(source) => {
                return Err(VaultError::RootUnavailable {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_audio_file(filename) {
                out.push(AudioEntry {
                    filename: filename.to_string(),
                    path,
                });
            }
        }

        out.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(out)
    }

    /// Deterministic cover filename for a song id.
    pub fn cover_filename(song_id: u64, ext: &str) -> String {
        format!("cover_{}.{}", song_id, ext)
    }

    /// Write cover image bytes under the covers subdirectory, creating it
    /// on demand. Returns the relative reference stored in the manifest.
    pub fn save_cover(&self, bytes: &[u8], song_id: u64, ext: &str) -> Result<String, VaultError> {
        let dir = self.root.join(COVERS_DIR);
        fs::create_dir_all(&dir)?;

        let filename = Self::cover_filename(song_id, ext);
        fs::write(dir.join(&filename), bytes)?;

        Ok(format!("{}/{}", COVERS_DIR, filename))
    }

    /// Absolute path for a relative cover reference.
    pub fn cover_abs_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Best-effort cover read for display; failures are the caller's to
    /// tolerate.
    pub fn load_cover(&self, relative: &str) -> Option<Vec<u8>> {
        fs::read(self.cover_abs_path(relative)).ok()
    }
}
