use crate::logging::LogState;
use crate::metadata::{self, LoftyTagReader, TagReader};
use crate::models::{CoverArt, Manifest, Song, UNSORTED_FOLDER};
use crate::playback::{PlaybackContext, PlayerAction};
use crate::reconcile::{reconcile, ScanStats};
use crate::vault_store::{VaultError, VaultStore};
use crate::vault_watcher::{start_vault_watcher, VaultEvent};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

/// Which songs the host is currently looking at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ViewFilter {
    #[default]
    All,
    Folder(String),
}

/// The authoritative in-memory library state.
#[derive(Debug, Default)]
pub struct Library {
    pub version: String,
    pub songs: Vec<Song>,
    pub folders: Vec<String>,
    pub view: ViewFilter,
    pub search_term: String,
}

impl Library {
    fn from_manifest(manifest: Manifest) -> Self {
        Library {
            version: manifest.version,
            songs: manifest.songs,
            folders: manifest.folders,
            view: ViewFilter::All,
            search_term: String::new(),
        }
    }

    fn to_manifest(&self) -> Manifest {
        Manifest {
            version: self.version.clone(),
            folders: self.folders.clone(),
            songs: self.songs.clone(),
        }
    }
}

/// Result of one rescan. `applied` is false when a newer scan started while
/// this one was reading and its outcome was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub stats: ScanStats,
    pub applied: bool,
}

/// Editable song fields; only `Some` fields are applied.
#[derive(Debug, Clone, Default)]
pub struct SongEdit {
    pub title: Option<String>,
    pub persona: Option<String>,
    pub folder: Option<String>,
    pub bpm: Option<String>,
    pub key: Option<String>,
    pub genre: Option<String>,
    pub prompt: Option<String>,
    pub lyrics: Option<String>,
    pub memo: Option<String>,
}

/// One open vault: the store, the in-memory library, playback context and
/// logging, owned together instead of living in globals. Methods lock
/// internally, so a host thread and the watcher can call in concurrently.
pub struct VaultSession {
    store: VaultStore,
    reader: Box<dyn TagReader>,
    log: Arc<LogState>,
    library: Mutex<Library>,
    playback: Mutex<PlaybackContext>,
    /// Monotonic scan generation; only the most recently initiated scan may
    /// mutate shared state.
    scan_generation: AtomicU64,
    /// Tag reads and tag write-backs take this for the duration of their
    /// file IO so a write-back never interleaves with an in-flight read.
    file_access: Mutex<()>,
}

impl VaultSession {
    /// Open the vault rooted at `root` and load its manifest (or the empty
    /// default when none exists). No scan happens yet.
    pub fn open(root: PathBuf, log: Arc<LogState>) -> Result<Self, VaultError> {
        Self::open_with_reader(root, log, Box::new(LoftyTagReader))
    }

    /// Same as [`open`](Self::open) with a custom tag reader.
    pub fn open_with_reader(
        root: PathBuf,
        log: Arc<LogState>,
        reader: Box<dyn TagReader>,
    ) -> Result<Self, VaultError> {
        let store = VaultStore::open(root, log.clone())?;
        let manifest = store.load_manifest();
        Ok(Self {
            store,
            reader,
            log,
            library: Mutex::new(Library::from_manifest(manifest)),
            playback: Mutex::new(PlaybackContext::new()),
            scan_generation: AtomicU64::new(0),
            file_access: Mutex::new(()),
        })
    }

    pub fn log(&self) -> &Arc<LogState> {
        &self.log
    }

    fn lib(&self) -> MutexGuard<'_, Library> {
        self.library.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn player(&self) -> MutexGuard<'_, PlaybackContext> {
        self.playback.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Scanning ────────────────────────────────────────────────

    /// Reconcile the vault directory against the manifest and apply the
    /// result. With `force_refresh`, embedded tags are re-read for every
    /// file instead of only new ones.
    pub fn rescan(&self, force_refresh: bool) -> Result<ScanSummary, VaultError> {
        let generation = self.claim_generation();
        self.scan_once(generation, force_refresh)
    }

    fn claim_generation(&self) -> u64 {
        self.scan_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn scan_once(&self, generation: u64, force_refresh: bool) -> Result<ScanSummary, VaultError> {
        self.log.info(if force_refresh {
            "Scanning vault (forced tag refresh)..."
        } else {
            "Scanning vault..."
        });

        let manifest = self.lib().to_manifest();
        let entries = self.store.list_audio_entries()?;

        // Tag reads must not interleave with a tag write-back, and holding
        // this across the pass serializes overlapping scans' file IO.
        let outcome = {
            let _io = self.file_access.lock().unwrap_or_else(|e| e.into_inner());
            reconcile(
                &manifest,
                &entries,
                &self.store,
                self.reader.as_ref(),
                force_refresh,
                &self.log,
            )
        };

        {
            let mut lib = self.lib();
            // Only the most recently initiated scan may mutate shared
            // state; anything older is stale by definition.
            if self.scan_generation.load(Ordering::SeqCst) != generation {
                self.log.warn("Discarding superseded scan result");
                return Ok(ScanSummary {
                    stats: outcome.stats,
                    applied: false,
                });
            }
            lib.songs = outcome.songs;
            lib.folders = outcome.folders;
        }

        // Sync the merged state straight back to disk.
        self.save()?;

        let s = outcome.stats;
        self.log.info(&format!(
            "Vault updated: {} songs ({} new, {} refreshed, {} tag failures)",
            s.total, s.added, s.refreshed, s.tag_failures
        ));
        Ok(ScanSummary {
            stats: s,
            applied: true,
        })
    }

    /// Persist the manifest. In-memory state is never touched by a failed
    /// save; the error is logged and returned.
    pub fn save(&self) -> Result<(), VaultError> {
        let manifest = self.lib().to_manifest();
        if let Err(e) = self.store.save_manifest(&manifest) {
            self.log
                .error(&format!("Failed to save changes to disk: {}", e));
            return Err(e);
        }
        Ok(())
    }

    /// Watch the vault directory for external changes. The host reacts to
    /// each event with a `rescan`.
    pub fn watch(&self) -> Receiver<VaultEvent> {
        start_vault_watcher(self.store.root().to_path_buf(), self.log.clone())
    }

    // ── Folders ─────────────────────────────────────────────────

    pub fn create_folder(&self, name: &str) -> Result<(), VaultError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VaultError::InvalidFolderName);
        }
        {
            let mut lib = self.lib();
            if lib.folders.iter().any(|f| f == name) {
                return Err(VaultError::DuplicateFolder(name.to_string()));
            }
            lib.folders.push(name.to_string());
        }
        self.save()?;
        self.log.info(&format!("Created folder \"{}\"", name));
        Ok(())
    }

    /// Delete a folder. Member songs are reassigned to "Unsorted", never
    /// deleted; returns how many were moved.
    pub fn delete_folder(&self, name: &str) -> Result<usize, VaultError> {
        if name == UNSORTED_FOLDER {
            return Err(VaultError::UnsortedReserved);
        }
        let moved = {
            let mut guard = self.lib();
            let lib = &mut *guard;
            if !lib.folders.iter().any(|f| f == name) {
                return Err(VaultError::UnknownFolder(name.to_string()));
            }
            lib.folders.retain(|f| f != name);

            let mut moved = 0;
            for song in lib.songs.iter_mut().filter(|s| s.folder == name) {
                song.folder = UNSORTED_FOLDER.to_string();
                moved += 1;
            }
            if lib.view == ViewFilter::Folder(name.to_string()) {
                lib.view = ViewFilter::All;
            }
            moved
        };
        self.save()?;
        self.log.info(&format!(
            "Deleted folder \"{}\" ({} songs moved to {})",
            name, moved, UNSORTED_FOLDER
        ));
        Ok(moved)
    }

    /// Rename a folder in place (list position preserved) and update every
    /// member song.
    pub fn rename_folder(&self, from: &str, to: &str) -> Result<(), VaultError> {
        if from == UNSORTED_FOLDER {
            return Err(VaultError::UnsortedReserved);
        }
        let to = to.trim();
        if to.is_empty() {
            return Err(VaultError::InvalidFolderName);
        }
        {
            let mut guard = self.lib();
            let lib = &mut *guard;
            let Some(pos) = lib.folders.iter().position(|f| f == from) else {
                return Err(VaultError::UnknownFolder(from.to_string()));
            };
            if lib.folders.iter().any(|f| f == to) {
                return Err(VaultError::DuplicateFolder(to.to_string()));
            }
            lib.folders[pos] = to.to_string();
            for song in lib.songs.iter_mut().filter(|s| s.folder == from) {
                song.folder = to.to_string();
            }
            if lib.view == ViewFilter::Folder(from.to_string()) {
                lib.view = ViewFilter::Folder(to.to_string());
            }
        }
        self.save()?;
        self.log
            .info(&format!("Renamed folder \"{}\" to \"{}\"", from, to));
        Ok(())
    }

    /// Move a folder to a new position in the user-ordered list.
    pub fn move_folder(&self, name: &str, new_index: usize) -> Result<(), VaultError> {
        {
            let mut lib = self.lib();
            let Some(pos) = lib.folders.iter().position(|f| f == name) else {
                return Err(VaultError::UnknownFolder(name.to_string()));
            };
            let folder = lib.folders.remove(pos);
            let idx = new_index.min(lib.folders.len());
            lib.folders.insert(idx, folder);
        }
        self.save()
    }

    // ── Song edits ──────────────────────────────────────────────

    /// Apply edited fields to a song and persist. A folder change must name
    /// an existing folder; an empty title is ignored (songs never lose
    /// their title).
    pub fn update_song(&self, id: u64, edit: SongEdit) -> Result<(), VaultError> {
        {
            let mut guard = self.lib();
            let lib = &mut *guard;
            if let Some(folder) = &edit.folder {
                if !lib.folders.iter().any(|f| f == folder) {
                    return Err(VaultError::UnknownFolder(folder.clone()));
                }
            }
            let song = lib
                .songs
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(VaultError::UnknownSong(id))?;

            if let Some(title) = edit.title {
                let title = title.trim();
                if !title.is_empty() {
                    song.title = title.to_string();
                }
            }
            if let Some(persona) = edit.persona {
                song.persona = persona;
            }
            if let Some(folder) = edit.folder {
                song.folder = folder;
            }
            if let Some(bpm) = edit.bpm {
                song.meta.bpm = bpm;
            }
            if let Some(key) = edit.key {
                song.meta.key = key;
            }
            if let Some(genre) = edit.genre {
                song.meta.genre = genre;
            }
            if let Some(prompt) = edit.prompt {
                song.prompt = prompt;
            }
            if let Some(lyrics) = edit.lyrics {
                song.lyrics = lyrics;
            }
            if let Some(memo) = edit.memo {
                song.memo = memo;
            }
        }
        self.save()
    }

    /// Add a free-form tag to a song. Returns whether it was new.
    pub fn add_tag(&self, id: u64, tag: &str) -> Result<bool, VaultError> {
        let added = {
            let mut lib = self.lib();
            let song = lib
                .songs
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(VaultError::UnknownSong(id))?;
            song.add_tag(tag)
        };
        if added {
            self.save()?;
        }
        Ok(added)
    }

    pub fn remove_tag(&self, id: u64, tag: &str) -> Result<bool, VaultError> {
        let removed = {
            let mut lib = self.lib();
            let song = lib
                .songs
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(VaultError::UnknownSong(id))?;
            song.remove_tag(tag)
        };
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Save a new cover image for a song and point its manifest entry at
    /// the stored file. Any embedded art it was showing is superseded.
    pub fn set_cover(&self, id: u64, bytes: &[u8], ext: &str) -> Result<String, VaultError> {
        if !self.lib().songs.iter().any(|s| s.id == id) {
            return Err(VaultError::UnknownSong(id));
        }

        let reference = self.store.save_cover(bytes, id, ext)?;
        {
            let mut lib = self.lib();
            if let Some(song) = lib.songs.iter_mut().find(|s| s.id == id) {
                song.cover_path = Some(reference.clone());
                song.cover = CoverArt::LocalFile(self.store.cover_abs_path(&reference));
            }
        }
        self.save()?;
        Ok(reference)
    }

    /// Write a song's current editable fields back into the audio file's
    /// embedded tags, overwriting the file in place.
    ///
    /// Optimistic-local policy: the in-memory (and manifest) edit stays
    /// applied even when the on-disk tag write fails; the failure is logged
    /// and returned for the host to surface.
    pub fn write_song_tags(&self, id: u64, include_cover: bool) -> Result<(), VaultError> {
        let (song, cover_bytes, path) = {
            let lib = self.lib();
            let song = lib
                .songs
                .iter()
                .find(|s| s.id == id)
                .ok_or(VaultError::UnknownSong(id))?
                .clone();
            let path = song
                .path
                .clone()
                .unwrap_or_else(|| self.store.song_path(&song.filename));
            let cover_bytes = if include_cover {
                match &song.cover {
                    CoverArt::Embedded(bytes) => Some(bytes.clone()),
                    CoverArt::LocalFile(_) => song
                        .cover_path
                        .as_ref()
                        .and_then(|r| self.store.load_cover(r)),
                    CoverArt::None => None,
                }
            } else {
                None
            };
            (song, cover_bytes, path)
        };

        // Exclusive file access for the duration of the overwrite.
        let _io = self.file_access.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = metadata::write_song_tags(&path, &song, cover_bytes.as_deref()) {
            self.log.error(&format!(
                "Failed to write tags to {}: {}",
                song.filename, e
            ));
            return Err(VaultError::TagWrite {
                filename: song.filename,
                reason: e.to_string(),
            });
        }
        self.log.info(&format!("Wrote tags to {}", song.filename));
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn songs(&self) -> Vec<Song> {
        self.lib().songs.clone()
    }

    pub fn song(&self, id: u64) -> Option<Song> {
        self.lib().songs.iter().find(|s| s.id == id).cloned()
    }

    pub fn folders(&self) -> Vec<String> {
        self.lib().folders.clone()
    }

    pub fn folder_song_count(&self, name: &str) -> usize {
        self.lib().songs.iter().filter(|s| s.folder == name).count()
    }

    pub fn set_view(&self, view: ViewFilter) {
        self.lib().view = view;
    }

    pub fn set_search(&self, term: &str) {
        self.lib().search_term = term.to_string();
    }

    /// Songs matching the current view and search term, in library order.
    /// Search matches title or persona, case-insensitive.
    pub fn visible_songs(&self) -> Vec<Song> {
        let lib = self.lib();
        let query = lib.search_term.to_lowercase();
        lib.songs
            .iter()
            .filter(|s| match &lib.view {
                ViewFilter::All => true,
                ViewFilter::Folder(f) => &s.folder == f,
            })
            .filter(|s| {
                query.is_empty()
                    || s.title.to_lowercase().contains(&query)
                    || s.persona.to_lowercase().contains(&query)
            })
            .cloned()
            .collect()
    }

    // ── Playback ────────────────────────────────────────────────

    /// Start ambient playback of the given songs (unknown ids are dropped).
    pub fn play_playlist(&self, ids: &[u64]) -> Option<PlayerAction> {
        let lib = self.lib();
        let songs: Vec<&Song> = ids
            .iter()
            .filter_map(|id| lib.songs.iter().find(|s| s.id == *id))
            .collect();
        let action = self.player().play_playlist(&songs);
        if action.is_none() {
            self.log.info("Nothing to play");
        }
        action
    }

    /// Play everything currently visible, honoring view and search.
    pub fn play_view(&self) -> Option<PlayerAction> {
        let ids: Vec<u64> = self.visible_songs().iter().map(|s| s.id).collect();
        self.play_playlist(&ids)
    }

    pub fn advance(&self, direction: i32) -> Option<PlayerAction> {
        self.player().advance(direction)
    }

    pub fn on_track_end(&self) -> Option<PlayerAction> {
        self.player().on_track_end()
    }

    pub fn enter_detail_playback(&self, id: u64) -> Result<PlayerAction, VaultError> {
        if !self.lib().songs.iter().any(|s| s.id == id) {
            return Err(VaultError::UnknownSong(id));
        }
        Ok(self.player().enter_detail(id))
    }

    pub fn exit_detail_playback(&self) -> Option<PlayerAction> {
        self.player().exit_detail()
    }

    /// The audio sink reports a play/pause toggle.
    pub fn note_playing(&self, playing: bool) {
        self.player().note_playing(playing);
    }

    pub fn active_song_id(&self) -> Option<u64> {
        self.player().active_song_id()
    }

    pub fn detail_excursion_pending(&self) -> bool {
        self.player().has_saved_context()
    }
}
