use crate::logging::LogState;
use crate::metadata::{EmbeddedTags, TagReader};
use crate::models::{today_stamp, CoverArt, Manifest, ScanStatus, Song, SongMeta, UNSORTED_FOLDER};
use crate::vault_store::{AudioEntry, VaultStore};

/// What a reconciliation pass did, for logging and host display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub total: usize,
    pub added: usize,
    pub refreshed: usize,
    pub tag_failures: usize,
}

/// The merged library produced by one reconciliation pass.
#[derive(Debug)]
pub struct ScanOutcome {
    pub songs: Vec<Song>,
    pub folders: Vec<String>,
    pub stats: ScanStats,
}

/// Merge the on-disk file set with the prior manifest and freshly read
/// embedded tags.
///
/// Per directory entry:
/// - an existing manifest entry is matched by exact filename;
/// - tags are read only for new files, or for every file when
///   `force_refresh` is set; otherwise the prior entry is reused verbatim
///   (only its handle is refreshed);
/// - on a tag read the merge is field-by-field: title and persona fall back
///   tag -> prior -> hard default, genre is overwritten only when the tag
///   provides one, and an album name moves the song out of "Unsorted" but
///   never out of a folder the user chose;
/// - a per-file reader failure downgrades that file to its prior entry or a
///   minimal default and the pass continues.
///
/// Entries are processed sequentially so a folder auto-created from one
/// file's album is visible to later files in the same pass.
pub fn reconcile(
    manifest: &Manifest,
    entries: &[AudioEntry],
    store: &VaultStore,
    reader: &dyn TagReader,
    force_refresh: bool,
    log: &LogState,
) -> ScanOutcome {
    let mut folders = manifest.folders.clone();
    let mut next_id = manifest.next_song_id();
    let mut songs: Vec<Song> = Vec::with_capacity(entries.len());
    let mut tag_failures = 0usize;

    for entry in entries {
        let prior = manifest.song_by_filename(&entry.filename).cloned();
        let had_prior = prior.is_some();

        let mut song = if force_refresh || !had_prior {
            match reader.read(&entry.path) {
                Ok(tags) => {
                    let base = match prior {
                        Some(p) => p,
                        None => {
                            let fresh = fresh_default(&entry.filename, next_id);
                            next_id += 1;
                            fresh
                        }
                    };
                    let mut merged = merge_embedded(base, &tags, &mut folders);
                    merged.status = if had_prior {
                        ScanStatus::Updated
                    } else {
                        ScanStatus::New
                    };
                    merged
                }
                Err(e) => {
                    tag_failures += 1;
                    log.warn(&format!(
                        "Failed to read tags from {}: {}",
                        entry.filename, e
                    ));
                    match prior {
                        Some(mut p) => {
                            p.status = ScanStatus::Unchanged;
                            p
                        }
                        None => {
                            let fresh = fresh_default(&entry.filename, next_id);
                            next_id += 1;
                            fresh
                        }
                    }
                }
            }
        } else {
            let mut p = prior.unwrap_or_else(|| fresh_default(&entry.filename, next_id));
            p.status = ScanStatus::Unchanged;
            p
        };

        // A saved local cover wins for display when it is still there; a
        // missing file is silently tolerated.
        if let Some(rel) = song.cover_path.clone() {
            let abs = store.cover_abs_path(&rel);
            if abs.is_file() {
                song.cover = CoverArt::LocalFile(abs);
            }
        }

        // Every song's membership must appear in the folder list, even if
        // the manifest arrived with a name the list never recorded.
        if !folders.iter().any(|f| f == &song.folder) {
            folders.push(song.folder.clone());
        }

        // Always re-attach a fresh handle.
        song.path = Some(entry.path.clone());
        songs.push(song);
    }

    // Newest first. Ids come from a monotonic sequence, so this is a stable
    // creation-order sort.
    songs.sort_by(|a, b| b.id.cmp(&a.id));

    let stats = ScanStats {
        total: songs.len(),
        added: songs
            .iter()
            .filter(|s| s.status == ScanStatus::New)
            .count(),
        refreshed: songs
            .iter()
            .filter(|s| s.status == ScanStatus::Updated)
            .count(),
        tag_failures,
    };

    ScanOutcome {
        songs,
        folders,
        stats,
    }
}

/// The default record for a filename seen for the first time.
fn fresh_default(filename: &str, id: u64) -> Song {
    Song {
        id,
        filename: filename.to_string(),
        title: filename_stem(filename).to_string(),
        persona: "Unknown".to_string(),
        folder: UNSORTED_FOLDER.to_string(),
        tags: Vec::new(),
        meta: SongMeta::default(),
        prompt: String::new(),
        lyrics: String::new(),
        memo: String::new(),
        created_at: today_stamp(),
        cover_path: None,
        path: None,
        status: ScanStatus::New,
        cover: CoverArt::None,
    }
}

/// Field-by-field merge of embedded tags over a base record.
fn merge_embedded(mut song: Song, tags: &EmbeddedTags, folders: &mut Vec<String>) -> Song {
    // Tag value wins, then the base value, then the hard default. A song is
    // never left without a title.
    if let Some(title) = &tags.title {
        song.title = title.clone();
    } else if song.title.trim().is_empty() {
        song.title = filename_stem(&song.filename).to_string();
    }

    if let Some(artist) = &tags.artist {
        song.persona = artist.clone();
    } else if song.persona.trim().is_empty() {
        song.persona = "Unknown".to_string();
    }

    // Genre merge is additive: overwrite only when the tag provided one.
    if let Some(genre) = &tags.genre {
        song.meta.genre = genre.clone();
    }

    // Tag-embedded cover, else whatever the base already had.
    if let Some(cover) = &tags.cover {
        song.cover = CoverArt::Embedded(cover.data.clone());
    }

    // An album name maps to a folder only while the song still sits in
    // "Unsorted"; a user's explicit assignment is never overridden.
    if let Some(album) = &tags.album {
        if song.folder == UNSORTED_FOLDER {
            if !folders.iter().any(|f| f == album) {
                folders.push(album.clone());
            }
            song.folder = album.clone();
        }
    }

    song
}

/// Filename with its final extension stripped.
fn filename_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::EmbeddedCover;
    use anyhow::bail;
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Reader scripted per filename; records which files it was asked for.
    #[derive(Default)]
    struct ScriptedReader {
        tags: HashMap<String, EmbeddedTags>,
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedReader {
        fn with_tags(mut self, filename: &str, tags: EmbeddedTags) -> Self {
            self.tags.insert(filename.to_string(), tags);
            self
        }

        fn failing_on(mut self, filename: &str) -> Self {
            self.failing.insert(filename.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TagReader for ScriptedReader {
        fn read(&self, path: &Path) -> anyhow::Result<EmbeddedTags> {
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            self.calls.lock().unwrap().push(name.clone());
            if self.failing.contains(&name) {
                bail!("scripted tag failure");
            }
            Ok(self.tags.get(&name).cloned().unwrap_or_default())
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: VaultStore,
        log: LogState,
    }

    impl Fixture {
        fn new(filenames: &[&str]) -> Self {
            let dir = TempDir::new().unwrap();
            for name in filenames {
                std::fs::write(dir.path().join(name), b"audio").unwrap();
            }
            let store =
                VaultStore::open(dir.path().to_path_buf(), Arc::new(LogState::new())).unwrap();
            Fixture {
                _dir: dir,
                store,
                log: LogState::new(),
            }
        }

        fn run(
            &self,
            manifest: &Manifest,
            reader: &dyn TagReader,
            force: bool,
        ) -> ScanOutcome {
            let entries = self.store.list_audio_entries().unwrap();
            reconcile(manifest, &entries, &self.store, reader, force, &self.log)
        }
    }

    fn prior_song(id: u64, filename: &str, folder: &str, title: &str) -> Song {
        let mut song = fresh_default(filename, id);
        song.folder = folder.to_string();
        song.title = title.to_string();
        song.created_at = "2026-01-01".to_string();
        song
    }

    fn manifest_with(folders: &[&str], songs: Vec<Song>) -> Manifest {
        Manifest {
            version: crate::models::MANIFEST_VERSION.to_string(),
            folders: folders.iter().map(|f| f.to_string()).collect(),
            songs,
        }
    }

    fn by_filename<'a>(outcome: &'a ScanOutcome, name: &str) -> &'a Song {
        outcome
            .songs
            .iter()
            .find(|s| s.filename == name)
            .unwrap_or_else(|| panic!("{} missing from outcome", name))
    }

    #[test]
    fn unforced_rescan_reuses_prior_entries_verbatim() {
        let fixture = Fixture::new(&["a.mp3", "b.mp3"]);

        let mut prior = prior_song(1, "a.mp3", "Demos", "Old");
        prior.tags = vec!["keeper".to_string()];
        prior.meta.bpm = "128".to_string();
        prior.prompt = "late night synths".to_string();
        let manifest = manifest_with(&["Unsorted", "Demos"], vec![prior.clone()]);

        let reader = ScriptedReader::default();
        let outcome = fixture.run(&manifest, &reader, false);

        assert_eq!(outcome.stats.total, 2);
        assert_eq!(outcome.stats.added, 1);

        // Only the new file was read.
        assert_eq!(reader.calls(), vec!["b.mp3".to_string()]);

        // Every persisted field of the prior entry survives; only the
        // runtime handle is refreshed.
        let a = by_filename(&outcome, "a.mp3");
        assert_eq!(a.folder, "Demos");
        assert_eq!(a.title, "Old");
        assert_eq!(a.tags, prior.tags);
        assert_eq!(a.meta, prior.meta);
        assert_eq!(a.prompt, prior.prompt);
        assert_eq!(a.created_at, prior.created_at);
        assert_eq!(a.status, ScanStatus::Unchanged);
        assert!(a.path.is_some());

        let b = by_filename(&outcome, "b.mp3");
        assert_eq!(b.title, "b");
        assert_eq!(b.persona, "Unknown");
        assert_eq!(b.folder, UNSORTED_FOLDER);
        assert_eq!(b.status, ScanStatus::New);
    }

    #[test]
    fn forced_rescan_never_drops_a_user_folder() {
        let fixture = Fixture::new(&["a.mp3"]);
        let manifest = manifest_with(
            &["Unsorted", "Demos"],
            vec![prior_song(1, "a.mp3", "Demos", "Old")],
        );

        let reader = ScriptedReader::default().with_tags(
            "a.mp3",
            EmbeddedTags {
                title: Some("New Title".to_string()),
                album: Some("Demos".to_string()),
                ..Default::default()
            },
        );
        let outcome = fixture.run(&manifest, &reader, true);

        let a = by_filename(&outcome, "a.mp3");
        assert_eq!(a.title, "New Title");
        assert_eq!(a.folder, "Demos");
        assert_eq!(a.status, ScanStatus::Updated);

        // A different album name must not move it either.
        let reader = ScriptedReader::default().with_tags(
            "a.mp3",
            EmbeddedTags {
                album: Some("Bootlegs".to_string()),
                ..Default::default()
            },
        );
        let outcome = fixture.run(&manifest, &reader, true);
        assert_eq!(by_filename(&outcome, "a.mp3").folder, "Demos");
    }

    #[test]
    fn title_precedence_tag_then_prior_then_filename() {
        let fixture = Fixture::new(&["a.mp3"]);
        let manifest = manifest_with(
            &["Unsorted"],
            vec![prior_song(1, "a.mp3", UNSORTED_FOLDER, "Prior Title")],
        );

        // Tag title wins.
        let reader = ScriptedReader::default().with_tags(
            "a.mp3",
            EmbeddedTags {
                title: Some("Tagged".to_string()),
                ..Default::default()
            },
        );
        let outcome = fixture.run(&manifest, &reader, true);
        assert_eq!(by_filename(&outcome, "a.mp3").title, "Tagged");

        // No tag title: prior survives.
        let reader = ScriptedReader::default();
        let outcome = fixture.run(&manifest, &reader, true);
        assert_eq!(by_filename(&outcome, "a.mp3").title, "Prior Title");

        // No tag, no prior: filename stem. Never empty.
        let empty_manifest = manifest_with(&["Unsorted"], vec![]);
        let outcome = fixture.run(&empty_manifest, &reader, false);
        assert_eq!(by_filename(&outcome, "a.mp3").title, "a");
    }

    #[test]
    fn album_moves_unsorted_song_and_registers_folder_once() {
        let fixture = Fixture::new(&["new.mp3"]);
        let manifest = manifest_with(&["Unsorted"], vec![]);

        let reader = ScriptedReader::default().with_tags(
            "new.mp3",
            EmbeddedTags {
                album: Some("Singles".to_string()),
                ..Default::default()
            },
        );

        let outcome = fixture.run(&manifest, &reader, false);
        let song = by_filename(&outcome, "new.mp3");
        assert_eq!(song.folder, "Singles");
        assert_eq!(
            outcome.folders.iter().filter(|f| *f == "Singles").count(),
            1
        );

        // Repeated scans must not register the folder again.
        let next_manifest = Manifest {
            version: crate::models::MANIFEST_VERSION.to_string(),
            folders: outcome.folders.clone(),
            songs: outcome.songs.clone(),
        };
        let again = fixture.run(&next_manifest, &reader, true);
        assert_eq!(
            again.folders.iter().filter(|f| *f == "Singles").count(),
            1
        );
        assert_eq!(by_filename(&again, "new.mp3").folder, "Singles");
    }

    #[test]
    fn genre_merge_is_additive() {
        let fixture = Fixture::new(&["a.mp3"]);
        let mut prior = prior_song(1, "a.mp3", UNSORTED_FOLDER, "Old");
        prior.meta.genre = "House".to_string();
        let manifest = manifest_with(&["Unsorted"], vec![prior]);

        // No genre in the tag: the prior genre is preserved.
        let reader = ScriptedReader::default().with_tags(
            "a.mp3",
            EmbeddedTags {
                title: Some("Retitled".to_string()),
                ..Default::default()
            },
        );
        let outcome = fixture.run(&manifest, &reader, true);
        assert_eq!(by_filename(&outcome, "a.mp3").meta.genre, "House");

        // A provided genre overwrites.
        let reader = ScriptedReader::default().with_tags(
            "a.mp3",
            EmbeddedTags {
                genre: Some("Ambient".to_string()),
                ..Default::default()
            },
        );
        let outcome = fixture.run(&manifest, &reader, true);
        assert_eq!(by_filename(&outcome, "a.mp3").meta.genre, "Ambient");
    }

    #[test]
    fn reader_failure_degrades_and_scan_continues() {
        let fixture = Fixture::new(&["bad.mp3", "good.mp3"]);
        let manifest = manifest_with(&["Unsorted"], vec![]);

        let reader = ScriptedReader::default()
            .failing_on("bad.mp3")
            .with_tags(
                "good.mp3",
                EmbeddedTags {
                    title: Some("Fine".to_string()),
                    ..Default::default()
                },
            );

        let outcome = fixture.run(&manifest, &reader, false);
        assert_eq!(outcome.stats.total, 2);
        assert_eq!(outcome.stats.tag_failures, 1);

        let bad = by_filename(&outcome, "bad.mp3");
        assert_eq!(bad.title, "bad");
        assert_eq!(bad.persona, "Unknown");
        assert_eq!(bad.folder, UNSORTED_FOLDER);

        assert_eq!(by_filename(&outcome, "good.mp3").title, "Fine");
    }

    #[test]
    fn reader_failure_keeps_prior_entry_on_forced_rescan() {
        let fixture = Fixture::new(&["a.mp3"]);
        let prior = prior_song(3, "a.mp3", "Demos", "Kept");
        let manifest = manifest_with(&["Unsorted", "Demos"], vec![prior.clone()]);

        let reader = ScriptedReader::default().failing_on("a.mp3");
        let outcome = fixture.run(&manifest, &reader, true);

        let a = by_filename(&outcome, "a.mp3");
        assert_eq!(a.title, "Kept");
        assert_eq!(a.folder, "Demos");
        assert_eq!(a.id, 3);
        assert_eq!(outcome.stats.tag_failures, 1);
    }

    #[test]
    fn result_is_sorted_newest_first() {
        let fixture = Fixture::new(&["a.mp3", "b.mp3", "c.mp3"]);
        let manifest = manifest_with(
            &["Unsorted"],
            vec![prior_song(5, "b.mp3", UNSORTED_FOLDER, "b")],
        );

        let reader = ScriptedReader::default();
        let outcome = fixture.run(&manifest, &reader, false);

        // New files mint ids above the prior maximum, so they sort first.
        let ids: Vec<u64> = outcome.songs.iter().map(|s| s.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(ids, sorted);
        assert_eq!(outcome.songs.last().unwrap().filename, "b.mp3");
    }

    #[test]
    fn orphaned_folder_reference_is_registered() {
        let fixture = Fixture::new(&["a.mp3"]);
        // The manifest names a folder the list never recorded.
        let manifest = manifest_with(
            &["Unsorted"],
            vec![prior_song(1, "a.mp3", "Lost Folder", "a")],
        );

        let outcome = fixture.run(&manifest, &ScriptedReader::default(), false);
        assert!(outcome.folders.iter().any(|f| f == "Lost Folder"));
        assert_eq!(by_filename(&outcome, "a.mp3").folder, "Lost Folder");
    }

    #[test]
    fn local_cover_is_preferred_when_loadable() {
        let fixture = Fixture::new(&["a.mp3"]);
        let cover_ref = fixture.store.save_cover(&[7, 7, 7], 1, "jpg").unwrap();

        let mut prior = prior_song(1, "a.mp3", UNSORTED_FOLDER, "a");
        prior.cover_path = Some(cover_ref.clone());
        let manifest = manifest_with(&["Unsorted"], vec![prior.clone()]);

        // Even with an embedded cover in the tags, the saved local cover
        // wins for display.
        let reader = ScriptedReader::default().with_tags(
            "a.mp3",
            EmbeddedTags {
                cover: Some(EmbeddedCover {
                    data: vec![1],
                    mime: None,
                }),
                ..Default::default()
            },
        );
        let outcome = fixture.run(&manifest, &reader, true);
        let a = by_filename(&outcome, "a.mp3");
        assert_eq!(a.cover_path, Some(cover_ref));
        assert!(matches!(a.cover, CoverArt::LocalFile(_)));

        // A dangling reference is silently tolerated: embedded art stays.
        let mut dangling = prior.clone();
        dangling.cover_path = Some("covers/cover_999.jpg".to_string());
        let manifest = manifest_with(&["Unsorted"], vec![dangling]);
        let outcome = fixture.run(&manifest, &reader, true);
        let a = by_filename(&outcome, "a.mp3");
        assert_eq!(a.cover, CoverArt::Embedded(vec![1]));
    }

    #[test]
    fn filename_stem_strips_final_extension() {
        assert_eq!(filename_stem("track.mp3"), "track");
        assert_eq!(filename_stem("dots.in.name.wav"), "dots.in.name");
        assert_eq!(filename_stem("noext"), "noext");
    }
}
