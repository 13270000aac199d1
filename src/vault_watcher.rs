use crate::logging::LogState;
use crate::vault_store::{is_audio_file, MANIFEST_FILE};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Collapse bursts of file events into one notification.
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(5);

/// Notification that the vault's audio files changed on disk. The host
/// reacts by scheduling a rescan; the scan-generation guard makes that safe
/// even if several notifications pile up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultEvent {
    Changed,
}

/// Watch the vault root for external changes to its audio files.
///
/// Runs on its own thread for the lifetime of the process; the returned
/// receiver yields debounced [`VaultEvent::Changed`] notifications. Our own
/// writes (the manifest, saved covers, temp files) are filtered out so a
/// save does not trigger a pointless rescan.
pub fn start_vault_watcher(root: PathBuf, log: Arc<LogState>) -> Receiver<VaultEvent> {
    let (out_tx, out_rx) = channel();

    thread::spawn(move || {
        let (tx, rx) = channel();

        let mut watcher: RecommendedWatcher = match RecommendedWatcher::new(tx, Config::default())
        {
            Ok(w) => w,
            Err(e) => {
                log.error(&format!("Failed to create vault watcher: {}", e));
                return;
            }
        };

        // Non-recursive: the scan itself does not descend into
        // subdirectories either.
        if let Err(e) = watcher.watch(&root, RecursiveMode::NonRecursive) {
            log.error(&format!("Failed to watch vault directory {:?}: {}", root, e));
            return;
        }
        log.info(&format!("Watching vault directory: {:?}", root));

        let mut last_emit = Instant::now()
            .checked_sub(Duration::from_secs(60))
            .unwrap_or_else(Instant::now);

        loop {
            match rx.recv() {
                Ok(res) => match res {
                    Ok(event) => {
                        let relevant = event.paths.iter().any(|p| is_relevant(p));
                        if !relevant {
                            continue;
                        }

                        log.debug(&format!("Vault file event: {:?}", event.kind));

                        if last_emit.elapsed() > DEBOUNCE_WINDOW {
                            last_emit = Instant::now();
                            log.info("Detected external changes to vault audio files");
                            if out_tx.send(VaultEvent::Changed).is_err() {
                                // Receiver dropped; nobody cares anymore.
                                break;
                            }
                        }
                    }
                    Err(e) => log.warn(&format!("Vault watch error: {:?}", e)),
                },
                Err(_) => break,
            }
        }
    });

    out_rx
}

/// Only audio files count. The manifest, its temp sibling, and anything
/// else (covers live in a subdirectory the non-recursive watch never sees)
/// are our own writes or noise.
fn is_relevant(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name == MANIFEST_FILE || name.ends_with(".tmp") || name.ends_with(".lock") {
        return false;
    }
    is_audio_file(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_filter_matches_audio_only() {
        assert!(is_relevant(Path::new("/vault/track.mp3")));
        assert!(is_relevant(Path::new("/vault/Track.M4A")));
        assert!(!is_relevant(Path::new("/vault/vault.json")));
        assert!(!is_relevant(Path::new("/vault/vault.json.tmp")));
        assert!(!is_relevant(Path::new("/vault/track.mp3.lock")));
        assert!(!is_relevant(Path::new("/vault/notes.txt")));
    }
}
