use crate::models::Song;

/// Directive for the external audio sink. The context manager only decides
/// what should happen; it never touches audio output itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerAction {
    /// Load the song's playable source. `autoplay` false means prepare
    /// paused and wait for the user.
    Load { song_id: u64, autoplay: bool },
    /// End of the playlist: show the stopped/replay-available state.
    Stopped,
    /// No song to show; clear the now-playing display.
    ClearNowPlaying,
}

/// Ambient context captured when detail-view playback takes over the audio
/// output, restored verbatim when the detail view closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedContext {
    pub playlist: Vec<u64>,
    pub index: usize,
    pub active_song_id: Option<u64>,
    pub was_playing: bool,
}

/// Tracks the active playlist/position and the single saved-context slot
/// for detail-view excursions.
#[derive(Debug, Default)]
pub struct PlaybackContext {
    playlist: Vec<u64>,
    index: usize,
    active: Option<u64>,
    is_playing: bool,
    saved: Option<SavedContext>,
}

impl PlaybackContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the playlist wholesale and start from the top. An empty
    /// input is a no-op; the caller reports "nothing to play".
    pub fn play_playlist(&mut self, songs: &[&Song]) -> Option<PlayerAction> {
        if songs.is_empty() {
            return None;
        }
        self.playlist = songs.iter().map(|s| s.id).collect();
        self.index = 0;
        self.active = Some(self.playlist[0]);
        self.is_playing = true;
        Some(PlayerAction::Load {
            song_id: self.playlist[0],
            autoplay: true,
        })
    }

    /// Step by `direction` (+1 or -1) within the playlist. Out of bounds is
    /// a no-op; the playlist never wraps.
    pub fn advance(&mut self, direction: i32) -> Option<PlayerAction> {
        if self.playlist.is_empty() {
            return None;
        }
        let target = self.index as i64 + direction as i64;
        if target < 0 || target >= self.playlist.len() as i64 {
            return None;
        }
        self.index = target as usize;
        let song_id = self.playlist[self.index];
        self.active = Some(song_id);
        self.is_playing = true;
        Some(PlayerAction::Load {
            song_id,
            autoplay: true,
        })
    }

    /// The sink reports the current track finished. Auto-advance unless we
    /// were on the last entry, which ends in the replay-available state.
    pub fn on_track_end(&mut self) -> Option<PlayerAction> {
        if !self.playlist.is_empty() && self.index + 1 < self.playlist.len() {
            self.advance(1)
        } else {
            self.is_playing = false;
            Some(PlayerAction::Stopped)
        }
    }

    /// Open detail playback for one song. If it differs from the active
    /// song, the ambient context is snapshotted into the single saved slot
    /// and the playlist cleared; the requested song loads paused (no
    /// autoplay on detail open). Re-entering with the unchanged song leaves
    /// the snapshot alone.
    pub fn enter_detail(&mut self, song_id: u64) -> PlayerAction {
        if self.active != Some(song_id) {
            self.saved = Some(SavedContext {
                playlist: std::mem::take(&mut self.playlist),
                index: self.index,
                active_song_id: self.active,
                was_playing: self.is_playing,
            });
            self.index = 0;
            self.active = Some(song_id);
        }
        self.is_playing = false;
        PlayerAction::Load {
            song_id,
            autoplay: false,
        }
    }

    /// Close detail playback: restore the saved playlist and position
    /// verbatim with the previously active song reloaded paused, or clear
    /// the now-playing display if nothing was active before. No-op when no
    /// excursion is pending.
    pub fn exit_detail(&mut self) -> Option<PlayerAction> {
        let saved = self.saved.take()?;
        self.playlist = saved.playlist;
        self.index = saved.index;
        self.active = saved.active_song_id;
        self.is_playing = false;
        match saved.active_song_id {
            Some(song_id) => Some(PlayerAction::Load {
                song_id,
                autoplay: false,
            }),
            None => Some(PlayerAction::ClearNowPlaying),
        }
    }

    /// The sink reports the user toggled play/pause; keep `was_playing`
    /// snapshots honest.
    pub fn note_playing(&mut self, playing: bool) {
        self.is_playing = playing;
    }

    pub fn playlist(&self) -> &[u64] {
        &self.playlist
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn active_song_id(&self) -> Option<u64> {
        self.active
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn has_saved_context(&self) -> bool {
        self.saved.is_some()
    }
}
