pub mod logging;
pub mod metadata;
pub mod models;
pub mod playback;
pub mod reconcile;
pub mod session;
pub mod vault_store;
pub mod vault_watcher;

pub use logging::LogState;
pub use models::{Manifest, Song, UNSORTED_FOLDER};
pub use playback::{PlaybackContext, PlayerAction};
pub use session::{ScanSummary, SongEdit, VaultSession, ViewFilter};
pub use vault_store::{VaultError, VaultStore};
pub use vault_watcher::VaultEvent;
