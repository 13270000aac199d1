use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Maximum size per log file before rotation (~5 MB)
const MAX_LOG_FILE_SIZE: u64 = 5 * 1024 * 1024;
/// Number of rotated log files to keep
const MAX_LOG_FILES: usize = 5;
/// In-memory log buffer cap (exposed to any host log view)
const MAX_MEMORY_LOGS: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

/// Session logging: an in-memory buffer plus a persistent rotated log file.
/// Owned by the session (behind an `Arc`) and handed to collaborators
/// explicitly; there is no global logger.
#[derive(Debug)]
pub struct LogState {
    logs: Mutex<Vec<LogEntry>>,
    log_dir: Mutex<Option<PathBuf>>,
    debug_mode: AtomicBool,
}

impl Default for LogState {
    fn default() -> Self {
        Self::new()
    }
}

impl LogState {
    pub fn new() -> Self {
        Self {
            logs: Mutex::new(Vec::new()),
            log_dir: Mutex::new(None),
            debug_mode: AtomicBool::new(false),
        }
    }

    /// Initialise the persistent log directory under the platform's local
    /// data dir. Without this, logging stays memory-only.
    pub fn init_log_dir(&self) {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("soundvault/logs");

        if let Err(e) = fs::create_dir_all(&log_dir) {
            eprintln!("[LogState] Failed to create log directory {:?}: {}", log_dir, e);
            return;
        }

        if let Ok(mut dir) = self.log_dir.lock() {
            *dir = Some(log_dir.clone());
        }

        // Write a startup marker
        self.write_to_file(
            "INFO",
            &format!(
                "=== soundvault session started at {} ===",
                Local::now().format("%Y-%m-%d %H:%M:%S %Z")
            ),
        );
    }

    /// The current (active) log file path.
    fn current_log_path(&self) -> Option<PathBuf> {
        self.log_dir.lock().ok()?.as_ref().map(|d| d.join("soundvault.log"))
    }

    pub fn get_log_dir(&self) -> Option<PathBuf> {
        self.log_dir.lock().ok()?.clone()
    }

    /// Rotate log files: soundvault.log → soundvault.1.log → …
    fn rotate_if_needed(&self) {
        let Some(current) = self.current_log_path() else { return };
        let file_size = fs::metadata(&current).map(|m| m.len()).unwrap_or(0);
        if file_size < MAX_LOG_FILE_SIZE {
            return;
        }

        let Some(dir) = self.get_log_dir() else { return };

        // Shift existing rotated files
        for i in (1..MAX_LOG_FILES).rev() {
            let from = dir.join(format!("soundvault.{}.log", i));
            let to = dir.join(format!("soundvault.{}.log", i + 1));
            let _ = fs::rename(&from, &to);
        }
        // Rotate current → .1
        let _ = fs::rename(&current, dir.join("soundvault.1.log"));
    }

    /// Append a formatted line to the persistent log file.
    fn write_to_file(&self, level: &str, message: &str) {
        self.rotate_if_needed();
        let Some(path) = self.current_log_path() else { return };

        let line = format!(
            "[{}] [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            message
        );

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
            let _ = file.write_all(line.as_bytes());
        }
    }

    /// Core logging method: writes to memory and, if configured, to file.
    pub fn add_log(&self, level: &str, message: &str) {
        // Skip DEBUG messages if debug mode is off
        if level == "DEBUG" && !self.debug_mode.load(Ordering::Relaxed) {
            return;
        }

        let entry = LogEntry {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            level: level.to_string(),
            message: message.to_string(),
        };

        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.push(entry);
        if logs.len() > MAX_MEMORY_LOGS {
            let drain_count = MAX_MEMORY_LOGS / 5;
            logs.drain(..drain_count);
        }
        drop(logs);

        self.write_to_file(level, message);
    }

    pub fn info(&self, message: &str) {
        self.add_log("INFO", message);
    }

    pub fn warn(&self, message: &str) {
        self.add_log("WARN", message);
    }

    pub fn error(&self, message: &str) {
        self.add_log("ERROR", message);
    }

    pub fn debug(&self, message: &str) {
        self.add_log("DEBUG", message);
    }

    /// Snapshot of the in-memory buffer, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_debug(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug_mode.store(enabled, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_entries_are_gated() {
        let log = LogState::new();
        log.debug("hidden");
        assert!(log.entries().is_empty());

        log.set_debug(true);
        log.debug("visible");
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, "DEBUG");
        assert_eq!(entries[0].message, "visible");
    }

    #[test]
    fn memory_buffer_is_capped() {
        let log = LogState::new();
        for i in 0..2100 {
            log.info(&format!("entry {}", i));
        }
        let entries = log.entries();
        assert!(entries.len() <= 2000);
        // Oldest entries were drained, newest kept.
        assert_eq!(entries.last().unwrap().message, "entry 2099");
    }
}
