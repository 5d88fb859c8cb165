//! Wire logging for JSON-RPC traffic.
//!
//! Everything else goes through the `log` facade; this module only keeps an
//! optional append-only file of raw requests and replies, one timestamped
//! line each.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{SecondsFormat, Utc};

/// Thread-safe handle to an append-only log file.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// Current UTC time as ISO 8601 with milliseconds (e.g. 2026-02-04T10:15:30.123Z).
fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A handle that discards everything.
pub fn disabled() -> LogHandle {
    Arc::new(Mutex::new(None))
}

/// Write a timestamped line to the log file (if present).
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let _ = writeln!(file, "[{}] {}: {}", utc_timestamp(), direction, data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) `{log_dir}/{log_id}.log` and return a shared handle.
///
/// A missing directory or an unopenable file yields a disabled handle; wire
/// logging never stops the caller.
pub fn open_log_file(log_dir: Option<&Path>, log_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        let path = dir.join(format!("{}.log", log_id));
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                log::warn!("Failed to open wire log {}: {}", path.display(), e);
                None
            }
        }
    });
    Arc::new(Mutex::new(file))
}
