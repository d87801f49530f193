//! Raw capture log of every inbound feed payload.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;

use crate::types::{ServerError, ServerResult};

/// File name of the capture log inside the data directory.
pub const CAPTURE_FILE: &str = "mqtt_data.json";

/// Entries returned by [`RawCaptureLog::latest`] when no count is given.
pub const DEFAULT_LATEST: usize = 9;

/// Append-only JSON array of payloads, stored exactly as received.
pub struct RawCaptureLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RawCaptureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Capture log at the standard location under `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(CAPTURE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one payload as a single entry. Returns the new entry count.
    ///
    /// A corrupt log is started over. A log that cannot be read fails the
    /// append and is left as it is.
    pub fn append(&self, payload: &Value) -> ServerResult<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut entries = self.read_entries_lenient()?;
        entries.push(payload.clone());
        self.write_entries(&entries)?;
        Ok(entries.len())
    }

    /// The last `n` captured payloads, oldest first. A corrupt log reads as empty.
    pub fn latest(&self, n: usize) -> ServerResult<Vec<Value>> {
        let mut entries = self.read_entries_lenient()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    fn read_entries(&self) -> ServerResult<Vec<Value>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_entries_lenient(&self) -> ServerResult<Vec<Value>> {
        match self.read_entries() {
            Err(ServerError::Json(e)) => {
                tracing::warn!(path = %self.path.display(), "Corrupt capture log treated as empty: {e}");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    fn write_entries(&self, entries: &[Value]) -> ServerResult<()> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        entries.serialize(&mut ser)?;

        sensorcast::storage::write_atomic(&self.path, &buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let log = RawCaptureLog::in_dir(dir.path());
        assert!(log.latest(DEFAULT_LATEST).unwrap().is_empty());

        for i in 0..12 {
            log.append(&json!({"seq": i})).unwrap();
        }

        let latest = log.latest(DEFAULT_LATEST).unwrap();
        assert_eq!(latest.len(), 9);
        assert_eq!(latest[0], json!({"seq": 3}));
        assert_eq!(latest[8], json!({"seq": 11}));
        assert_eq!(log.latest(50).unwrap().len(), 12);
    }

    #[test]
    fn test_batch_payload_is_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = RawCaptureLog::in_dir(dir.path());
        let count = log
            .append(&json!([{"timestamp": "2024-01-01T00:00:00"}, {"timestamp": "2024-01-01T00:20:00"}]))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_corrupt_log_is_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let log = RawCaptureLog::in_dir(dir.path());
        std::fs::write(log.path(), "{not json").unwrap();

        assert!(log.latest(9).unwrap().is_empty());
        assert_eq!(log.append(&json!({"ok": true})).unwrap(), 1);
        assert_eq!(log.latest(9).unwrap(), vec![json!({"ok": true})]);
    }

    #[test]
    fn test_unreadable_log_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the log path cannot be read as a file.
        let log = RawCaptureLog::new(dir.path().join("captures"));
        std::fs::create_dir(log.path()).unwrap();

        assert!(matches!(log.append(&json!({"ok": true})), Err(ServerError::Io(_))));
        assert!(matches!(log.latest(9), Err(ServerError::Io(_))));
        assert!(log.path().is_dir());
    }

    #[test]
    fn test_append_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = RawCaptureLog::in_dir(dir.path());
        log.append(&json!({"seq": 1})).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(CAPTURE_FILE)]);
    }
}
