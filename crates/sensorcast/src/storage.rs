//! Keyed JSON document storage with whole-document replacement.
//!
//! Each sensor type owns two documents: its raw history and its reconciled
//! forecast table. A [`Backend`] maps a [`DocumentKey`] to bytes; writes
//! replace the whole document so readers never observe a partial one.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{ForecastError, ForecastResult, SensorType};

/// Which per-sensor document a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    History,
    Forecast,
}

/// Identity of one stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub sensor: SensorType,
    pub table: Table,
}

impl DocumentKey {
    pub fn history(sensor: SensorType) -> Self {
        Self {
            sensor,
            table: Table::History,
        }
    }

    pub fn forecast(sensor: SensorType) -> Self {
        Self {
            sensor,
            table: Table::Forecast,
        }
    }

    /// File name used by the filesystem backend.
    pub fn file_name(&self) -> String {
        match self.table {
            Table::History => format!("{}_data.json", self.sensor),
            Table::Forecast => format!("{}_predictions.json", self.sensor),
        }
    }
}

/// A store of whole documents addressed by key.
pub trait Backend: Send + Sync {
    /// Read a document. `Ok(None)` when it was never written.
    fn read(&self, key: &DocumentKey) -> ForecastResult<Option<Vec<u8>>>;

    /// Replace a document in full. On error the previous content is kept.
    fn write(&self, key: &DocumentKey, bytes: &[u8]) -> ForecastResult<()>;

    /// Whether a document exists.
    fn exists(&self, key: &DocumentKey) -> bool {
        matches!(self.read(key), Ok(Some(_)))
    }
}

/// Documents stored as files under one directory.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &DocumentKey) -> PathBuf {
        self.root.join(key.file_name())
    }
}

impl Backend for FsBackend {
    fn read(&self, key: &DocumentKey) -> ForecastResult<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &DocumentKey, bytes: &[u8]) -> ForecastResult<()> {
        write_atomic(&self.path_for(key), bytes)?;
        Ok(())
    }
}

/// Replace the file at `path` with `bytes` via a synced sibling temp file and a rename.
///
/// Readers see either the old content or the new, never a partial write.
/// Parent directories are created as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{name}.tmp"));
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Documents held in memory; used by tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    docs: RwLock<HashMap<DocumentKey, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn read(&self, key: &DocumentKey) -> ForecastResult<Option<Vec<u8>>> {
        let docs = self
            .docs
            .read()
            .map_err(|_| ForecastError::Storage("memory backend lock poisoned".to_string()))?;
        Ok(docs.get(key).cloned())
    }

    fn write(&self, key: &DocumentKey, bytes: &[u8]) -> ForecastResult<()> {
        let mut docs = self
            .docs
            .write()
            .map_err(|_| ForecastError::Storage("memory backend lock poisoned".to_string()))?;
        docs.insert(*key, bytes.to_vec());
        Ok(())
    }
}

/// Read a JSON array document strictly. `Ok(None)` when absent.
pub fn read_array<T: DeserializeOwned>(
    backend: &dyn Backend,
    key: &DocumentKey,
) -> ForecastResult<Option<Vec<T>>> {
    match backend.read(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Read a JSON array document, treating absent or undecodable content as empty.
///
/// Only a decode failure is forgiven. Backend errors propagate so callers
/// abort before writing over a document they could not read.
pub fn load_array_lenient<T: DeserializeOwned>(
    backend: &dyn Backend,
    key: &DocumentKey,
) -> ForecastResult<Vec<T>> {
    match read_array(backend, key) {
        Ok(Some(items)) => Ok(items),
        Ok(None) => Ok(Vec::new()),
        Err(ForecastError::Json(e)) => {
            tracing::warn!(
                sensor = %key.sensor,
                document = %key.file_name(),
                "Corrupt document treated as empty: {e}"
            );
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Serialize items as a pretty JSON array and replace the document.
pub fn save_array<T: Serialize>(
    backend: &dyn Backend,
    key: &DocumentKey,
    items: &[T],
) -> ForecastResult<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    items.serialize(&mut ser)?;
    backend.write(key, &buf)
}
