//! Append-only per-sensor log of observed readings.

use std::sync::Arc;

use crate::storage::{self, Backend, DocumentKey};
use crate::types::{ForecastResult, SensorReading, SensorType};

/// Raw reading history, one document per sensor type.
///
/// Timestamps are not deduplicated on append; every reading is retained.
#[derive(Clone)]
pub struct HistoryStore {
    backend: Arc<dyn Backend>,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Append a reading and persist the whole log.
    ///
    /// A corrupt existing log is started over. A log that cannot be read at
    /// all fails the append and is left untouched.
    pub fn append(&self, sensor: SensorType, reading: SensorReading) -> ForecastResult<usize> {
        let key = DocumentKey::history(sensor);
        let mut readings: Vec<SensorReading> = storage::load_array_lenient(&*self.backend, &key)?;
        readings.push(reading);
        storage::save_array(&*self.backend, &key, &readings)?;
        Ok(readings.len())
    }

    /// All readings ascending by timestamp; duplicates keep append order.
    pub fn load_all(&self, sensor: SensorType) -> ForecastResult<Vec<SensorReading>> {
        let mut readings: Vec<SensorReading> =
            storage::load_array_lenient(&*self.backend, &DocumentKey::history(sensor))?;
        readings.sort_by_key(|r| r.timestamp);
        Ok(readings)
    }

    /// Readings in stored (append) order, strictly. `Ok(None)` if never written.
    pub fn raw(&self, sensor: SensorType) -> ForecastResult<Option<Vec<SensorReading>>> {
        storage::read_array(&*self.backend, &DocumentKey::history(sensor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsBackend, MemoryBackend};
    use crate::types::ForecastError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn memory_store() -> (HistoryStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (HistoryStore::new(backend.clone()), backend)
    }

    #[test]
    fn test_load_all_sorts_ascending() {
        let (store, _) = memory_store();
        store.append(SensorType::Temperature, SensorReading::new(at(1, 20), 2.0)).unwrap();
        store.append(SensorType::Temperature, SensorReading::new(at(1, 0), 1.0)).unwrap();
        store.append(SensorType::Temperature, SensorReading::new(at(1, 50), 3.0)).unwrap();

        let values: Vec<f64> = store
            .load_all(SensorType::Temperature)
            .unwrap()
            .iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_duplicates_are_retained_in_append_order() {
        let (store, _) = memory_store();
        store.append(SensorType::Humidity, SensorReading::new(at(2, 0), 40.0)).unwrap();
        let count = store
            .append(SensorType::Humidity, SensorReading::new(at(2, 0), 41.0))
            .unwrap();
        assert_eq!(count, 2);

        let all = store.load_all(SensorType::Humidity).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].value, 40.0);
        assert_eq!(all[1].value, 41.0);
    }

    #[test]
    fn test_sensor_types_are_independent() {
        let (store, _) = memory_store();
        store.append(SensorType::Pressure, SensorReading::new(at(0, 0), 1013.0)).unwrap();
        assert!(store.load_all(SensorType::Temperature).unwrap().is_empty());
        assert_eq!(store.load_all(SensorType::Pressure).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_log_is_replaced_on_append() {
        let (store, backend) = memory_store();
        let key = DocumentKey::history(SensorType::Temperature);
        backend.write(&key, b"[{\"timestamp\": 12").unwrap();

        assert!(store.load_all(SensorType::Temperature).unwrap().is_empty());
        store.append(SensorType::Temperature, SensorReading::new(at(0, 0), 20.0)).unwrap();
        assert_eq!(store.load_all(SensorType::Temperature).unwrap().len(), 1);
    }

    #[test]
    fn test_file_roundtrip_preserves_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(Arc::new(FsBackend::new(dir.path())));
        let readings = vec![
            SensorReading::new(at(0, 0), 20.0),
            SensorReading::new(at(0, 20), 20.5),
            SensorReading::new(at(0, 50), 21.25),
        ];
        for r in &readings {
            store.append(SensorType::Temperature, *r).unwrap();
        }

        let reopened = HistoryStore::new(Arc::new(FsBackend::new(dir.path())));
        assert_eq!(reopened.load_all(SensorType::Temperature).unwrap(), readings);
        assert_eq!(reopened.raw(SensorType::Temperature).unwrap().unwrap(), readings);
    }

    /// In-memory backend whose reads can be switched to fail.
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_reads: AtomicBool,
    }

    impl Backend for FlakyBackend {
        fn read(&self, key: &DocumentKey) -> ForecastResult<Option<Vec<u8>>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into());
            }
            self.inner.read(key)
        }

        fn write(&self, key: &DocumentKey, bytes: &[u8]) -> ForecastResult<()> {
            self.inner.write(key, bytes)
        }
    }

    #[test]
    fn test_read_error_keeps_existing_log() {
        let backend = Arc::new(FlakyBackend::default());
        let store = HistoryStore::new(backend.clone());
        for minute in 0..10 {
            store
                .append(SensorType::Temperature, SensorReading::new(at(0, minute), 20.0))
                .unwrap();
        }

        backend.fail_reads.store(true, Ordering::SeqCst);
        let result = store.append(SensorType::Temperature, SensorReading::new(at(0, 30), 21.0));
        assert!(matches!(result, Err(ForecastError::Io(_))));
        assert!(store.load_all(SensorType::Temperature).is_err());

        backend.fail_reads.store(false, Ordering::SeqCst);
        assert_eq!(store.load_all(SensorType::Temperature).unwrap().len(), 10);
    }
}
