//! Reconciliation of observed and predicted values into one table.
//!
//! The table holds at most one [`ForecastRecord`] per timestamp, sorted
//! ascending. A record with an observed value is never downgraded back to a
//! prediction-only record by a later forecast.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::storage::{self, Backend, DocumentKey};
use crate::types::{
    format_timestamp, ForecastRecord, ForecastResult, FuturePoint, HistoricalPoint, SensorType,
};

/// Counts describing what a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Records written from the historical batch.
    pub historical: usize,
    /// Future records added at previously empty timestamps.
    pub future_inserted: usize,
    /// Stale prediction-only records replaced by a fresh prediction.
    pub future_replaced: usize,
    /// Future predictions dropped because an observed record already exists.
    pub future_skipped: usize,
    /// Size of the table after the merge.
    pub total: usize,
}

/// Merge a fresh forecast into the existing table.
///
/// Existing records at historical timestamps are replaced by the new
/// historical records; when the batch repeats a timestamp the last point
/// wins. Future points fill empty timestamps, replace prediction-only
/// records, and leave observed records untouched.
pub fn merge(
    existing: Vec<ForecastRecord>,
    historical: &[HistoricalPoint],
    future: &[FuturePoint],
) -> (Vec<ForecastRecord>, MergeSummary) {
    let mut summary = MergeSummary::default();

    let replaced: HashSet<String> = historical
        .iter()
        .map(|p| format_timestamp(&p.timestamp))
        .collect();

    let mut table: BTreeMap<String, ForecastRecord> = BTreeMap::new();
    for record in existing
        .into_iter()
        .filter(|r| !replaced.contains(&r.timestamp))
    {
        // Legacy tables may repeat a timestamp; keep the observed one.
        let keep_current = table
            .get(&record.timestamp)
            .is_some_and(|current| current.is_observed() && !record.is_observed());
        if !keep_current {
            table.insert(record.timestamp.clone(), record);
        }
    }

    for point in historical {
        let timestamp = format_timestamp(&point.timestamp);
        table.insert(
            timestamp.clone(),
            ForecastRecord {
                timestamp,
                actual_value: Some(point.actual),
                predicted_value: point.predicted,
            },
        );
    }
    summary.historical = replaced.len();

    for point in future {
        let timestamp = format_timestamp(&point.timestamp);
        match table.get(&timestamp) {
            Some(current) if current.is_observed() => {
                summary.future_skipped += 1;
                continue;
            }
            Some(_) => summary.future_replaced += 1,
            None => summary.future_inserted += 1,
        }
        table.insert(
            timestamp.clone(),
            ForecastRecord {
                timestamp,
                actual_value: None,
                predicted_value: point.predicted,
            },
        );
    }

    let records: Vec<ForecastRecord> = table.into_values().collect();
    summary.total = records.len();
    (records, summary)
}

/// Persisted reconciled tables, one per sensor type.
#[derive(Clone)]
pub struct ReconciliationStore {
    backend: Arc<dyn Backend>,
}

impl ReconciliationStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Current table, treating absent or corrupt documents as empty.
    pub fn load(&self, sensor: SensorType) -> ForecastResult<Vec<ForecastRecord>> {
        storage::load_array_lenient(&*self.backend, &DocumentKey::forecast(sensor))
    }

    /// Last committed table, strictly. `Ok(None)` when nothing was written yet.
    pub fn snapshot(&self, sensor: SensorType) -> ForecastResult<Option<Vec<ForecastRecord>>> {
        storage::read_array(&*self.backend, &DocumentKey::forecast(sensor))
    }

    /// Whether a table exists for the sensor type.
    pub fn exists(&self, sensor: SensorType) -> bool {
        self.backend.exists(&DocumentKey::forecast(sensor))
    }

    /// Load, merge and persist in one step.
    ///
    /// Callers must hold the sensor's writer lock; this is a read-modify-write.
    /// On a failed read or write the previously committed table stays in place.
    pub fn reconcile(
        &self,
        sensor: SensorType,
        historical: &[HistoricalPoint],
        future: &[FuturePoint],
    ) -> ForecastResult<MergeSummary> {
        let existing = self.load(sensor)?;
        let (records, summary) = merge(existing, historical, future);
        storage::save_array(&*self.backend, &DocumentKey::forecast(sensor), &records)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsBackend, MemoryBackend};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn hist(h: u32, m: u32, actual: f64, predicted: f64) -> HistoricalPoint {
        HistoricalPoint {
            timestamp: at(h, m),
            actual,
            predicted,
        }
    }

    fn fut(h: u32, m: u32, predicted: f64) -> FuturePoint {
        FuturePoint {
            timestamp: at(h, m),
            predicted,
        }
    }

    fn record(ts: &str, actual: Option<f64>, predicted: f64) -> ForecastRecord {
        ForecastRecord {
            timestamp: ts.to_string(),
            actual_value: actual,
            predicted_value: predicted,
        }
    }

    #[test]
    fn test_merge_into_empty_table() {
        let (records, summary) = merge(
            Vec::new(),
            &[hist(0, 0, 20.0, 20.1), hist(0, 20, 21.0, 20.9)],
            &[fut(0, 50, 22.0), fut(1, 0, 22.5)],
        );
        assert_eq!(records.len(), 4);
        assert!(records[..2].iter().all(|r| r.is_observed()));
        assert!(records[2..].iter().all(|r| !r.is_observed()));
        assert_eq!(summary.historical, 2);
        assert_eq!(summary.future_inserted, 2);
        assert_eq!(summary.total, 4);
    }

    #[test]
    fn test_historical_replaces_existing_record() {
        let existing = vec![record("2024-01-01 00:20:00", None, 5.0)];
        let (records, _) = merge(existing, &[hist(0, 20, 21.0, 20.5)], &[]);
        assert_eq!(records, vec![record("2024-01-01 00:20:00", Some(21.0), 20.5)]);
    }

    #[test]
    fn test_future_never_downgrades_observed_record() {
        let existing = vec![record("2024-01-01 00:50:00", Some(19.0), 18.0)];
        let (records, summary) = merge(existing, &[], &[fut(0, 50, 30.0)]);
        assert_eq!(records, vec![record("2024-01-01 00:50:00", Some(19.0), 18.0)]);
        assert_eq!(summary.future_skipped, 1);
    }

    #[test]
    fn test_future_replaces_stale_prediction() {
        let existing = vec![record("2024-01-01 01:00:00", None, 10.0)];
        let (records, summary) = merge(existing, &[], &[fut(1, 0, 12.0)]);
        assert_eq!(records, vec![record("2024-01-01 01:00:00", None, 12.0)]);
        assert_eq!(summary.future_replaced, 1);
    }

    #[test]
    fn test_duplicate_historical_timestamps_collapse_to_last() {
        let (records, summary) = merge(
            Vec::new(),
            &[hist(0, 0, 20.0, 20.0), hist(0, 0, 25.0, 24.0)],
            &[],
        );
        assert_eq!(records, vec![record("2024-01-01 00:00:00", Some(25.0), 24.0)]);
        assert_eq!(summary.historical, 1);
    }

    #[test]
    fn test_output_sorted_and_unique() {
        let existing = vec![
            record("2024-01-01 03:00:00", None, 1.0),
            record("2024-01-01 00:50:00", None, 1.0),
            record("2024-01-01 00:50:00", Some(2.0), 1.0),
        ];
        let (records, _) = merge(existing, &[hist(0, 0, 1.0, 1.0)], &[fut(1, 20, 1.0)]);
        let stamps: Vec<&str> = records.iter().map(|r| r.timestamp.as_str()).collect();
        assert_eq!(
            stamps,
            vec![
                "2024-01-01 00:00:00",
                "2024-01-01 00:50:00",
                "2024-01-01 01:20:00",
                "2024-01-01 03:00:00",
            ]
        );
        assert!(records[1].is_observed());
    }

    #[test]
    fn test_reconcile_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReconciliationStore::new(Arc::new(FsBackend::new(dir.path())));
        assert!(!store.exists(SensorType::Temperature));
        assert!(store.snapshot(SensorType::Temperature).unwrap().is_none());

        store
            .reconcile(SensorType::Temperature, &[hist(0, 0, 20.0, 20.0)], &[fut(0, 20, 21.0)])
            .unwrap();

        let reopened = ReconciliationStore::new(Arc::new(FsBackend::new(dir.path())));
        let loaded = reopened.snapshot(SensorType::Temperature).unwrap().unwrap();
        assert_eq!(loaded, store.load(SensorType::Temperature).unwrap());
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_corrupt_table_is_rebuilt() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .write(&DocumentKey::forecast(SensorType::Humidity), b"garbage")
            .unwrap();
        let store = ReconciliationStore::new(backend);

        assert!(store.snapshot(SensorType::Humidity).is_err());
        let summary = store
            .reconcile(SensorType::Humidity, &[hist(0, 0, 50.0, 50.0)], &[])
            .unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(store.snapshot(SensorType::Humidity).unwrap().unwrap().len(), 1);
    }

    /// Backend whose reads fail; writes are counted and dropped.
    #[derive(Default)]
    struct UnreadableBackend {
        writes: std::sync::atomic::AtomicUsize,
    }

    impl Backend for UnreadableBackend {
        fn read(&self, _key: &DocumentKey) -> ForecastResult<Option<Vec<u8>>> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "device error").into())
        }

        fn write(&self, _key: &DocumentKey, _bytes: &[u8]) -> ForecastResult<()> {
            self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_read_error_aborts_without_writing() {
        let backend = Arc::new(UnreadableBackend::default());
        let store = ReconciliationStore::new(backend.clone());

        let result = store.reconcile(SensorType::Pressure, &[hist(0, 0, 1.0, 1.0)], &[fut(0, 20, 1.0)]);
        assert!(result.is_err());
        assert_eq!(backend.writes.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
