//! Forecast pipeline: one cycle per inbound reading.
//!
//! A cycle appends the reading to history, retrains a fresh model over the
//! full history, forecasts the quantized horizon and reconciles the result
//! into the sensor's forecast table. Degenerate data ends the cycle as
//! "not ready"; any other failure ends it with the previous table intact.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use sensorcast::{
    Backend, Forecast, ForecastRecord, ForecastSettings, FsBackend, HistoryStore, MergeSummary,
    ReconciliationStore, SensorReading, SensorType,
};

use super::locks::SensorLocks;
use crate::events::{EventBus, PipelineEvent};
use crate::types::{decode_payload, ServerError, ServerResult};

/// How a cycle ended after the reading was stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// A reconciled table was committed.
    Updated {
        summary: MergeSummary,
        r_squared: f64,
    },
    /// Not enough distinct data to fit yet; nothing was written.
    NotReady { required: usize, actual: usize },
    /// Forecasting or persisting failed; the previous table stays in place.
    Failed { error: String },
}

/// Result of ingesting one reading.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub sensor: SensorType,
    pub timestamp: String,
    pub value: f64,
    pub history_len: usize,
    pub outcome: CycleOutcome,
}

/// Result of ingesting a whole feed payload.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub accepted: Vec<IngestReport>,
    pub rejected: Vec<String>,
}

/// Runs ingest → retrain → forecast → reconcile for every reading.
pub struct ForecastPipeline {
    history: HistoryStore,
    reconciled: ReconciliationStore,
    settings: ForecastSettings,
    locks: SensorLocks,
    events: Arc<EventBus>,
}

impl ForecastPipeline {
    /// Pipeline over documents in `data_dir`.
    pub fn open(data_dir: &Path, settings: ForecastSettings, events: Arc<EventBus>) -> Self {
        tracing::info!("Opening forecast store: {}", data_dir.display());
        Self::with_backend(Arc::new(FsBackend::new(data_dir)), settings, events)
    }

    pub fn with_backend(
        backend: Arc<dyn Backend>,
        settings: ForecastSettings,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            history: HistoryStore::new(Arc::clone(&backend)),
            reconciled: ReconciliationStore::new(backend),
            settings,
            locks: SensorLocks::new(),
            events,
        }
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Store one reading and run a full cycle for its sensor type.
    ///
    /// Blocks on the sensor's writer lock and on disk I/O. An error means the
    /// reading itself could not be stored. The lock serializes cycles within
    /// this process only; one process should own a data directory.
    pub fn ingest(&self, sensor: SensorType, reading: SensorReading) -> ServerResult<IngestReport> {
        self.locks.with_lock(sensor, || {
            let timestamp = sensorcast::format_timestamp(&reading.timestamp);
            let history_len = self.history.append(sensor, reading).map_err(|e| {
                tracing::error!(%sensor, %timestamp, "Failed to append reading: {e}");
                ServerError::from(e)
            })?;

            tracing::debug!(%sensor, %timestamp, value = reading.value, history_len, "Reading stored");
            self.events.emit(PipelineEvent::ReadingIngested {
                sensor,
                timestamp: timestamp.clone(),
                value: reading.value,
                history_len,
            });

            let outcome = self.run_cycle(sensor);
            Ok(IngestReport {
                sensor,
                timestamp,
                value: reading.value,
                history_len,
                outcome,
            })
        })
    }

    /// Retrain and reconcile from the stored history. Caller holds the lock.
    fn run_cycle(&self, sensor: SensorType) -> CycleOutcome {
        let started = Instant::now();
        let readings = match self.history.load_all(sensor) {
            Ok(readings) => readings,
            Err(e) => {
                tracing::error!(%sensor, "Failed to load history: {e}");
                return self.failed(sensor, e.to_string());
            }
        };

        let forecast = match Forecast::run(&readings, &self.settings) {
            Ok(forecast) => forecast,
            Err(sensorcast::ForecastError::InsufficientSamples { required, actual }) => {
                tracing::debug!(%sensor, required, actual, "Not enough data to fit yet");
                self.events.emit(PipelineEvent::ForecastSkipped {
                    sensor,
                    required,
                    actual,
                });
                return CycleOutcome::NotReady { required, actual };
            }
            Err(e) => {
                tracing::warn!(%sensor, "Forecast skipped: {e}");
                return self.failed(sensor, e.to_string());
            }
        };

        match self
            .reconciled
            .reconcile(sensor, &forecast.historical, &forecast.future)
        {
            Ok(summary) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    %sensor,
                    total = summary.total,
                    future = forecast.future.len(),
                    r_squared = forecast.r_squared,
                    elapsed_ms,
                    "Forecast table updated"
                );
                self.events.emit(PipelineEvent::forecast_updated(
                    sensor,
                    &summary,
                    forecast.r_squared,
                    elapsed_ms,
                ));
                CycleOutcome::Updated {
                    summary,
                    r_squared: forecast.r_squared,
                }
            }
            Err(e) => {
                tracing::error!(%sensor, "Failed to write forecast table: {e}");
                self.failed(sensor, e.to_string())
            }
        }
    }

    fn failed(&self, sensor: SensorType, error: String) -> CycleOutcome {
        self.events.emit(PipelineEvent::ForecastFailed {
            sensor,
            error: error.clone(),
        });
        CycleOutcome::Failed { error }
    }

    /// Dispatch every reading in a feed payload. Bad items are logged and skipped.
    pub fn ingest_payload(&self, payload: &serde_json::Value) -> ServerResult<BatchReport> {
        let decoded = decode_payload(payload)?;
        let mut report = BatchReport::default();

        for rejected in decoded.rejected {
            tracing::warn!("Skipping feed item: {rejected}");
            report.rejected.push(rejected.to_string());
        }

        for item in decoded.readings {
            match self.ingest(item.sensor, item.reading) {
                Ok(ingested) => report.accepted.push(ingested),
                Err(e) => report.rejected.push(format!("{}: {e}", item.sensor)),
            }
        }
        Ok(report)
    }

    /// [`ingest_payload`](Self::ingest_payload) on the blocking pool.
    pub async fn ingest_payload_async(
        self: &Arc<Self>,
        payload: serde_json::Value,
    ) -> ServerResult<BatchReport> {
        let pipeline = Arc::clone(self);
        tokio::task::spawn_blocking(move || pipeline.ingest_payload(&payload))
            .await
            .map_err(|e| ServerError::Internal(format!("ingest task failed: {e}")))?
    }

    /// Last committed forecast table. `NotFound` until the first successful fit.
    pub fn predictions(&self, sensor: SensorType) -> ServerResult<Vec<ForecastRecord>> {
        self.reconciled
            .snapshot(sensor)?
            .ok_or_else(|| ServerError::NotFound(format!("no predictions for {sensor} yet")))
    }

    /// Raw reading history in append order. `NotFound` until the first reading.
    pub fn history(&self, sensor: SensorType) -> ServerResult<Vec<SensorReading>> {
        self.history
            .raw(sensor)?
            .ok_or_else(|| ServerError::NotFound(format!("no history for {sensor} yet")))
    }

    /// Sensor types that have a committed forecast table.
    pub fn sensors_with_forecasts(&self) -> Vec<SensorType> {
        SensorType::ALL
            .into_iter()
            .filter(|s| self.reconciled.exists(*s))
            .collect()
    }
}
