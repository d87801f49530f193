//! Pipeline event bus: typed events from ingestion, forecasting and publishing.
//!
//! The [`EventBus`] is a `tokio::sync::broadcast` channel carrying
//! [`PipelineEvent`] values. The SSE endpoint and log sinks subscribe
//! independently; with no subscribers, events are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use sensorcast::{MergeSummary, SensorType};

/// Every event the service emits. Serialized to JSON for SSE.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A reading was appended to its sensor's history.
    ReadingIngested {
        sensor: SensorType,
        timestamp: String,
        value: f64,
        history_len: usize,
    },
    /// The cycle ended without a forecast because the data is degenerate.
    ForecastSkipped {
        sensor: SensorType,
        required: usize,
        actual: usize,
    },
    /// A reconciled table was committed.
    ForecastUpdated {
        sensor: SensorType,
        historical: usize,
        future_inserted: usize,
        future_replaced: usize,
        future_skipped: usize,
        total: usize,
        r_squared: f64,
        elapsed_ms: u64,
    },
    /// The cycle failed; the previous table stays in place.
    ForecastFailed { sensor: SensorType, error: String },
    /// The replay publisher emitted a feed message.
    MessagePublished {
        timestamp: String,
        payload: serde_json::Value,
    },
    /// The service started.
    RuntimeStarted {
        version: String,
        addr: Option<String>,
        data_dir: String,
    },
}

impl PipelineEvent {
    pub fn forecast_updated(
        sensor: SensorType,
        summary: &MergeSummary,
        r_squared: f64,
        elapsed_ms: u64,
    ) -> Self {
        PipelineEvent::ForecastUpdated {
            sensor,
            historical: summary.historical,
            future_inserted: summary.future_inserted,
            future_replaced: summary.future_replaced,
            future_skipped: summary.future_skipped,
            total: summary.total,
            r_squared,
            elapsed_ms,
        }
    }
}

/// Broadcast bus shared by the pipeline, the publisher and the HTTP layer.
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Check if an event concerns a specific sensor type.
pub fn event_matches_sensor(event: &PipelineEvent, sensor: SensorType) -> bool {
    match event {
        PipelineEvent::ReadingIngested { sensor: s, .. }
        | PipelineEvent::ForecastSkipped { sensor: s, .. }
        | PipelineEvent::ForecastUpdated { sensor: s, .. }
        | PipelineEvent::ForecastFailed { sensor: s, .. } => *s == sensor,
        PipelineEvent::MessagePublished { payload, .. } => payload_mentions(payload, sensor),
        // Not sensor-specific, so every subscriber gets it
        PipelineEvent::RuntimeStarted { .. } => true,
    }
}

fn payload_mentions(payload: &serde_json::Value, sensor: SensorType) -> bool {
    match payload {
        serde_json::Value::Array(items) => items.iter().any(|i| payload_mentions(i, sensor)),
        serde_json::Value::Object(obj) => obj.contains_key(sensor.as_str()),
        _ => false,
    }
}
