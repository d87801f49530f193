//! Feed consumer: the single sink every inbound payload flows through.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::capture::RawCaptureLog;
use crate::pipeline::{BatchReport, ForecastPipeline};
use crate::types::{ServerError, ServerResult};

/// Payloads buffered between producers and the consumer.
pub const FEED_CAPACITY: usize = 64;

/// Capture a payload verbatim, then run the pipeline over its readings.
///
/// A capture failure is logged and does not stop the readings from being processed.
pub async fn process_payload(
    pipeline: &Arc<ForecastPipeline>,
    capture: &Arc<RawCaptureLog>,
    payload: Value,
) -> ServerResult<BatchReport> {
    let log = Arc::clone(capture);
    let captured = payload.clone();
    match tokio::task::spawn_blocking(move || log.append(&captured)).await {
        Ok(Ok(count)) => tracing::debug!(entries = count, "Payload captured"),
        Ok(Err(e)) => tracing::error!("Failed to capture payload: {e}"),
        Err(e) => {
            return Err(ServerError::Internal(format!("capture task failed: {e}")));
        }
    }

    pipeline.ingest_payload_async(payload).await
}

/// Drain the feed channel until every sender is dropped.
pub async fn run_consumer(
    mut feed: mpsc::Receiver<Value>,
    pipeline: Arc<ForecastPipeline>,
    capture: Arc<RawCaptureLog>,
) {
    tracing::info!("Feed consumer started");
    while let Some(payload) = feed.recv().await {
        match process_payload(&pipeline, &capture, payload).await {
            Ok(report) => tracing::debug!(
                accepted = report.accepted.len(),
                rejected = report.rejected.len(),
                "Payload processed"
            ),
            Err(e) => tracing::warn!("Payload dropped: {e}"),
        }
    }
    tracing::info!("Feed closed, consumer stopped");
}
