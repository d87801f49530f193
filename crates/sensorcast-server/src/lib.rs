//! SensorCast service: feed ingestion, per-sensor forecast cycles and the HTTP API.

pub mod capture;
pub mod config;
pub mod events;
pub mod pipeline;
pub mod publisher;
pub mod transport;
pub mod types;

pub use capture::RawCaptureLog;
pub use events::{EventBus, PipelineEvent};
pub use pipeline::{BatchReport, CycleOutcome, ForecastPipeline, IngestReport};
pub use publisher::{PublishContext, PublishedMessage, ReplayPublisher};
pub use types::{ServerError, ServerResult};
