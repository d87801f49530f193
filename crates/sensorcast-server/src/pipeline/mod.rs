//! Per-reading forecast cycles and the locks that serialize them.

pub mod locks;
pub mod manager;

pub use locks::SensorLocks;
pub use manager::{BatchReport, CycleOutcome, ForecastPipeline, IngestReport};
