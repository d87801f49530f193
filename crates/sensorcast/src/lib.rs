//! SensorCast: core library for sensor history, polynomial forecasting, and reconciled forecast tables.

pub mod features;
pub mod forecast;
pub mod history;
pub mod reconcile;
pub mod regression;
pub mod storage;
pub mod types;

pub use features::{extract, FeatureVector, FEATURE_DIM};
pub use forecast::{
    predict_future, predict_history, quantized_horizon, Forecast, ForecastSettings,
    PUBLICATION_MINUTES,
};
pub use history::HistoryStore;
pub use reconcile::{merge, MergeSummary, ReconciliationStore};
pub use regression::{fit, PolynomialModel, DEFAULT_DEGREE, MAX_DEGREE};
pub use storage::{Backend, DocumentKey, FsBackend, MemoryBackend, Table};
pub use types::*;
