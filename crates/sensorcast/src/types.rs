//! Core data types for sensor readings, forecast records, and errors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Layout used for every persisted timestamp.
///
/// Fixed width, so lexicographic order equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Inbound layouts accepted besides RFC 3339.
const INBOUND_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

/// A measured quantity with its own history and forecast store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Temperature,
    Humidity,
    Pressure,
}

impl SensorType {
    /// Every supported sensor type, in feed dispatch order.
    pub const ALL: [SensorType; 3] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Pressure,
    ];

    /// Field name in feed payloads and file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Pressure => "pressure",
        }
    }

    /// Legacy pub/sub topic, e.g. `sensor/temperature`.
    pub fn topic(&self) -> String {
        format!("sensor/{}", self.as_str())
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = ForecastError;

    /// Accepts a bare name (`humidity`) or a topic (`sensor/humidity`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let name = name.strip_prefix("sensor/").unwrap_or(name);
        SensorType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| ForecastError::UnknownSensorType(s.to_string()))
    }
}

/// One observed value at minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(with = "minute_timestamp")]
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

impl SensorReading {
    /// Build a reading, truncating the timestamp to the minute.
    pub fn new(timestamp: NaiveDateTime, value: f64) -> Self {
        Self {
            timestamp: truncate_to_minute(timestamp),
            value,
        }
    }

    /// Parse the timestamp from any accepted inbound layout.
    pub fn parse(timestamp: &str, value: f64) -> ForecastResult<Self> {
        Ok(Self::new(parse_timestamp(timestamp)?, value))
    }
}

/// One row of the reconciled table. `actual_value` is `None` until observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub timestamp: String,
    pub actual_value: Option<f64>,
    pub predicted_value: f64,
}

impl ForecastRecord {
    /// Whether an observed value backs this record.
    pub fn is_observed(&self) -> bool {
        self.actual_value.is_some()
    }
}

/// A fitted value for a timestamp that has an observed reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalPoint {
    pub timestamp: NaiveDateTime,
    pub actual: f64,
    pub predicted: f64,
}

/// A predicted value for a timestamp past the end of history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuturePoint {
    pub timestamp: NaiveDateTime,
    pub predicted: f64,
}

/// Format a timestamp in the persisted layout.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse an inbound timestamp and truncate it to the minute.
pub fn parse_timestamp(raw: &str) -> ForecastResult<NaiveDateTime> {
    let trimmed = raw.trim();

    let parsed = INBOUND_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.naive_local())
        })
        .ok_or_else(|| ForecastError::InvalidTimestamp(raw.to_string()))?;

    Ok(truncate_to_minute(parsed))
}

fn truncate_to_minute(ts: NaiveDateTime) -> NaiveDateTime {
    NaiveTime::from_hms_opt(ts.hour(), ts.minute(), 0)
        .map(|t| ts.date().and_time(t))
        .unwrap_or(ts)
}

mod minute_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur in the forecasting library.
#[derive(thiserror::Error, Debug)]
pub enum ForecastError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Feature extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Insufficient samples: need {required}, have {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    #[error("Numerical error: {0}")]
    NumericalError(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unknown sensor type: {0}")]
    UnknownSensorType(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ForecastError {
    /// Degenerate-data errors mean "not ready yet" rather than a fault.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ForecastError::InsufficientSamples { .. })
    }
}

/// Convenience result type.
pub type ForecastResult<T> = Result<T, ForecastError>;
