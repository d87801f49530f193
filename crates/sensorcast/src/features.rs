//! Calendar feature extraction from reading timestamps.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::types::{ForecastError, ForecastResult, SensorReading};

/// Number of inputs in a feature vector.
pub const FEATURE_DIM: usize = 5;

/// Calendar components of a timestamp, one-to-one with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl FeatureVector {
    pub fn from_timestamp(ts: &NaiveDateTime) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
            day: ts.day(),
            hour: ts.hour(),
            minute: ts.minute(),
        }
    }

    /// Inputs in fixed order: year, month, day, hour, minute.
    pub fn as_array(&self) -> [f64; FEATURE_DIM] {
        [
            self.year as f64,
            self.month as f64,
            self.day as f64,
            self.hour as f64,
            self.minute as f64,
        ]
    }
}

/// Derive features and targets from readings, preserving input order.
///
/// Fails on empty input or on any non-finite value.
pub fn extract(readings: &[SensorReading]) -> ForecastResult<(Vec<FeatureVector>, Vec<f64>)> {
    if readings.is_empty() {
        return Err(ForecastError::ExtractionFailed("no readings".to_string()));
    }

    if let Some(bad) = readings.iter().find(|r| !r.value.is_finite()) {
        return Err(ForecastError::ExtractionFailed(format!(
            "non-finite value {} at {}",
            bad.value, bad.timestamp
        )));
    }

    Ok(readings
        .iter()
        .map(|r| (FeatureVector::from_timestamp(&r.timestamp), r.value))
        .unzip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reading(h: u32, m: u32, value: f64) -> SensorReading {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap();
        SensorReading::new(ts, value)
    }

    #[test]
    fn test_feature_vector_components() {
        let fv = FeatureVector::from_timestamp(&reading(17, 50, 0.0).timestamp);
        assert_eq!(
            fv,
            FeatureVector {
                year: 2024,
                month: 3,
                day: 9,
                hour: 17,
                minute: 50
            }
        );
        assert_eq!(fv.as_array(), [2024.0, 3.0, 9.0, 17.0, 50.0]);
    }

    #[test]
    fn test_extract_keeps_input_order() {
        let readings = vec![reading(1, 0, 10.0), reading(1, 20, 11.0), reading(1, 50, 12.5)];
        let (features, values) = extract(&readings).unwrap();
        assert_eq!(values, vec![10.0, 11.0, 12.5]);
        assert_eq!(
            features.iter().map(|f| f.minute).collect::<Vec<_>>(),
            vec![0, 20, 50]
        );
    }

    #[test]
    fn test_extract_empty_fails() {
        let err = extract(&[]).unwrap_err();
        assert!(matches!(err, ForecastError::ExtractionFailed(_)));
    }

    #[test]
    fn test_extract_non_finite_fails() {
        let readings = vec![reading(1, 0, 10.0), reading(1, 20, f64::NAN)];
        assert!(extract(&readings).is_err());
    }
}
