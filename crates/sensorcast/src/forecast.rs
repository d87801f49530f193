//! Historical fit values and quantized future forecasts.

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::features::{self, FeatureVector};
use crate::regression::{self, PolynomialModel, DEFAULT_DEGREE};
use crate::types::{
    ForecastError, ForecastResult, FuturePoint, HistoricalPoint, SensorReading,
};

/// Minutes of the hour at which the upstream feed publishes.
pub const PUBLICATION_MINUTES: [u32; 3] = [0, 20, 50];

/// Knobs of one forecast run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastSettings {
    /// Polynomial degree of the regression.
    pub degree: usize,
    /// Spacing of candidate future timestamps.
    pub step_minutes: i64,
    /// Number of candidate steps past the last reading.
    pub horizon_steps: usize,
    /// Minutes of the hour a candidate must fall on to be kept.
    pub cadence: Vec<u32>,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            degree: DEFAULT_DEGREE,
            step_minutes: 10,
            horizon_steps: 18,
            cadence: PUBLICATION_MINUTES.to_vec(),
        }
    }
}

impl ForecastSettings {
    /// Length of the forecast window.
    pub fn horizon(&self) -> Duration {
        Duration::minutes(self.step_minutes * self.horizon_steps as i64)
    }
}

/// Output of one forecast run over a sensor's full history.
#[derive(Debug, Clone)]
pub struct Forecast {
    pub historical: Vec<HistoricalPoint>,
    pub future: Vec<FuturePoint>,
    pub r_squared: f64,
}

impl Forecast {
    /// Extract features, fit a fresh model, and predict history and future.
    ///
    /// `readings` must be ascending by timestamp, as the history store returns them.
    pub fn run(readings: &[SensorReading], settings: &ForecastSettings) -> ForecastResult<Self> {
        let (feature_rows, values) = features::extract(readings)?;
        let model = regression::fit(&feature_rows, &values, settings.degree)?;

        let fitted = predict_history(&model, &feature_rows);
        let historical: Vec<HistoricalPoint> = readings
            .iter()
            .zip(fitted)
            .map(|(r, predicted)| HistoricalPoint {
                timestamp: r.timestamp,
                actual: r.value,
                predicted,
            })
            .collect();
        if historical.iter().any(|p| !p.predicted.is_finite()) {
            return Err(ForecastError::NumericalError(
                "non-finite historical prediction".to_string(),
            ));
        }

        let last = readings
            .last()
            .map(|r| r.timestamp)
            .ok_or_else(|| ForecastError::ExtractionFailed("no readings".to_string()))?;
        let future = predict_future(&model, last, settings)?;

        Ok(Self {
            historical,
            future,
            r_squared: model.r_squared(),
        })
    }
}

/// Fitted value for every training point, in order.
pub fn predict_history(model: &PolynomialModel, features: &[FeatureVector]) -> Vec<f64> {
    model.predict(features)
}

/// Predict at each quantized timestamp of the horizon after `last`.
pub fn predict_future(
    model: &PolynomialModel,
    last: NaiveDateTime,
    settings: &ForecastSettings,
) -> ForecastResult<Vec<FuturePoint>> {
    quantized_horizon(last, settings)
        .into_iter()
        .map(|timestamp| {
            let predicted = model.predict_one(&FeatureVector::from_timestamp(&timestamp));
            if predicted.is_finite() {
                Ok(FuturePoint {
                    timestamp,
                    predicted,
                })
            } else {
                Err(ForecastError::NumericalError(format!(
                    "non-finite prediction at {timestamp}"
                )))
            }
        })
        .collect()
}

/// Candidate steps after `last`, kept only where the minute is on the cadence.
pub fn quantized_horizon(last: NaiveDateTime, settings: &ForecastSettings) -> Vec<NaiveDateTime> {
    (1..=settings.horizon_steps as i64)
        .map(|i| last + Duration::minutes(settings.step_minutes * i))
        .filter(|ts| settings.cadence.contains(&ts.minute()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::format_timestamp;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_quantized_horizon_from_half_hour() {
        let stamps: Vec<String> = quantized_horizon(at(0, 30), &ForecastSettings::default())
            .iter()
            .map(format_timestamp)
            .collect();
        assert_eq!(
            stamps,
            vec![
                "2024-01-01 00:50:00",
                "2024-01-01 01:00:00",
                "2024-01-01 01:20:00",
                "2024-01-01 01:50:00",
                "2024-01-01 02:00:00",
                "2024-01-01 02:20:00",
                "2024-01-01 02:50:00",
                "2024-01-01 03:00:00",
                "2024-01-01 03:20:00",
            ]
        );
    }

    #[test]
    fn test_quantized_horizon_invariants_for_every_minute() {
        let settings = ForecastSettings::default();
        for minute in 0..60 {
            let last = at(22, minute);
            let stamps = quantized_horizon(last, &settings);
            assert!(stamps.windows(2).all(|w| w[0] < w[1]));
            for ts in &stamps {
                assert!(PUBLICATION_MINUTES.contains(&ts.minute()));
                assert!(*ts > last && *ts <= last + settings.horizon());
            }
        }
    }

    #[test]
    fn test_off_grid_last_timestamp_yields_nothing() {
        // Steps of 10 from :05 never land on 0, 20 or 50.
        assert!(quantized_horizon(at(4, 5), &ForecastSettings::default()).is_empty());
    }

    #[test]
    fn test_horizon_crosses_midnight() {
        let stamps = quantized_horizon(at(23, 50), &ForecastSettings::default());
        assert_eq!(format_timestamp(&stamps[0]), "2024-01-02 00:00:00");
    }

    #[test]
    fn test_run_needs_enough_history() {
        let readings = vec![SensorReading::new(at(0, 0), 20.0)];
        let err = Forecast::run(&readings, &ForecastSettings::default()).unwrap_err();
        assert!(err.is_not_ready());
    }

    #[test]
    fn test_run_produces_history_and_future() {
        let readings: Vec<SensorReading> = [0, 10, 20, 30]
            .iter()
            .enumerate()
            .map(|(i, &m)| SensorReading::new(at(0, m), 20.0 + i as f64))
            .collect();
        let forecast = Forecast::run(&readings, &ForecastSettings::default()).unwrap();

        assert_eq!(forecast.historical.len(), 4);
        for (point, reading) in forecast.historical.iter().zip(readings.iter()) {
            assert_eq!(point.timestamp, reading.timestamp);
            assert_eq!(point.actual, reading.value);
            assert!((point.predicted - reading.value).abs() < 1e-6);
        }
        assert_eq!(forecast.future.len(), 9);
        assert_eq!(forecast.future[0].timestamp, at(0, 50));
    }
}
