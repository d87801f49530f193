//! Inbound feed payloads: JSON items with a timestamp and sensor fields.
//!
//! A payload is either an array of items or a single item. Each item
//! yields one reading per sensor field it carries, e.g.
//! `{"timestamp": "2024-01-01T00:20:00", "temperature": 21.4, "humidity": 40}`.

use serde_json::Value;

use sensorcast::{SensorReading, SensorType};

use super::{ServerError, ServerResult};

/// One `(sensor type, reading)` pair dispatched to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedReading {
    pub sensor: SensorType,
    pub reading: SensorReading,
}

/// Readings extracted from a payload, plus the items or fields that were rejected.
#[derive(Debug, Default)]
pub struct DecodedPayload {
    pub readings: Vec<FeedReading>,
    pub rejected: Vec<ServerError>,
}

/// Parse raw text as a feed payload.
pub fn parse_payload(text: &str) -> ServerResult<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ServerError::InvalidPayload("empty payload".to_string()));
    }
    serde_json::from_str(trimmed).map_err(|e| ServerError::InvalidPayload(e.to_string()))
}

/// Split a payload into readings. Bad items are collected, never fatal.
pub fn decode_payload(payload: &Value) -> ServerResult<DecodedPayload> {
    let items: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![payload],
        other => {
            return Err(ServerError::InvalidPayload(format!(
                "expected an object or array, got {}",
                json_kind(other)
            )))
        }
    };

    let mut decoded = DecodedPayload::default();
    for (index, item) in items.into_iter().enumerate() {
        if let Err(e) = decode_item(item, &mut decoded.readings) {
            decoded
                .rejected
                .push(ServerError::InvalidPayload(format!("item {index}: {e}")));
        }
    }
    Ok(decoded)
}

fn decode_item(item: &Value, out: &mut Vec<FeedReading>) -> Result<(), String> {
    let obj = item
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", json_kind(item)))?;

    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing string field 'timestamp'".to_string())?;
    let timestamp = sensorcast::parse_timestamp(timestamp).map_err(|e| e.to_string())?;

    let mut fields = Vec::new();
    for sensor in SensorType::ALL {
        let Some(raw) = obj.get(sensor.as_str()) else {
            continue;
        };
        let value = numeric(raw)
            .ok_or_else(|| format!("field '{sensor}' is not numeric: {raw}"))?;
        fields.push(FeedReading {
            sensor,
            reading: SensorReading::new(timestamp, value),
        });
    }

    if fields.is_empty() {
        return Err("no sensor fields present".to_string());
    }
    out.extend(fields);
    Ok(())
}

fn numeric(raw: &Value) -> Option<f64> {
    let value = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_dispatches_per_field() {
        let payload = json!([
            {"timestamp": "2024-01-01T00:00:00", "temperature": 20.5, "humidity": 41},
            {"timestamp": "2024-01-01 00:20:00", "pressure": "1013.2"}
        ]);
        let decoded = decode_payload(&payload).unwrap();
        assert!(decoded.rejected.is_empty());

        let sensors: Vec<SensorType> = decoded.readings.iter().map(|r| r.sensor).collect();
        assert_eq!(
            sensors,
            vec![SensorType::Temperature, SensorType::Humidity, SensorType::Pressure]
        );
        assert_eq!(decoded.readings[2].reading.value, 1013.2);
    }

    #[test]
    fn test_single_object_payload() {
        let decoded =
            decode_payload(&json!({"timestamp": "2024-01-01T00:50", "temperature": 19})).unwrap();
        assert_eq!(decoded.readings.len(), 1);
    }

    #[test]
    fn test_bad_items_are_rejected_individually() {
        let payload = json!([
            {"temperature": 20.0},
            {"timestamp": "not a time", "temperature": 20.0},
            {"timestamp": "2024-01-01T00:00:00", "temperature": "warm"},
            {"timestamp": "2024-01-01T00:00:00"},
            42,
            {"timestamp": "2024-01-01T00:20:00", "humidity": 40.0}
        ]);
        let decoded = decode_payload(&payload).unwrap();
        assert_eq!(decoded.rejected.len(), 5);
        assert_eq!(decoded.readings.len(), 1);
        assert_eq!(decoded.readings[0].sensor, SensorType::Humidity);
    }

    #[test]
    fn test_scalar_payload_is_invalid() {
        assert!(decode_payload(&json!("hello")).is_err());
    }

    #[test]
    fn test_parse_payload_errors() {
        assert!(parse_payload("").is_err());
        assert!(parse_payload(r#"{"broken":"#).is_err());
        assert!(parse_payload(r#"[{"timestamp":"2024-01-01T00:00:00"}]"#).is_ok());
    }
}
