//! Sensor lib defining the telemetry record reported by the fire
//! sensors of the fire-alarm system, and the threshold checks that
//! decide whether a reported value is nominal, dangerous, or a sign
//! that the sensor itself is malfunctioning.
//!
//! Sensors push one flat record per frame over a persistent stream
//! connection. A frame is a single line holding a JSON object, keyed
//! by field name, where every value may be sent either as a string
//! (`"49.0"`) or as a plain JSON number:
//!
//! ```json
//! {"sensorId": "10-10", "temperature": "49.0", "battery": "70", "smoke": "3", "co2": "300.0"}
//! ```
//!
//! A [`Reading`] only exists if every field decoded; a partial record is
//! a [`DecodeError`], never a reading with defaulted zeros.

mod validate;

pub use validate::{validate, Field, Judgment, Thresholds, ValidationResult, Verdict};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Frame is not a JSON record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing field {0}")]
    MissingField(&'static str),
    #[error("Invalid value {value:?} for field {field}")]
    InvalidField { field: &'static str, value: String },
    #[error("Empty sensor id")]
    EmptySensorId,
}

/// A validated snapshot of one sensor's telemetry. The timestamp is
/// assigned by the receiving side at decode time, never by the sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    sensor_id: String,
    temperature: f64,
    battery_percentage: i32,
    smoke_level: i32,
    co2_level: f64,
    observed_at: DateTime<Local>,
}

impl Reading {
    pub fn new(
        sensor_id: impl Into<String>,
        temperature: f64,
        battery_percentage: i32,
        smoke_level: i32,
        co2_level: f64,
        observed_at: DateTime<Local>,
    ) -> Result<Self, DecodeError> {
        let sensor_id = sensor_id.into().trim().to_string();
        if sensor_id.is_empty() {
            return Err(DecodeError::EmptySensorId);
        }
        if !temperature.is_finite() {
            return Err(DecodeError::InvalidField {
                field: "temperature",
                value: temperature.to_string(),
            });
        }
        if !co2_level.is_finite() {
            return Err(DecodeError::InvalidField {
                field: "co2",
                value: co2_level.to_string(),
            });
        }

        Ok(Self {
            sensor_id,
            temperature,
            battery_percentage,
            smoke_level,
            co2_level,
            observed_at,
        })
    }

    /// Decode one frame into a [`Reading`] stamped with `observed_at`
    pub fn decode(frame: &[u8], observed_at: DateTime<Local>) -> Result<Self, DecodeError> {
        let record: WireRecord = serde_json::from_slice(frame)?;

        let sensor_id = match record.sensor_id {
            Some(Scalar::Text(id)) => id,
            Some(Scalar::Number(n)) => n.to_string(),
            None => return Err(DecodeError::MissingField("sensorId")),
        };

        Self::new(
            sensor_id,
            required(record.temperature, "temperature")?.to_f64("temperature")?,
            required(record.battery, "battery")?.to_i32("battery")?,
            required(record.smoke, "smoke")?.to_i32("smoke")?,
            required(record.co2, "co2")?.to_f64("co2")?,
            observed_at,
        )
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn battery_percentage(&self) -> i32 {
        self.battery_percentage
    }

    pub fn smoke_level(&self) -> i32 {
        self.smoke_level
    }

    pub fn co2_level(&self) -> f64 {
        self.co2_level
    }

    pub fn observed_at(&self) -> DateTime<Local> {
        self.observed_at
    }
}

#[derive(Deserialize)]
struct WireRecord {
    #[serde(rename = "sensorId")]
    sensor_id: Option<Scalar>,
    temperature: Option<Scalar>,
    #[serde(alias = "batteryPercentage")]
    battery: Option<Scalar>,
    #[serde(alias = "smokeLevel")]
    smoke: Option<Scalar>,
    #[serde(alias = "co2Level")]
    co2: Option<Scalar>,
}

/// Sensors send values as strings, newer firmware as JSON numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

fn required(value: Option<Scalar>, field: &'static str) -> Result<Scalar, DecodeError> {
    value.ok_or(DecodeError::MissingField(field))
}

impl Scalar {
    fn invalid(&self, field: &'static str) -> DecodeError {
        let value = match self {
            Scalar::Text(s) => s.clone(),
            Scalar::Number(n) => n.to_string(),
        };
        DecodeError::InvalidField { field, value }
    }

    fn to_f64(&self, field: &'static str) -> Result<f64, DecodeError> {
        let value = match self {
            Scalar::Text(s) => s.trim().parse::<f64>().ok(),
            Scalar::Number(n) => n.as_f64(),
        };
        value
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.invalid(field))
    }

    fn to_i32(&self, field: &'static str) -> Result<i32, DecodeError> {
        let value = match self {
            Scalar::Text(s) => s.trim().parse::<i32>().ok(),
            Scalar::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        };
        value.ok_or_else(|| self.invalid(field))
    }
}
