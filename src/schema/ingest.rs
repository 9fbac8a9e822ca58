//! Ingestion request schema
//!
//! The payload a wearable or phone client submits for one officer at one
//! instant. Every section except the header is optional: a request may carry
//! only sensor data, only a location, or both.

use crate::types::{ActivityType, RiskLevel, Vector3};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest heart rate accepted as physiologically plausible (bpm)
pub const HEART_RATE_MIN_BPM: f64 = 25.0;
/// Highest heart rate accepted as physiologically plausible (bpm)
pub const HEART_RATE_MAX_BPM: f64 = 250.0;

/// One telemetry submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub officer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_data: Option<SensorPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_data: Option<LocationPayload>,
    /// Score computed on the client, compared against the server's score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    /// Battery level (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_status: Option<String>,
}

/// Sensor readings taken at the request timestamp
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate_confidence: Option<f64>,
    /// RMSSD (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate_variability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<Vector3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gyroscope: Option<Vector3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<ActivityType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_confidence: Option<f64>,
    pub fall_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fall_confidence: Option<f64>,
    pub workout_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workout_duration_secs: Option<f64>,
    /// Officer pressed the emergency button
    pub sos: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl SensorPayload {
    /// Whether any motion-stream field is present
    pub fn has_motion(&self) -> bool {
        self.acceleration.is_some()
            || self.gyroscope.is_some()
            || self.activity_type.is_some()
            || self.fall_detected
    }
}

/// Location fix taken at the request timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,
}

impl IngestRequest {
    /// Create a request with only the header set
    pub fn new(officer_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            officer_id: officer_id.into(),
            device_id: None,
            timestamp,
            sensor_data: None,
            location_data: None,
            risk_score: None,
            risk_level: None,
            battery_level: None,
            network_status: None,
        }
    }

    pub fn with_sensor_data(mut self, sensor: SensorPayload) -> Self {
        self.sensor_data = Some(sensor);
        self
    }

    pub fn with_location(mut self, location: LocationPayload) -> Self {
        self.location_data = Some(location);
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Validate the request against the ingestion bounds
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.officer_id.trim().is_empty() {
            return Err(ValidationError::MissingField("officer_id".to_string()));
        }

        if let Some(sensor) = &self.sensor_data {
            if let Some(hr) = sensor.heart_rate {
                check_range("heart_rate", hr, HEART_RATE_MIN_BPM, HEART_RATE_MAX_BPM)?;
            }
            check_unit_opt("heart_rate_confidence", sensor.heart_rate_confidence)?;
            if let Some(hrv) = sensor.heart_rate_variability {
                check_non_negative("heart_rate_variability", hrv)?;
            }
            if let Some(acc) = &sensor.acceleration {
                check_vector("acceleration", acc)?;
            }
            if let Some(gyro) = &sensor.gyroscope {
                check_vector("gyroscope", gyro)?;
            }
            check_unit_opt("activity_confidence", sensor.activity_confidence)?;
            check_unit_opt("fall_confidence", sensor.fall_confidence)?;
            if let Some(duration) = sensor.workout_duration_secs {
                check_non_negative("workout_duration_secs", duration)?;
            }
        }

        if let Some(location) = &self.location_data {
            check_range("latitude", location.latitude, -90.0, 90.0)?;
            check_range("longitude", location.longitude, -180.0, 180.0)?;
            for (field, value) in [
                ("accuracy", location.accuracy),
                ("horizontal_accuracy", location.horizontal_accuracy),
                ("vertical_accuracy", location.vertical_accuracy),
                ("speed", location.speed),
            ] {
                if let Some(v) = value {
                    check_non_negative(field, v)?;
                }
            }
            if let Some(altitude) = location.altitude {
                check_finite("altitude", altitude)?;
            }
            if let Some(course) = location.course {
                check_finite("course", course)?;
            }
        }

        check_unit_opt("risk_score", self.risk_score)?;
        check_unit_opt("battery_level", self.battery_level)?;

        Ok(())
    }
}

/// Ingestion validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("{field} out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{0} must be a finite number")]
    NonFinite(String),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ValidationError {
    /// Name of the offending field
    pub fn field(&self) -> &str {
        match self {
            ValidationError::MissingField(field) | ValidationError::NonFinite(field) => field,
            ValidationError::OutOfRange { field, .. } | ValidationError::Invalid { field, .. } => field,
        }
    }
}

pub(crate) fn check_finite(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite(field.to_string()))
    }
}

pub(crate) fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    check_finite(field, value)?;
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_non_negative(field: &str, value: f64) -> Result<(), ValidationError> {
    check_range(field, value, 0.0, f64::MAX)
}

fn check_unit_opt(field: &str, value: Option<f64>) -> Result<(), ValidationError> {
    match value {
        Some(v) => check_range(field, v, 0.0, 1.0),
        None => Ok(()),
    }
}

fn check_vector(field: &str, v: &Vector3) -> Result<(), ValidationError> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite(field.to_string()))
    }
}
