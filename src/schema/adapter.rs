//! Adapter for converting ingestion requests into telemetry samples
//!
//! This module parses request batches (NDJSON or JSON arrays) and splits a
//! validated request into the per-stream samples the live state store keeps.

use crate::error::MonitorError;
use crate::schema::ingest::*;
use crate::types::{EventMetadata, HeartRateSample, LocationFix, MotionSample, Vector3};

/// Accuracy assumed when a client reports a fix without one (meters)
pub const UNKNOWN_LOCATION_ACCURACY_M: f64 = 100.0;
/// Heart-rate confidence assumed when the client does not report one
pub const DEFAULT_HEART_RATE_CONFIDENCE: f64 = 1.0;

/// Samples extracted from one request, one per stream at most
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySamples {
    pub heart_rate: Option<HeartRateSample>,
    pub motion: Option<MotionSample>,
    pub location: Option<LocationFix>,
}

impl TelemetrySamples {
    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none() && self.motion.is_none() && self.location.is_none()
    }
}

/// Adapter for ingestion requests
pub struct IngestAdapter;

impl IngestAdapter {
    /// Parse a JSON string containing an array of requests
    pub fn parse_array(json: &str) -> Result<Vec<IngestRequest>, MonitorError> {
        let requests: Vec<IngestRequest> = serde_json::from_str(json)?;
        Ok(requests)
    }

    /// Parse NDJSON (newline-delimited JSON) containing requests
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<IngestRequest>, MonitorError> {
        let mut requests = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<IngestRequest>(trimmed) {
                Ok(request) => requests.push(request),
                Err(e) => {
                    return Err(MonitorError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(requests)
    }

    /// Split a request into per-stream samples.
    ///
    /// The request must already be validated.
    pub fn to_samples(request: &IngestRequest) -> TelemetrySamples {
        let mut samples = TelemetrySamples::default();

        if let Some(sensor) = &request.sensor_data {
            let source = sensor
                .source
                .clone()
                .or_else(|| request.device_id.clone())
                .unwrap_or_else(|| "unknown".to_string());

            if let Some(hr) = sensor.heart_rate {
                samples.heart_rate = Some(HeartRateSample {
                    officer_id: request.officer_id.clone(),
                    value: hr,
                    timestamp: request.timestamp,
                    confidence: sensor
                        .heart_rate_confidence
                        .unwrap_or(DEFAULT_HEART_RATE_CONFIDENCE),
                    source,
                    hrv_rmssd_ms: sensor.heart_rate_variability,
                });
            }

            if sensor.has_motion() {
                samples.motion = Some(MotionSample {
                    officer_id: request.officer_id.clone(),
                    acceleration: sensor.acceleration.unwrap_or_else(resting_acceleration),
                    angular_rate: sensor.gyroscope.unwrap_or_default(),
                    fall_detected: sensor.fall_detected,
                    fall_confidence: sensor
                        .fall_confidence
                        .unwrap_or(if sensor.fall_detected { 1.0 } else { 0.0 }),
                    activity: sensor.activity_type,
                    activity_confidence: sensor.activity_confidence,
                    timestamp: request.timestamp,
                });
            }
        }

        if let Some(location) = &request.location_data {
            samples.location = Some(LocationFix {
                officer_id: request.officer_id.clone(),
                latitude: location.latitude,
                longitude: location.longitude,
                altitude: location.altitude,
                accuracy: location
                    .accuracy
                    .or(location.horizontal_accuracy)
                    .unwrap_or(UNKNOWN_LOCATION_ACCURACY_M),
                speed: location.speed,
                heading: location.course,
                timestamp: request.timestamp,
            });
        }

        samples
    }

    /// Device context carried into any risk event the request raises
    pub fn event_metadata(request: &IngestRequest) -> EventMetadata {
        let sensor = request.sensor_data.as_ref();
        EventMetadata {
            workout_active: sensor.map(|s| s.workout_active),
            workout_duration_secs: sensor.and_then(|s| s.workout_duration_secs),
            battery_level: request.battery_level,
            network_status: request.network_status.clone(),
        }
    }

    /// Validate a batch of requests
    pub fn validate_requests(requests: &[IngestRequest]) -> Vec<ValidationResult> {
        requests
            .iter()
            .enumerate()
            .map(|(idx, request)| ValidationResult {
                index: idx,
                officer_id: request.officer_id.clone(),
                result: request.validate().err(),
            })
            .filter(|r| r.result.is_some())
            .collect()
    }
}

/// Device at rest: gravity on the z axis
fn resting_acceleration() -> Vector3 {
    Vector3::new(0.0, 0.0, 1.0)
}

/// Result of request validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub officer_id: String,
    pub result: Option<ValidationError>,
}
