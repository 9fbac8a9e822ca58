//! Core types for the Fieldwatch pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: telemetry samples, derived risk features, risk assessments, the
//! live per-officer state record, and the events and alerts sent to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Three-axis reading (acceleration in g, angular rate in rad/s)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean magnitude
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Activity classification reported by the wearable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Stationary,
    Walking,
    Running,
    Cycling,
    Driving,
    #[serde(other)]
    Unknown,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Stationary => "stationary",
            ActivityType::Walking => "walking",
            ActivityType::Running => "running",
            ActivityType::Cycling => "cycling",
            ActivityType::Driving => "driving",
            ActivityType::Unknown => "unknown",
        }
    }
}

/// A single heart-rate reading. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub officer_id: String,
    /// Heart rate (bpm)
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// Sensor confidence (0-1)
    pub confidence: f64,
    /// Source tag (e.g. "apple_watch")
    pub source: String,
    /// HRV (RMSSD, ms) reported with the same reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv_rmssd_ms: Option<f64>,
}

/// A single motion reading, including the device's fall detector output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub officer_id: String,
    /// Acceleration (g)
    pub acceleration: Vector3,
    /// Angular rate (rad/s)
    pub angular_rate: Vector3,
    pub fall_detected: bool,
    /// Fall detector confidence (0-1)
    pub fall_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// A single location fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub officer_id: String,
    /// Latitude in degrees, [-90, 90]
    pub latitude: f64,
    /// Longitude in degrees, [-180, 180]
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Horizontal accuracy (meters)
    pub accuracy: f64,
    /// Speed (m/s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Heading (degrees from true north)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Geographic point attached to events and alerts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&LocationFix> for GeoPoint {
    fn from(fix: &LocationFix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
        }
    }
}

/// Physiological profile used to interpret heart rate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfficerProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resting_hr_bpm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hr_bpm: Option<f64>,
}

impl OfficerProfile {
    /// True when neither max HR nor age is known
    pub fn is_empty(&self) -> bool {
        self.age.is_none() && self.resting_hr_bpm.is_none() && self.max_hr_bpm.is_none()
    }
}

/// Identity fields owned by the external officer directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfficerIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

/// Heart-rate intensity band relative to the profile max HR
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityZone {
    Resting,
    Light,
    Moderate,
    Vigorous,
    Maximal,
}

impl IntensityZone {
    /// Classify a percentage of max heart rate
    pub fn from_percentage(pct: f64) -> Self {
        if pct < 57.0 {
            IntensityZone::Resting
        } else if pct < 64.0 {
            IntensityZone::Light
        } else if pct < 77.0 {
            IntensityZone::Moderate
        } else if pct < 95.0 {
            IntensityZone::Vigorous
        } else {
            IntensityZone::Maximal
        }
    }
}

/// Direction of heart rate over the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartRateTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// Features derived from an officer's recent heart-rate history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFeatures {
    pub officer_id: String,
    /// Samples in the window
    pub sample_count: usize,
    /// Most recent heart rate (bpm), 0 when no samples
    pub current_bpm: f64,
    pub mean_bpm: f64,
    pub std_bpm: f64,
    /// Raw z-score of the current value against prior samples
    pub anomaly_z: f64,
    /// Anomaly normalized to 0-1
    pub anomaly_score: f64,
    pub intensity_zone: IntensityZone,
    /// Current value as a percentage of profile max HR
    pub intensity_pct: f64,
    /// Share of the heart-rate reserve (resting to max) in use, as a percentage
    pub hr_reserve_pct: f64,
    /// Stress indicator (0-1)
    pub stress_indicator: f64,
    /// Fatigue indicator (0-1)
    pub fatigue_indicator: f64,
    /// Minutes since the first sample of the session
    pub elapsed_minutes: f64,
    /// Slope over the window (bpm per minute)
    pub trend_bpm_per_min: f64,
    pub trend: HeartRateTrend,
    /// Latest reported HRV (RMSSD, ms)
    pub hrv_rmssd_ms: Option<f64>,
    /// Whether the window held enough samples for anomaly detection
    pub history_sufficient: bool,
    /// Whether profile defaults were used
    pub profile_defaulted: bool,
    /// Confidence in the features (0-1)
    pub confidence: f64,
    /// Timestamp of the most recent sample
    pub timestamp: Option<DateTime<Utc>>,
}

impl RiskFeatures {
    /// Features for an officer with no heart-rate history
    pub fn empty(officer_id: impl Into<String>) -> Self {
        Self {
            officer_id: officer_id.into(),
            sample_count: 0,
            current_bpm: 0.0,
            mean_bpm: 0.0,
            std_bpm: 0.0,
            anomaly_z: 0.0,
            anomaly_score: 0.0,
            intensity_zone: IntensityZone::Resting,
            intensity_pct: 0.0,
            hr_reserve_pct: 0.0,
            stress_indicator: 0.0,
            fatigue_indicator: 0.0,
            elapsed_minutes: 0.0,
            trend_bpm_per_min: 0.0,
            trend: HeartRateTrend::Stable,
            hrv_rmssd_ms: None,
            history_sufficient: false,
            profile_defaulted: true,
            confidence: 0.5,
            timestamp: None,
        }
    }

    pub fn has_heart_rate(&self) -> bool {
        self.sample_count > 0
    }
}

/// Categorical risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality flag indicating missing or degraded inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    MissingHeartRate,
    InsufficientHistory,
    DefaultProfile,
    MissingMotion,
    MissingLocation,
    LowLocationAccuracy,
    LowActivityConfidence,
    LowSensorConfidence,
}

/// Calibrated risk assessment for one officer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Risk score (0-1)
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// Confidence (0-1)
    pub confidence: f64,
    /// Factor name -> weighted contribution
    pub factors: BTreeMap<String, f64>,
    /// Ordered recommendations
    pub recommendations: Vec<String>,
    /// Whether a detected fall raised the level
    pub fall_override: bool,
    pub quality_flags: Vec<QualityFlag>,
    pub timestamp: DateTime<Utc>,
}

/// Authoritative live record for one officer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficerState {
    pub officer_id: String,
    #[serde(default)]
    pub identity: OfficerIdentity,
    #[serde(default)]
    pub profile: OfficerProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub heart_rate: Option<HeartRateSample>,
    pub motion: Option<MotionSample>,
    pub location: Option<LocationFix>,
    pub assessment: Option<RiskAssessment>,
    pub last_seen: Option<DateTime<Utc>>,
    pub on_duty: bool,
    /// Incremented on every applied update
    pub revision: u64,
}

impl OfficerState {
    /// Fresh record for a first-seen officer
    pub fn new(officer_id: impl Into<String>) -> Self {
        Self {
            officer_id: officer_id.into(),
            identity: OfficerIdentity::default(),
            profile: OfficerProfile::default(),
            device_id: None,
            heart_rate: None,
            motion: None,
            location: None,
            assessment: None,
            last_seen: None,
            on_duty: true,
            revision: 0,
        }
    }

    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.assessment.as_ref().map(|a| a.risk_level)
    }

    pub fn fall_detected(&self) -> bool {
        self.motion.as_ref().map(|m| m.fall_detected).unwrap_or(false)
    }
}

/// Kind of risk event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskEventType {
    HighRisk,
    FallDetected,
    Sos,
    HeartRateAnomaly,
    MotionAnomaly,
    LocationAnomaly,
}

/// A notable risk occurrence for one officer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub id: Uuid,
    pub officer_id: String,
    pub event_type: RiskEventType,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub description: String,
    pub location: Option<GeoPoint>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_acknowledged: bool,
    pub is_resolved: bool,
    #[serde(default, skip_serializing_if = "EventMetadata::is_empty")]
    pub metadata: EventMetadata,
}

/// Device context reported with the request that raised an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workout_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workout_duration_secs: Option<f64>,
    /// Battery level (0-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_status: Option<String>,
}

impl EventMetadata {
    pub fn is_empty(&self) -> bool {
        self.workout_active.is_none()
            && self.workout_duration_secs.is_none()
            && self.battery_level.is_none()
            && self.network_status.is_none()
    }
}

/// Origin of a system alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Proximity,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Alert delivered to one officer or to all observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemAlert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    /// Recipient officer, if targeted
    pub officer_id: Option<String>,
    /// Officer whose situation raised the alert
    pub source_officer_id: Option<String>,
    pub risk_event_id: Option<Uuid>,
    pub is_active: bool,
    pub is_acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

impl SystemAlert {
    /// Create a new active alert
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            title: title.into(),
            message: message.into(),
            officer_id: None,
            source_officer_id: None,
            risk_event_id: None,
            is_active: true,
            is_acknowledged: false,
            created_at: Utc::now(),
        }
    }

    pub fn for_officer(mut self, officer_id: impl Into<String>) -> Self {
        self.officer_id = Some(officer_id.into());
        self
    }

    pub fn from_source(mut self, source_officer_id: impl Into<String>) -> Self {
        self.source_officer_id = Some(source_officer_id.into());
        self
    }

    pub fn with_risk_event(mut self, risk_event_id: Uuid) -> Self {
        self.risk_event_id = Some(risk_event_id);
        self
    }
}
