//! Runtime configuration
//!
//! Every section has defaults, so a partial JSON document (or none at all) is
//! a valid configuration.

use crate::error::MonitorError;
use crate::types::{AlertSeverity, RiskLevel};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a [`crate::Monitor`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub features: FeatureConfig,
    pub scoring: ScoringConfig,
    pub events: EventConfig,
    pub fanout: FanoutConfig,
    pub feed: FeedConfig,
    pub proximity: ProximityConfig,
    pub records: RecordsConfig,
    pub server: ServerConfig,
}

impl MonitorConfig {
    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, MonitorError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json_pretty(&self) -> Result<String, MonitorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations the pipeline cannot honor
    pub fn validate(&self) -> Result<(), MonitorError> {
        let t = &self.scoring.thresholds;
        if !(0.0 < t.medium && t.medium < t.high && t.high < t.critical && t.critical <= 1.0) {
            return Err(MonitorError::ConfigError(format!(
                "risk thresholds must be ascending within (0, 1]: medium={}, high={}, critical={}",
                t.medium, t.high, t.critical
            )));
        }

        for (name, weight) in self.scoring.weights.entries() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(MonitorError::ConfigError(format!(
                    "weight {} must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }

        if self.features.min_samples < 2 {
            return Err(MonitorError::ConfigError(
                "features.min_samples must be at least 2".to_string(),
            ));
        }

        match self.features.window {
            WindowPolicy::LastSamples { count } if count == 0 => {
                return Err(MonitorError::ConfigError(
                    "window sample count must be positive".to_string(),
                ));
            }
            WindowPolicy::Duration { minutes } if minutes <= 0 => {
                return Err(MonitorError::ConfigError(
                    "window duration must be positive".to_string(),
                ));
            }
            _ => {}
        }

        if self.fanout.buffer_capacity == 0 {
            return Err(MonitorError::ConfigError(
                "fanout.buffer_capacity must be positive".to_string(),
            ));
        }

        if self.fanout.heartbeat_interval_secs == 0 || self.feed.poll_interval_ms == 0 {
            return Err(MonitorError::ConfigError(
                "heartbeat and poll intervals must be positive".to_string(),
            ));
        }

        if !(self.proximity.default_radius_m.is_finite() && self.proximity.default_radius_m > 0.0) {
            return Err(MonitorError::ConfigError(
                "proximity.default_radius_m must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// How much heart-rate history the feature extractor considers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Keep the most recent `count` samples
    LastSamples { count: usize },
    /// Keep samples from the last `minutes` minutes
    Duration { minutes: i64 },
}

impl Default for WindowPolicy {
    fn default() -> Self {
        WindowPolicy::LastSamples { count: 60 }
    }
}

/// Feature extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub window: WindowPolicy,
    /// Samples required before the anomaly z-score is trusted
    pub min_samples: usize,
    /// z-score that maps to an anomaly score of 1.0
    pub anomaly_sigma_cap: f64,
    pub default_resting_hr_bpm: f64,
    pub default_max_hr_bpm: f64,
    /// Time constant for stress build-up (minutes)
    pub stress_time_constant_min: f64,
    /// Time constant for fatigue build-up (minutes)
    pub fatigue_time_constant_min: f64,
    /// Slope (bpm/min) beyond which the trend is increasing or decreasing
    pub trend_threshold_bpm_per_min: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window: WindowPolicy::default(),
            min_samples: 3,
            anomaly_sigma_cap: 3.0,
            default_resting_hr_bpm: 60.0,
            default_max_hr_bpm: 190.0,
            stress_time_constant_min: 60.0,
            fatigue_time_constant_min: 120.0,
            trend_threshold_bpm_per_min: 2.0,
        }
    }
}

/// Per-signal weights of the risk score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub heart_rate: f64,
    pub heart_rate_anomaly: f64,
    pub heart_rate_variability: f64,
    pub physiological_strain: f64,
    pub motion: f64,
    pub activity: f64,
    pub location: f64,
    pub fall_detection: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            heart_rate: 0.70,
            heart_rate_anomaly: 0.25,
            heart_rate_variability: 0.20,
            physiological_strain: 0.10,
            motion: 0.30,
            activity: 0.10,
            location: 0.10,
            fall_detection: 0.40,
        }
    }
}

impl RiskWeights {
    fn entries(&self) -> [(&'static str, f64); 8] {
        [
            ("heart_rate", self.heart_rate),
            ("heart_rate_anomaly", self.heart_rate_anomaly),
            ("heart_rate_variability", self.heart_rate_variability),
            ("physiological_strain", self.physiological_strain),
            ("motion", self.motion),
            ("activity", self.activity),
            ("location", self.location),
            ("fall_detection", self.fall_detection),
        ]
    }
}

/// Lower bounds of the medium, high and critical bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 0.3,
            high: 0.6,
            critical: 0.85,
        }
    }
}

impl RiskThresholds {
    /// Map a score onto a level
    pub fn level_for(&self, score: f64) -> RiskLevel {
        if score >= self.critical {
            RiskLevel::Critical
        } else if score >= self.high {
            RiskLevel::High
        } else if score >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Risk scoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: RiskWeights,
    pub thresholds: RiskThresholds,
    /// Minimum level when a fall is detected
    pub fall_floor: RiskLevel,
    /// Normalized signal value above which a signal-specific recommendation is added
    pub secondary_alert_threshold: f64,
    /// Location accuracy (meters) beyond which a fix counts as unreliable
    pub location_accuracy_threshold_m: f64,
    /// Client/server score gap that is logged as a divergence
    pub divergence_warn_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            thresholds: RiskThresholds::default(),
            fall_floor: RiskLevel::High,
            secondary_alert_threshold: 0.5,
            location_accuracy_threshold_m: 100.0,
            divergence_warn_threshold: 0.3,
        }
    }
}

/// Risk event emission settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Lowest assessed level that produces a risk event
    pub min_level: RiskLevel,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            min_level: RiskLevel::Medium,
        }
    }
}

/// Event fan-out settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Messages buffered per subscriber before it is dropped
    pub buffer_capacity: usize,
    pub heartbeat_interval_secs: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

impl FanoutConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Transport used by feed consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    #[default]
    Push,
    Pull,
}

/// Feed consumer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub mode: FeedMode,
    /// Snapshot polling interval for the pull backend
    pub poll_interval_ms: u64,
    /// First resubscribe delay for the push backend
    pub retry_interval_ms: u64,
    /// Upper bound of the resubscribe backoff
    pub max_backoff_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            mode: FeedMode::Push,
            poll_interval_ms: 3_000,
            retry_interval_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl FeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.retry_interval_ms))
    }
}

/// Defaults for "officer down" proximity alerts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    pub default_radius_m: f64,
    pub default_title: String,
    pub default_message: String,
    pub severity: AlertSeverity,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            default_radius_m: 300.0,
            default_title: "Officer Down".to_string(),
            default_message: "Assist needed nearby".to_string(),
            severity: AlertSeverity::High,
        }
    }
}

/// Record log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    /// Records retained by the in-memory log
    pub max_records: usize,
    pub recent_alerts_limit: usize,
    pub risk_history_hours: i64,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            max_records: 10_000,
            recent_alerts_limit: 50,
            risk_history_hours: 24,
        }
    }
}

/// HTTP / WebSocket server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Upper bound for one ingestion call
    pub ingest_timeout_ms: u64,
    /// Upper bound for one outbound push to a WebSocket client
    pub delivery_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            ingest_timeout_ms: 2_000,
            delivery_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_timeout_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MonitorConfig::from_json(r#"{"scoring": {"fall_floor": "critical"}}"#).unwrap();
        assert_eq!(config.scoring.fall_floor, RiskLevel::Critical);
        assert_eq!(config.scoring.thresholds, RiskThresholds::default());
        assert_eq!(config.fanout.buffer_capacity, 256);
    }

    #[test]
    fn test_window_policy_json() {
        let config = MonitorConfig::from_json(
            r#"{"features": {"window": {"policy": "duration", "minutes": 10}}}"#,
        )
        .unwrap();
        assert_eq!(config.features.window, WindowPolicy::Duration { minutes: 10 });
    }

    #[test]
    fn test_rejects_unordered_thresholds() {
        let result = MonitorConfig::from_json(
            r#"{"scoring": {"thresholds": {"medium": 0.7, "high": 0.6, "critical": 0.9}}}"#,
        );
        assert!(matches!(result, Err(MonitorError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_negative_weight() {
        let mut config = MonitorConfig::default();
        config.scoring.weights.motion = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_level_for_boundaries() {
        let t = RiskThresholds::default();
        assert_eq!(t.level_for(0.0), RiskLevel::Low);
        assert_eq!(t.level_for(0.29), RiskLevel::Low);
        assert_eq!(t.level_for(0.3), RiskLevel::Medium);
        assert_eq!(t.level_for(0.6), RiskLevel::High);
        assert_eq!(t.level_for(0.85), RiskLevel::Critical);
        assert_eq!(t.level_for(1.0), RiskLevel::Critical);
    }

    #[test]
    fn test_roundtrip_pretty_json() {
        let config = MonitorConfig::default();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(MonitorConfig::from_json(&json).unwrap(), config);
    }
}
