//! Feature extraction
//!
//! This module turns an officer's heart-rate window into risk features:
//! - Rolling mean, standard deviation and trend
//! - Anomaly z-score of the latest reading against prior readings
//! - Intensity zone relative to the officer's max heart rate
//! - Share of the heart-rate reserve between resting and max heart rate in use
//! - Stress and fatigue indicators that build with anomaly and session length
//!
//! Extraction is pure: the same window and profile always produce the same
//! features, and there are no error conditions. Missing history or profile
//! data only lowers the reported confidence.

use crate::config::FeatureConfig;
use crate::types::{HeartRateSample, HeartRateTrend, IntensityZone, OfficerProfile, RiskFeatures};
use crate::window::HeartRateWindow;

/// Confidence multiplier when the window is too short for anomaly detection
const INSUFFICIENT_HISTORY_FACTOR: f64 = 0.5;
/// Confidence multiplier when the profile had to be defaulted
const DEFAULT_PROFILE_FACTOR: f64 = 0.9;

/// Feature extractor for per-officer heart-rate windows
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Extract risk features from an officer's window
    pub fn extract(
        &self,
        officer_id: &str,
        window: &HeartRateWindow,
        profile: Option<&OfficerProfile>,
    ) -> RiskFeatures {
        let samples: Vec<&HeartRateSample> = window.iter().collect();
        let latest = match samples.last() {
            Some(latest) => *latest,
            None => return RiskFeatures::empty(officer_id),
        };

        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let current = latest.value;
        let (mean_bpm, std_bpm) = mean_and_std(&values);

        // Anomaly compares the latest reading against everything before it.
        // The standard deviation needs at least two prior readings.
        let prior = &values[..values.len() - 1];
        let history_sufficient = values.len() >= self.config.min_samples && prior.len() >= 2;
        let anomaly_z = if history_sufficient {
            let (prior_mean, prior_std) = mean_and_std(prior);
            if prior_std > f64::EPSILON {
                (current - prior_mean).abs() / prior_std
            } else {
                0.0
            }
        } else {
            0.0
        };
        let anomaly_score = (anomaly_z / self.config.anomaly_sigma_cap).clamp(0.0, 1.0);

        let (max_hr, max_defaulted) = self.resolve_max_hr(profile);
        let (resting_hr, resting_defaulted) = self.resolve_resting_hr(profile);
        let profile_defaulted = max_defaulted && resting_defaulted;
        let intensity_pct = if max_hr > 0.0 {
            current / max_hr * 100.0
        } else {
            0.0
        };
        let intensity_zone = IntensityZone::from_percentage(intensity_pct);
        let hr_reserve_pct = if max_hr > resting_hr {
            ((current - resting_hr) / (max_hr - resting_hr) * 100.0).max(0.0)
        } else {
            0.0
        };

        let elapsed_minutes = window
            .session_started_at()
            .map(|start| (latest.timestamp - start).num_milliseconds() as f64 / 60_000.0)
            .unwrap_or(0.0)
            .max(0.0);

        let stress_indicator = compute_stress(
            anomaly_score,
            elapsed_minutes,
            self.config.stress_time_constant_min,
        );
        let fatigue_indicator = compute_fatigue(
            anomaly_score,
            elapsed_minutes,
            self.config.fatigue_time_constant_min,
        );

        let trend_bpm_per_min = compute_slope(&samples);
        let trend = if trend_bpm_per_min > self.config.trend_threshold_bpm_per_min {
            HeartRateTrend::Increasing
        } else if trend_bpm_per_min < -self.config.trend_threshold_bpm_per_min {
            HeartRateTrend::Decreasing
        } else {
            HeartRateTrend::Stable
        };

        let hrv_rmssd_ms = samples.iter().rev().find_map(|s| s.hrv_rmssd_ms);

        let sensor_confidence =
            samples.iter().map(|s| s.confidence).sum::<f64>() / samples.len() as f64;
        let mut confidence = sensor_confidence.clamp(0.0, 1.0);
        if !history_sufficient {
            confidence *= INSUFFICIENT_HISTORY_FACTOR;
        }
        if profile_defaulted {
            confidence *= DEFAULT_PROFILE_FACTOR;
        }

        RiskFeatures {
            officer_id: officer_id.to_string(),
            sample_count: samples.len(),
            current_bpm: current,
            mean_bpm,
            std_bpm,
            anomaly_z,
            anomaly_score,
            intensity_zone,
            intensity_pct,
            hr_reserve_pct,
            stress_indicator,
            fatigue_indicator,
            elapsed_minutes,
            trend_bpm_per_min,
            trend,
            hrv_rmssd_ms,
            history_sufficient,
            profile_defaulted,
            confidence,
            timestamp: Some(latest.timestamp),
        }
    }

    /// Max heart rate from the profile, falling back to age and then to defaults
    fn resolve_max_hr(&self, profile: Option<&OfficerProfile>) -> (f64, bool) {
        match profile {
            Some(OfficerProfile {
                max_hr_bpm: Some(max),
                ..
            }) if *max > 0.0 => (*max, false),
            Some(OfficerProfile { age: Some(age), .. }) => ((220.0 - *age as f64).max(100.0), false),
            _ => (self.config.default_max_hr_bpm, true),
        }
    }

    fn resolve_resting_hr(&self, profile: Option<&OfficerProfile>) -> (f64, bool) {
        match profile.and_then(|p| p.resting_hr_bpm) {
            Some(resting) if resting > 0.0 => (resting, false),
            _ => (self.config.default_resting_hr_bpm, true),
        }
    }
}

/// Population mean and standard deviation
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Least-squares slope of heart rate over time (bpm per minute)
fn compute_slope(samples: &[&HeartRateSample]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let origin = samples[0].timestamp;
    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|s| {
            let t = (s.timestamp - origin).num_milliseconds() as f64 / 60_000.0;
            (t, s.value)
        })
        .collect();

    let n = points.len() as f64;
    let mean_t = points.iter().map(|(t, _)| t).sum::<f64>() / n;
    let mean_v = points.iter().map(|(_, v)| v).sum::<f64>() / n;
    let covariance: f64 = points.iter().map(|(t, v)| (t - mean_t) * (v - mean_v)).sum();
    let variance: f64 = points.iter().map(|(t, _)| (t - mean_t).powi(2)).sum();

    if variance > f64::EPSILON {
        covariance / variance
    } else {
        0.0
    }
}

/// Saturating build-up over a session, 0 at start and approaching 1
fn duration_load(elapsed_minutes: f64, time_constant_min: f64) -> f64 {
    if time_constant_min <= 0.0 {
        return 1.0;
    }
    1.0 - (-elapsed_minutes.max(0.0) / time_constant_min).exp()
}

/// Stress is dominated by anomaly, with a smaller duration term
fn compute_stress(anomaly: f64, elapsed_minutes: f64, time_constant_min: f64) -> f64 {
    let load = duration_load(elapsed_minutes, time_constant_min);
    (1.0 - (1.0 - 0.8 * anomaly) * (1.0 - 0.2 * load)).clamp(0.0, 1.0)
}

/// Fatigue is dominated by duration, with a smaller anomaly term
fn compute_fatigue(anomaly: f64, elapsed_minutes: f64, time_constant_min: f64) -> f64 {
    let load = duration_load(elapsed_minutes, time_constant_min);
    (1.0 - (1.0 - 0.3 * anomaly) * (1.0 - 0.7 * load)).clamp(0.0, 1.0)
}
