//! Risk scoring
//!
//! Combines normalized factor signals into one calibrated assessment:
//! a weighted sum clamped to 0-1, mapped onto a level by ascending thresholds,
//! with a detected fall forcing the level up to a configurable floor.

use crate::config::ScoringConfig;
use crate::normalizer::{NormalizedSignals, Normalizer, RiskFactor};
use crate::schema::{check_finite, check_range, ValidationError, HEART_RATE_MAX_BPM, HEART_RATE_MIN_BPM};
use crate::types::{LocationFix, MotionSample, RiskAssessment, RiskFeatures, RiskLevel};
use chrono::Utc;
use std::collections::BTreeMap;

pub const REC_CRITICAL: &str = "IMMEDIATE ATTENTION REQUIRED - Critical risk detected";
pub const REC_HIGH: &str = "High risk detected - check officer status now";
pub const REC_FALL: &str = "FALL DETECTED - Immediate response required";
pub const REC_HEART_RATE: &str = "Elevated heart rate - check status";
pub const REC_ANOMALY: &str = "Unusual heart rate pattern for this officer - verify wellbeing";
pub const REC_HRV: &str = "Low HRV detected - check stress levels";
pub const REC_STRAIN: &str = "Signs of stress or fatigue - consider rest or relief";
pub const REC_MOTION: &str = "Unusual motion pattern - check officer status";
pub const REC_ACTIVITY: &str = "High activity levels - monitor for fatigue";
pub const REC_LOCATION: &str = "Location unreliable - confirm position by radio";
pub const REC_NORMAL: &str = "All systems normal - continue monitoring";

/// Order in which signal-specific recommendations are listed
const RECOMMENDATION_ORDER: [(RiskFactor, &str); 7] = [
    (RiskFactor::HeartRate, REC_HEART_RATE),
    (RiskFactor::HeartRateAnomaly, REC_ANOMALY),
    (RiskFactor::HeartRateVariability, REC_HRV),
    (RiskFactor::PhysiologicalStrain, REC_STRAIN),
    (RiskFactor::Motion, REC_MOTION),
    (RiskFactor::Activity, REC_ACTIVITY),
    (RiskFactor::Location, REC_LOCATION),
];

/// Weighted multi-factor risk scorer
#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    config: ScoringConfig,
}

impl RiskScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one officer's current inputs
    pub fn score(
        &self,
        features: &RiskFeatures,
        motion: Option<&MotionSample>,
        location: Option<&LocationFix>,
        fall_detected: bool,
    ) -> Result<RiskAssessment, ValidationError> {
        validate_inputs(features, motion, location)?;

        let signals = Normalizer::normalize(
            features,
            motion,
            location,
            fall_detected,
            self.config.location_accuracy_threshold_m,
        );

        let mut factors = BTreeMap::new();
        let mut raw_score = 0.0;
        for signal in &signals.factors {
            let contribution = self.weight(signal.factor) * signal.value;
            raw_score += contribution;
            // Falls are reported at full strength regardless of weight
            let recorded = if signal.factor == RiskFactor::FallDetection {
                1.0
            } else {
                contribution
            };
            factors.insert(signal.factor.as_str().to_string(), recorded);
        }
        let risk_score = raw_score.clamp(0.0, 1.0);

        let mut risk_level = self.config.thresholds.level_for(risk_score);
        if fall_detected {
            risk_level = risk_level.max(self.config.fall_floor);
        }

        let recommendations = self.recommendations(&signals, risk_level, fall_detected);

        let timestamp = [
            features.timestamp,
            motion.map(|m| m.timestamp),
            location.map(|l| l.timestamp),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or_else(Utc::now);

        Ok(RiskAssessment {
            risk_score,
            risk_level,
            confidence: signals.confidence,
            factors,
            recommendations,
            fall_override: fall_detected,
            quality_flags: signals.quality_flags,
            timestamp,
        })
    }

    fn weight(&self, factor: RiskFactor) -> f64 {
        let w = &self.config.weights;
        match factor {
            RiskFactor::HeartRate => w.heart_rate,
            RiskFactor::HeartRateAnomaly => w.heart_rate_anomaly,
            RiskFactor::HeartRateVariability => w.heart_rate_variability,
            RiskFactor::PhysiologicalStrain => w.physiological_strain,
            RiskFactor::Motion => w.motion,
            RiskFactor::Activity => w.activity,
            RiskFactor::Location => w.location,
            RiskFactor::FallDetection => w.fall_detection,
        }
    }

    fn recommendations(
        &self,
        signals: &NormalizedSignals,
        level: RiskLevel,
        fall_detected: bool,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();

        match level {
            RiskLevel::Critical => recommendations.push(REC_CRITICAL.to_string()),
            RiskLevel::High => recommendations.push(REC_HIGH.to_string()),
            RiskLevel::Medium | RiskLevel::Low => {}
        }

        if fall_detected {
            recommendations.push(REC_FALL.to_string());
        }

        let threshold = self.config.secondary_alert_threshold;
        for (factor, text) in RECOMMENDATION_ORDER {
            if signals.value(factor) > threshold {
                recommendations.push(text.to_string());
            }
        }

        if recommendations.is_empty() {
            recommendations.push(REC_NORMAL.to_string());
        }

        recommendations
    }
}

fn validate_inputs(
    features: &RiskFeatures,
    motion: Option<&MotionSample>,
    location: Option<&LocationFix>,
) -> Result<(), ValidationError> {
    if features.has_heart_rate() {
        check_range("heart_rate", features.current_bpm, HEART_RATE_MIN_BPM, HEART_RATE_MAX_BPM)?;
    }
    check_finite("anomaly_score", features.anomaly_score)?;
    check_finite("stress_indicator", features.stress_indicator)?;
    check_finite("fatigue_indicator", features.fatigue_indicator)?;
    check_finite("confidence", features.confidence)?;
    if let Some(hrv) = features.hrv_rmssd_ms {
        check_range("heart_rate_variability", hrv, 0.0, f64::MAX)?;
    }

    if let Some(m) = motion {
        if !m.acceleration.is_finite() {
            return Err(ValidationError::NonFinite("acceleration".to_string()));
        }
    }

    if let Some(l) = location {
        check_range("latitude", l.latitude, -90.0, 90.0)?;
        check_range("longitude", l.longitude, -180.0, 180.0)?;
        check_range("accuracy", l.accuracy, 0.0, f64::MAX)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QualityFlag, Vector3};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn features(bpm: f64, anomaly: f64) -> RiskFeatures {
        let mut f = RiskFeatures::empty("A-1");
        f.sample_count = 10;
        f.current_bpm = bpm;
        f.mean_bpm = 72.0;
        f.std_bpm = 5.0;
        f.anomaly_score = anomaly;
        f.anomaly_z = anomaly * 3.0;
        f.history_sufficient = true;
        f.profile_defaulted = false;
        f.confidence = 1.0;
        f.timestamp = Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        f
    }

    fn calm_motion(fall: bool) -> MotionSample {
        MotionSample {
            officer_id: "A-1".to_string(),
            acceleration: Vector3::new(0.0, 0.0, 1.0),
            angular_rate: Vector3::default(),
            fall_detected: fall,
            fall_confidence: if fall { 0.9 } else { 0.0 },
            activity: None,
            activity_confidence: None,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 5).unwrap(),
        }
    }

    #[test]
    fn test_normal_reading_is_low() {
        let scorer = RiskScorer::default();
        let assessment = scorer.score(&features(75.0, 0.2), None, None, false).unwrap();

        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(assessment.risk_score < 0.3);
        assert!(!assessment.fall_override);
        assert_eq!(assessment.recommendations, vec![REC_NORMAL.to_string()]);
    }

    #[test]
    fn test_tachycardia_is_high() {
        let scorer = RiskScorer::default();
        let assessment = scorer.score(&features(170.0, 0.0), None, None, false).unwrap();

        assert!(assessment.risk_score >= 0.6);
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert_eq!(assessment.recommendations[0], REC_HIGH);
        assert!(assessment.recommendations.contains(&REC_HEART_RATE.to_string()));
    }

    #[test]
    fn test_fall_forces_high_level() {
        let scorer = RiskScorer::default();
        let motion = calm_motion(true);
        let assessment = scorer.score(&features(90.0, 0.0), Some(&motion), None, true).unwrap();

        assert!(assessment.risk_level >= RiskLevel::High);
        assert!(assessment.fall_override);
        assert_eq!(assessment.factors.get("fall_detection"), Some(&1.0));
        assert!(assessment.recommendations.contains(&REC_FALL.to_string()));
        assert_eq!(assessment.timestamp, motion.timestamp);
    }

    #[test]
    fn test_fall_floor_is_configurable() {
        let config = ScoringConfig {
            fall_floor: RiskLevel::Critical,
            ..Default::default()
        };
        let scorer = RiskScorer::new(config);
        let assessment = scorer.score(&features(80.0, 0.0), None, None, true).unwrap();
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_score_is_clamped() {
        let scorer = RiskScorer::default();
        let mut f = features(200.0, 1.0);
        f.stress_indicator = 1.0;
        f.hrv_rmssd_ms = Some(10.0);
        let motion = MotionSample {
            acceleration: Vector3::new(8.0, 0.0, 0.0),
            ..calm_motion(true)
        };
        let assessment = scorer.score(&f, Some(&motion), None, true).unwrap();
        assert_eq!(assessment.risk_score, 1.0);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
        assert_eq!(assessment.recommendations[0], REC_CRITICAL);
    }

    #[test]
    fn test_rejects_implausible_heart_rate() {
        let scorer = RiskScorer::default();
        let result = scorer.score(&features(400.0, 0.0), None, None, false);
        assert!(matches!(result, Err(ValidationError::OutOfRange { .. })));

        let result = scorer.score(&features(f64::NAN, 0.0), None, None, false);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_inputs_reduce_confidence() {
        let scorer = RiskScorer::default();
        let full = scorer
            .score(&features(75.0, 0.0), Some(&calm_motion(false)), None, false)
            .unwrap();
        let partial = scorer.score(&RiskFeatures::empty("A-1"), None, None, false).unwrap();

        assert!(partial.confidence < full.confidence);
        assert!(partial.quality_flags.contains(&QualityFlag::MissingHeartRate));
        assert_eq!(partial.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_recommendations_are_deterministic() {
        let scorer = RiskScorer::default();
        let mut f = features(165.0, 0.9);
        f.hrv_rmssd_ms = Some(12.0);
        let a = scorer.score(&f, None, None, false).unwrap();
        let b = scorer.score(&f, None, None, false).unwrap();
        assert_eq!(a.recommendations, b.recommendations);
        assert_eq!(
            a.recommendations,
            vec![
                REC_CRITICAL.to_string(),
                REC_HEART_RATE.to_string(),
                REC_ANOMALY.to_string(),
                REC_HRV.to_string(),
            ]
        );
    }
}
