//! Signal normalization
//!
//! This module maps raw features and the latest motion/location readings onto
//! per-factor risk values in 0-1, each with its own confidence.
//! - Absent inputs produce no factor, never a zero that dilutes others
//! - Quality flags record what was missing or degraded
//! - Coverage counts how many input streams were present

use crate::types::{ActivityType, LocationFix, MotionSample, QualityFlag, RiskFeatures};
use serde::{Deserialize, Serialize};

const MISSING_HEART_RATE_CONFIDENCE: f64 = 0.5;
const MISSING_MOTION_CONFIDENCE: f64 = 0.85;
const MISSING_LOCATION_CONFIDENCE: f64 = 0.9;
const INACCURATE_LOCATION_CONFIDENCE: f64 = 0.8;
const LOW_ACTIVITY_CONFIDENCE: f64 = 0.5;
const LOW_SENSOR_CONFIDENCE: f64 = 0.4;

/// Named contributors to the risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    HeartRate,
    HeartRateAnomaly,
    HeartRateVariability,
    PhysiologicalStrain,
    Motion,
    Activity,
    Location,
    FallDetection,
}

impl RiskFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFactor::HeartRate => "heart_rate",
            RiskFactor::HeartRateAnomaly => "heart_rate_anomaly",
            RiskFactor::HeartRateVariability => "heart_rate_variability",
            RiskFactor::PhysiologicalStrain => "physiological_strain",
            RiskFactor::Motion => "motion",
            RiskFactor::Activity => "activity",
            RiskFactor::Location => "location",
            RiskFactor::FallDetection => "fall_detection",
        }
    }
}

/// One normalized factor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorSignal {
    pub factor: RiskFactor,
    /// Normalized risk (0-1)
    pub value: f64,
}

/// Output of the normalizer
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSignals {
    pub factors: Vec<FactorSignal>,
    /// Product of per-input confidences (0-1)
    pub confidence: f64,
    /// Fraction of input streams present (0-1)
    pub coverage: f64,
    pub quality_flags: Vec<QualityFlag>,
}

impl NormalizedSignals {
    /// Normalized value of a factor, 0 when absent
    pub fn value(&self, factor: RiskFactor) -> f64 {
        self.factors
            .iter()
            .find(|f| f.factor == factor)
            .map(|f| f.value)
            .unwrap_or(0.0)
    }

    pub fn has(&self, factor: RiskFactor) -> bool {
        self.factors.iter().any(|f| f.factor == factor)
    }
}

/// Normalizer for turning features and readings into factor signals
pub struct Normalizer;

impl Normalizer {
    /// Normalize the current inputs of one officer
    pub fn normalize(
        features: &RiskFeatures,
        motion: Option<&MotionSample>,
        location: Option<&LocationFix>,
        fall_detected: bool,
        location_accuracy_threshold_m: f64,
    ) -> NormalizedSignals {
        let mut factors = Vec::new();
        let mut quality_flags = Vec::new();
        let mut confidence = 1.0;
        let mut coverage_count = 0;
        let total_streams = 3;

        // Heart rate and everything derived from its history
        if features.has_heart_rate() {
            coverage_count += 1;
            confidence *= features.confidence.clamp(0.0, 1.0);

            factors.push(FactorSignal {
                factor: RiskFactor::HeartRate,
                value: heart_rate_risk(features.current_bpm),
            });
            factors.push(FactorSignal {
                factor: RiskFactor::HeartRateAnomaly,
                value: features.anomaly_score.clamp(0.0, 1.0),
            });

            if features.history_sufficient {
                factors.push(FactorSignal {
                    factor: RiskFactor::PhysiologicalStrain,
                    value: features.stress_indicator.max(features.fatigue_indicator).clamp(0.0, 1.0),
                });
            } else {
                quality_flags.push(QualityFlag::InsufficientHistory);
            }

            if features.profile_defaulted {
                quality_flags.push(QualityFlag::DefaultProfile);
            }
            if features.confidence < LOW_SENSOR_CONFIDENCE {
                quality_flags.push(QualityFlag::LowSensorConfidence);
            }
        } else {
            confidence *= MISSING_HEART_RATE_CONFIDENCE;
            quality_flags.push(QualityFlag::MissingHeartRate);
        }

        if let Some(hrv) = features.hrv_rmssd_ms {
            factors.push(FactorSignal {
                factor: RiskFactor::HeartRateVariability,
                value: hrv_risk(hrv),
            });
        }

        match motion {
            Some(sample) => {
                coverage_count += 1;
                factors.push(FactorSignal {
                    factor: RiskFactor::Motion,
                    value: motion_risk(sample.acceleration.magnitude()),
                });

                if let Some(activity) = sample.activity {
                    let activity_confidence = sample.activity_confidence.unwrap_or(1.0).clamp(0.0, 1.0);
                    factors.push(FactorSignal {
                        factor: RiskFactor::Activity,
                        value: activity_risk(activity, activity_confidence),
                    });
                    if activity_confidence < LOW_ACTIVITY_CONFIDENCE {
                        quality_flags.push(QualityFlag::LowActivityConfidence);
                    }
                    confidence *= activity_confidence.max(LOW_ACTIVITY_CONFIDENCE);
                }
            }
            None => {
                confidence *= MISSING_MOTION_CONFIDENCE;
                quality_flags.push(QualityFlag::MissingMotion);
            }
        }

        match location {
            Some(fix) => {
                coverage_count += 1;
                let risk = location_risk(fix.accuracy, location_accuracy_threshold_m);
                factors.push(FactorSignal {
                    factor: RiskFactor::Location,
                    value: risk,
                });
                if risk > 0.0 {
                    confidence *= INACCURATE_LOCATION_CONFIDENCE;
                    quality_flags.push(QualityFlag::LowLocationAccuracy);
                }
            }
            None => {
                confidence *= MISSING_LOCATION_CONFIDENCE;
                quality_flags.push(QualityFlag::MissingLocation);
            }
        }

        if fall_detected {
            factors.push(FactorSignal {
                factor: RiskFactor::FallDetection,
                value: 1.0,
            });
            let fall_confidence = motion.map(|m| m.fall_confidence).unwrap_or(1.0);
            confidence *= fall_confidence.clamp(0.5, 1.0);
        }

        quality_flags.sort();
        quality_flags.dedup();

        NormalizedSignals {
            factors,
            confidence: confidence.clamp(0.0, 1.0),
            coverage: coverage_count as f64 / total_streams as f64,
            quality_flags,
        }
    }
}

/// Heart rate risk: ramps up above 100 bpm (full at 170) and below 60 bpm (full at 40)
pub fn heart_rate_risk(bpm: f64) -> f64 {
    if bpm > 100.0 {
        ((bpm - 100.0) / 70.0).min(1.0)
    } else if bpm < 60.0 {
        ((60.0 - bpm) / 20.0).min(1.0)
    } else {
        0.0
    }
}

/// HRV risk by RMSSD band; very high readings are treated as suspect
pub fn hrv_risk(rmssd_ms: f64) -> f64 {
    if rmssd_ms < 15.0 {
        0.9
    } else if rmssd_ms < 20.0 {
        0.7
    } else if rmssd_ms < 30.0 {
        0.4
    } else if rmssd_ms <= 50.0 {
        0.0
    } else {
        0.2
    }
}

/// Motion risk by acceleration magnitude (g)
pub fn motion_risk(magnitude_g: f64) -> f64 {
    if magnitude_g < 0.5 {
        // Near-stillness: possible unresponsiveness
        0.6
    } else if magnitude_g < 1.0 {
        0.3
    } else if magnitude_g <= 3.0 {
        0.0
    } else if magnitude_g <= 6.0 {
        0.4
    } else {
        0.8
    }
}

/// Activity risk, inflated when the classifier is unsure
pub fn activity_risk(activity: ActivityType, confidence: f64) -> f64 {
    let base = match activity {
        ActivityType::Stationary => 0.0,
        ActivityType::Walking => 0.1,
        ActivityType::Running => 0.3,
        ActivityType::Cycling => 0.2,
        ActivityType::Driving => 0.1,
        ActivityType::Unknown => 0.5,
    };
    (base * (2.0 - confidence.clamp(0.0, 1.0))).min(1.0)
}

pub fn location_risk(accuracy_m: f64, threshold_m: f64) -> f64 {
    if accuracy_m > threshold_m {
        0.3
    } else {
        0.0
    }
}
