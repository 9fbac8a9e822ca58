//! Rolling heart-rate windows
//!
//! Each officer owns one window. It keeps the samples the feature extractor
//! looks at and remembers when the officer's session started.

use crate::config::WindowPolicy;
use crate::types::HeartRateSample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Rolling buffer of heart-rate samples for one officer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartRateWindow {
    samples: VecDeque<HeartRateSample>,
    policy: WindowPolicy,
    /// Timestamp of the first sample ever accepted
    session_started_at: Option<DateTime<Utc>>,
}

impl Default for HeartRateWindow {
    fn default() -> Self {
        Self::new(WindowPolicy::default())
    }
}

impl HeartRateWindow {
    /// Create an empty window with the given retention policy
    pub fn new(policy: WindowPolicy) -> Self {
        let capacity = match policy {
            WindowPolicy::LastSamples { count } => count,
            WindowPolicy::Duration { .. } => 64,
        };
        Self {
            samples: VecDeque::with_capacity(capacity),
            policy,
            session_started_at: None,
        }
    }

    /// Append a sample and evict whatever the policy no longer covers.
    ///
    /// Returns false (and leaves the window untouched) when the sample is not
    /// newer than the latest one already held.
    pub fn push(&mut self, sample: HeartRateSample) -> bool {
        if let Some(latest) = self.samples.back() {
            if sample.timestamp <= latest.timestamp {
                return false;
            }
        }

        if self.session_started_at.is_none() {
            self.session_started_at = Some(sample.timestamp);
        }

        let newest = sample.timestamp;
        self.samples.push_back(sample);

        match self.policy {
            WindowPolicy::LastSamples { count } => {
                while self.samples.len() > count {
                    self.samples.pop_front();
                }
            }
            WindowPolicy::Duration { minutes } => {
                let cutoff = newest - Duration::minutes(minutes);
                while self
                    .samples
                    .front()
                    .map(|s| s.timestamp < cutoff)
                    .unwrap_or(false)
                {
                    self.samples.pop_front();
                }
            }
        }

        true
    }

    /// Samples in chronological order
    pub fn iter(&self) -> impl Iterator<Item = &HeartRateSample> + '_ {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&HeartRateSample> {
        self.samples.back()
    }

    pub fn session_started_at(&self) -> Option<DateTime<Utc>> {
        self.session_started_at
    }

    /// Load a window from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Save the window to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(minute: i64, bpm: f64) -> HeartRateSample {
        HeartRateSample {
            officer_id: "A-1".to_string(),
            value: bpm,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(minute),
            confidence: 1.0,
            source: "test".to_string(),
            hrv_rmssd_ms: None,
        }
    }

    #[test]
    fn test_last_samples_policy_evicts_oldest() {
        let mut window = HeartRateWindow::new(WindowPolicy::LastSamples { count: 3 });
        for i in 0..5 {
            assert!(window.push(sample(i, 70.0 + i as f64)));
        }
        assert_eq!(window.len(), 3);
        let values: Vec<f64> = window.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![72.0, 73.0, 74.0]);
    }

    #[test]
    fn test_duration_policy_evicts_old_samples() {
        let mut window = HeartRateWindow::new(WindowPolicy::Duration { minutes: 10 });
        window.push(sample(0, 70.0));
        window.push(sample(5, 71.0));
        window.push(sample(14, 72.0));
        let values: Vec<f64> = window.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![71.0, 72.0]);
    }

    #[test]
    fn test_rejects_out_of_order_sample() {
        let mut window = HeartRateWindow::default();
        assert!(window.push(sample(5, 70.0)));
        assert!(!window.push(sample(5, 90.0)));
        assert!(!window.push(sample(2, 90.0)));
        assert_eq!(window.len(), 1);
        assert_eq!(window.latest().unwrap().value, 70.0);
    }

    #[test]
    fn test_session_start_survives_eviction() {
        let mut window = HeartRateWindow::new(WindowPolicy::LastSamples { count: 2 });
        for i in 0..4 {
            window.push(sample(i, 70.0));
        }
        assert_eq!(window.session_started_at(), Some(sample(0, 0.0).timestamp));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut window = HeartRateWindow::default();
        window.push(sample(0, 70.0));
        let json = window.to_json().unwrap();
        let restored = HeartRateWindow::from_json(&json).unwrap();
        assert_eq!(restored.len(), 1);
    }
}
