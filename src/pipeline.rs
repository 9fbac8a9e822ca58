//! Monitor orchestration
//!
//! This module provides the public API for Fieldwatch.
//! It runs an ingestion request through the whole path:
//! 1. Validation and conversion into per-stream samples
//! 2. Stale check and window update inside the officer's critical section
//! 3. Feature extraction and risk scoring on the updated record
//! 4. Commit, then publish to the fan-out in the same critical section
//! 5. Append accepted samples and raised events to the record log

use crate::config::{FeedConfig, MonitorConfig};
use crate::error::MonitorError;
use crate::fanout::{EventFanout, FanoutStats, FeedMessage, Subscription};
use crate::features::FeatureExtractor;
use crate::feed::{open_feed, EventSource};
use crate::proximity::ProximityAlerter;
use crate::records::{MemoryRecordLog, Record, RecordLog};
use crate::schema::{
    check_range, IngestAdapter, IngestRequest, ValidationError, HEART_RATE_MAX_BPM, HEART_RATE_MIN_BPM,
};
use crate::scorer::RiskScorer;
use crate::store::{LiveStateStore, OfficerEntry, OfficerUpdate, Stream};
use crate::types::{
    AlertSeverity, AlertType, GeoPoint, OfficerProfile, OfficerState, RiskAssessment, RiskEvent,
    RiskEventType, RiskLevel, SystemAlert,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const MAX_AGE_YEARS: f64 = 120.0;

/// Whether an ingestion request changed anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Applied,
    /// Every sample in the request was older than the stored one
    Stale,
}

/// Result of one ingestion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub officer_id: String,
    pub status: IngestStatus,
    /// Assessment held by the officer after the request
    pub assessment: Option<RiskAssessment>,
    pub events: Vec<RiskEvent>,
    pub rejected_streams: Vec<Stream>,
    pub revision: u64,
}

/// A manually raised alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualAlert {
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub officer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_event_id: Option<Uuid>,
}

/// Work done inside the critical section, carried out for the record log
struct Committed {
    outcome: IngestOutcome,
    records: Vec<Record>,
}

/// The monitoring service.
///
/// Construct once and share behind an `Arc`. All methods take `&self`.
#[derive(Debug)]
pub struct Monitor {
    config: MonitorConfig,
    store: Arc<LiveStateStore>,
    fanout: Arc<EventFanout>,
    extractor: FeatureExtractor,
    scorer: RiskScorer,
    proximity: ProximityAlerter,
    records: Arc<dyn RecordLog>,
}

impl Monitor {
    /// Create a monitor with an in-memory record log
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        let records = Arc::new(MemoryRecordLog::new(config.records.max_records));
        Self::with_record_log(config, records)
    }

    /// Create a monitor appending to the given record log
    pub fn with_record_log(
        config: MonitorConfig,
        records: Arc<dyn RecordLog>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;

        let store = Arc::new(LiveStateStore::new(config.features.window));
        let fanout = Arc::new(EventFanout::new(store.clone(), config.fanout.buffer_capacity));
        let proximity = ProximityAlerter::new(
            store.clone(),
            fanout.clone(),
            records.clone(),
            config.proximity.clone(),
        );

        Ok(Self {
            extractor: FeatureExtractor::new(config.features.clone()),
            scorer: RiskScorer::new(config.scoring.clone()),
            config,
            store,
            fanout,
            proximity,
            records,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start background tasks. Must be called from within a tokio runtime.
    pub fn start(&self) -> MonitorHandle {
        let period = self.config.fanout.heartbeat_interval();
        tracing::info!(heartbeat_secs = period.as_secs(), "Monitor started");
        MonitorHandle {
            heartbeat: self.fanout.spawn_heartbeat(period),
        }
    }

    /// Ingest one telemetry request.
    ///
    /// # Arguments
    /// * `request` - Ingestion request as sent by a device
    ///
    /// # Returns
    /// The officer's assessment after the request, any raised risk events,
    /// and the streams rejected as stale
    ///
    /// # Example
    /// ```ignore
    /// let monitor = Monitor::new(MonitorConfig::default())?;
    /// let outcome = monitor.ingest(&request)?;
    /// println!("{:?}", outcome.assessment.map(|a| a.risk_level));
    /// ```
    pub fn ingest(&self, request: &IngestRequest) -> Result<IngestOutcome, MonitorError> {
        request.validate()?;

        let samples = IngestAdapter::to_samples(request);
        let sos = request.sensor_data.as_ref().map(|s| s.sos).unwrap_or(false);
        let update = OfficerUpdate {
            heart_rate: samples.heart_rate,
            motion: samples.motion,
            location: samples.location,
            device_id: request.device_id.clone(),
            seen_at: Some(request.timestamp),
            ..Default::default()
        };

        let officer_id = request.officer_id.as_str();
        let committed = self.store.with_entry(officer_id, |entry, _created| -> Result<Committed, MonitorError> {
            // Work on a copy so a scoring failure leaves the record untouched
            let mut next = entry.clone();
            let result = next.apply(update.clone());

            if !result.rejected.is_empty() {
                tracing::debug!(
                    officer_id = %officer_id,
                    rejected = ?result.rejected,
                    "Ignored stale samples"
                );
            }

            let stale = result.applied.is_empty() && !result.rejected.is_empty();
            // Only a fall reported by this request raises a fall event
            let fall_reported = result.applied.contains(&Stream::Motion)
                && update.motion.as_ref().map(|m| m.fall_detected).unwrap_or(false);
            let mut changed = result.changed;
            let mut events = Vec::new();

            if !stale && (!result.applied.is_empty() || sos) {
                let assessment = self.assess(&next)?;
                if next.state.assessment.as_ref() != Some(&assessment) {
                    next.state.assessment = Some(assessment.clone());
                    if !changed {
                        next.state.revision += 1;
                        changed = true;
                    }
                }
                events.extend(self.classify(&next.state, &assessment, request, fall_reported));
            }

            *entry = next;
            if changed {
                self.fanout.publish(FeedMessage::officer_update(entry.state.clone()));
            }
            for event in &events {
                self.fanout.publish(FeedMessage::risk_event(event.clone()));
            }

            let mut records = Vec::new();
            if result.applied.contains(&Stream::Health) {
                records.extend(update.heart_rate.map(Record::HeartRate));
            }
            if result.applied.contains(&Stream::Motion) {
                records.extend(update.motion.map(Record::Motion));
            }
            if result.applied.contains(&Stream::Location) {
                records.extend(update.location.map(Record::Location));
            }
            records.extend(events.iter().cloned().map(Record::RiskEvent));

            Ok(Committed {
                outcome: IngestOutcome {
                    officer_id: officer_id.to_string(),
                    status: if stale {
                        IngestStatus::Stale
                    } else {
                        IngestStatus::Applied
                    },
                    assessment: entry.state.assessment.clone(),
                    events,
                    rejected_streams: result.rejected,
                    revision: entry.state.revision,
                },
                records,
            })
        })?;

        for record in committed.records {
            self.append_record(record);
        }

        let outcome = committed.outcome;
        if let (Some(client_score), Some(assessment)) = (request.risk_score, &outcome.assessment) {
            let gap = (client_score - assessment.risk_score).abs();
            if gap > self.config.scoring.divergence_warn_threshold {
                tracing::warn!(
                    officer_id = %officer_id,
                    client_score,
                    server_score = assessment.risk_score,
                    "Client risk score diverges from server assessment"
                );
            }
        }

        for event in &outcome.events {
            tracing::info!(
                officer_id = %event.officer_id,
                event_id = %event.id,
                event_type = ?event.event_type,
                risk_level = %event.risk_level,
                "Risk event raised"
            );
        }

        Ok(outcome)
    }

    /// Ingest a batch in order, one result per request
    pub fn ingest_batch(&self, requests: &[IngestRequest]) -> Vec<Result<IngestOutcome, MonitorError>> {
        requests.iter().map(|request| self.ingest(request)).collect()
    }

    /// Recompute the assessment from the entry's current inputs
    fn assess(&self, entry: &OfficerEntry) -> Result<RiskAssessment, ValidationError> {
        let state = &entry.state;
        let profile = (!state.profile.is_empty()).then_some(&state.profile);
        let features = self.extractor.extract(&state.officer_id, &entry.window, profile);
        self.scorer.score(
            &features,
            state.motion.as_ref(),
            state.location.as_ref(),
            state.fall_detected(),
        )
    }

    /// Decide whether an assessment warrants a risk event, and of which kind
    fn classify(
        &self,
        state: &OfficerState,
        assessment: &RiskAssessment,
        request: &IngestRequest,
        fall: bool,
    ) -> Option<RiskEvent> {
        let sos = request.sensor_data.as_ref().map(|s| s.sos).unwrap_or(false);
        if !(sos || fall || assessment.risk_level >= self.config.events.min_level) {
            return None;
        }

        let event_type = if sos {
            RiskEventType::Sos
        } else if fall {
            RiskEventType::FallDetected
        } else if assessment.risk_level >= RiskLevel::High {
            RiskEventType::HighRisk
        } else {
            dominant_event_type(assessment).unwrap_or(RiskEventType::HighRisk)
        };

        let description = match event_type {
            RiskEventType::Sos => "SOS triggered by officer".to_string(),
            RiskEventType::FallDetected => "Fall detected".to_string(),
            _ => format!(
                "{} risk level detected (score {:.2})",
                assessment.risk_level, assessment.risk_score
            ),
        };

        Some(RiskEvent {
            id: Uuid::new_v4(),
            officer_id: state.officer_id.clone(),
            event_type,
            risk_level: assessment.risk_level,
            risk_score: assessment.risk_score,
            description,
            location: state.location.as_ref().map(GeoPoint::from),
            occurred_at: request.timestamp,
            created_at: Utc::now(),
            is_acknowledged: false,
            is_resolved: false,
            metadata: IngestAdapter::event_metadata(request),
        })
    }

    /// Replace an officer's profile and rescore with it
    pub fn update_profile(
        &self,
        officer_id: &str,
        profile: OfficerProfile,
    ) -> Result<OfficerState, MonitorError> {
        validate_profile(&profile)?;
        self.require_officer(officer_id)?;
        self.store.with_entry(officer_id, |entry, _| -> Result<OfficerState, MonitorError> {
            let mut next = entry.clone();
            let result = next.apply(OfficerUpdate::default().with_profile(profile));
            if !result.changed {
                return Ok(next.state);
            }
            if next.state.assessment.is_some() {
                next.state.assessment = Some(self.assess(&next)?);
            }
            *entry = next;
            self.fanout.publish(FeedMessage::officer_update(entry.state.clone()));
            Ok(entry.state.clone())
        })
    }

    /// Mark an officer on or off duty
    pub fn set_on_duty(&self, officer_id: &str, on_duty: bool) -> Result<OfficerState, MonitorError> {
        self.require_officer(officer_id)?;
        let state = self.store.with_entry(officer_id, |entry, _| {
            let result = entry.apply(OfficerUpdate::default().with_on_duty(on_duty));
            if result.changed {
                self.fanout.publish(FeedMessage::officer_update(entry.state.clone()));
            }
            entry.state.clone()
        });
        tracing::info!(officer_id = %officer_id, on_duty, "Duty status set");
        Ok(state)
    }

    /// Alert every officer within `radius_m` of the source officer
    pub fn alert_nearby(
        &self,
        source_officer_id: &str,
        radius_m: f64,
        title: &str,
        message: &str,
    ) -> Result<Vec<String>, MonitorError> {
        self.proximity
            .alert_nearby(source_officer_id, radius_m, title, message)
    }

    /// Raise a manual alert and deliver it to all observers
    pub fn raise_alert(&self, request: ManualAlert) -> Result<SystemAlert, MonitorError> {
        if request.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title".to_string()).into());
        }

        let mut alert = SystemAlert::new(
            AlertType::Manual,
            request.severity,
            request.title,
            request.message,
        );
        if let Some(officer_id) = request.officer_id {
            alert = alert.for_officer(officer_id);
        }
        if let Some(event_id) = request.risk_event_id {
            alert = alert.with_risk_event(event_id);
        }

        tracing::info!(
            alert_id = %alert.id,
            severity = ?alert.severity,
            officer_id = ?alert.officer_id,
            "Manual alert raised"
        );
        self.append_record(Record::Alert(alert.clone()));
        self.fanout.publish(FeedMessage::system_alert(alert.clone()));
        Ok(alert)
    }

    /// Risk events for one officer over the last `hours` hours, oldest first
    pub fn risk_history(&self, officer_id: &str, hours: i64) -> Result<Vec<RiskEvent>, MonitorError> {
        if hours <= 0 {
            return Err(ValidationError::Invalid {
                field: "hours".to_string(),
                reason: format!("must be positive, got {}", hours),
            }
            .into());
        }
        self.require_officer(officer_id)?;
        let since = Utc::now() - ChronoDuration::hours(hours);
        self.records.risk_events(officer_id, since)
    }

    /// Most recent alerts, newest first
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<SystemAlert>, MonitorError> {
        self.records.recent_alerts(limit)
    }

    /// Current state of one officer
    pub fn get(&self, officer_id: &str) -> Result<OfficerState, MonitorError> {
        self.store.get(officer_id)
    }

    /// Consistent copy of every officer, ordered by id
    pub fn snapshot(&self) -> Vec<OfficerState> {
        self.store.list()
    }

    pub fn subscribe(&self) -> Subscription {
        self.fanout.subscribe()
    }

    /// Open a feed using the configured backend
    pub fn open_feed(&self) -> Box<dyn EventSource> {
        open_feed(self.fanout.clone(), &self.config.feed)
    }

    /// Open a feed with an explicit backend configuration
    pub fn open_feed_with(&self, config: &FeedConfig) -> Box<dyn EventSource> {
        open_feed(self.fanout.clone(), config)
    }

    pub fn feed_stats(&self) -> FanoutStats {
        self.fanout.stats()
    }

    pub fn officer_count(&self) -> usize {
        self.store.len()
    }

    fn require_officer(&self, officer_id: &str) -> Result<(), MonitorError> {
        if self.store.contains(officer_id) {
            Ok(())
        } else {
            Err(MonitorError::OfficerNotFound(officer_id.to_string()))
        }
    }

    fn append_record(&self, record: Record) {
        if let Err(e) = self.records.append(record) {
            tracing::warn!(error = %e, "Failed to append record");
        }
    }
}

fn validate_profile(profile: &OfficerProfile) -> Result<(), ValidationError> {
    if let Some(age) = profile.age {
        check_range("age", f64::from(age), 0.0, MAX_AGE_YEARS)?;
    }
    if let Some(resting) = profile.resting_hr_bpm {
        check_range("resting_hr_bpm", resting, HEART_RATE_MIN_BPM, HEART_RATE_MAX_BPM)?;
    }
    if let Some(max) = profile.max_hr_bpm {
        check_range("max_hr_bpm", max, HEART_RATE_MIN_BPM, HEART_RATE_MAX_BPM)?;
    }
    Ok(())
}

/// Event type named after the strongest contributing factor
fn dominant_event_type(assessment: &RiskAssessment) -> Option<RiskEventType> {
    let (factor, _) = assessment
        .factors
        .iter()
        .filter(|(name, value)| name.as_str() != "fall_detection" && **value > 0.0)
        .max_by(|a, b| a.1.total_cmp(b.1))?;

    match factor.as_str() {
        "heart_rate" | "heart_rate_anomaly" | "heart_rate_variability" | "physiological_strain" => {
            Some(RiskEventType::HeartRateAnomaly)
        }
        "motion" | "activity" => Some(RiskEventType::MotionAnomaly),
        "location" => Some(RiskEventType::LocationAnomaly),
        _ => None,
    }
}

/// Handle to the monitor's background tasks
#[derive(Debug)]
pub struct MonitorHandle {
    heartbeat: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop background tasks
    pub fn shutdown(self) {
        self.heartbeat.abort();
        tracing::info!("Monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::MemoryRecordLog;
    use crate::schema::{LocationPayload, SensorPayload};
    use crate::types::Vector3;
    use chrono::{DateTime, TimeZone};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::thread;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + ChronoDuration::seconds(secs)
    }

    fn monitor() -> Monitor {
        let mut config = MonitorConfig::default();
        config.fanout.buffer_capacity = 4096;
        Monitor::new(config).unwrap()
    }

    fn heart_rate(officer: &str, secs: i64, bpm: f64) -> IngestRequest {
        IngestRequest::new(officer, at(secs)).with_sensor_data(SensorPayload {
            heart_rate: Some(bpm),
            ..Default::default()
        })
    }

    fn located(request: IngestRequest, latitude: f64, longitude: f64) -> IngestRequest {
        request.with_location(LocationPayload {
            latitude,
            longitude,
            altitude: None,
            accuracy: Some(5.0),
            horizontal_accuracy: None,
            vertical_accuracy: None,
            speed: None,
            course: None,
        })
    }

    fn drain(sub: &mut Subscription) -> Vec<FeedMessage> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[test]
    fn test_normal_reading_is_low_without_event() {
        let monitor = monitor();
        let outcome = monitor.ingest(&heart_rate("A-1", 0, 80.0)).unwrap();

        assert_eq!(outcome.status, IngestStatus::Applied);
        assert_eq!(outcome.revision, 1);
        let assessment = outcome.assessment.unwrap();
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_tachycardia_raises_high_risk_event() {
        let monitor = monitor();
        let mut sub = monitor.subscribe();
        let outcome = monitor.ingest(&heart_rate("A-1", 0, 170.0)).unwrap();

        assert_eq!(outcome.assessment.unwrap().risk_level, RiskLevel::High);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].event_type, RiskEventType::HighRisk);

        let kinds: Vec<&str> = drain(&mut sub).iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["officer_update", "risk_event"]);

        let history = monitor.risk_history("A-1", 24).unwrap();
        assert_eq!(history.len(), 0, "events older than the window are excluded");
    }

    #[test]
    fn test_fall_forces_high_level() {
        let monitor = monitor();
        let request = IngestRequest::new("A-1", Utc::now()).with_sensor_data(SensorPayload {
            heart_rate: Some(80.0),
            fall_detected: true,
            fall_confidence: Some(0.95),
            ..Default::default()
        });
        let outcome = monitor.ingest(&request).unwrap();

        let assessment = outcome.assessment.unwrap();
        assert!(assessment.risk_level >= RiskLevel::High);
        assert!(assessment.fall_override);
        assert_eq!(assessment.factors.get("fall_detection"), Some(&1.0));
        assert_eq!(outcome.events[0].event_type, RiskEventType::FallDetected);

        // Recent events show up in the officer's history
        let history = monitor.risk_history("A-1", 24).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_fall_event_only_for_reporting_request() {
        let monitor = monitor();
        let mut fall = IngestRequest::new("A-1", at(0)).with_sensor_data(SensorPayload {
            heart_rate: Some(80.0),
            fall_detected: true,
            ..Default::default()
        });
        fall.battery_level = Some(0.35);
        let outcome = monitor.ingest(&fall).unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].event_type, RiskEventType::FallDetected);
        assert_eq!(outcome.events[0].metadata.battery_level, Some(0.35));

        for secs in [60, 120, 180] {
            let request = located(IngestRequest::new("A-1", at(secs)), 40.7128, -74.0060);
            let outcome = monitor.ingest(&request).unwrap();
            // The latched fall still holds the level up
            assert!(outcome.assessment.unwrap().risk_level >= RiskLevel::High);
            assert!(outcome
                .events
                .iter()
                .all(|e| e.event_type != RiskEventType::FallDetected));
        }
    }

    #[test]
    fn test_sos_takes_precedence() {
        let monitor = monitor();
        let request = IngestRequest::new("A-1", at(0)).with_sensor_data(SensorPayload {
            heart_rate: Some(170.0),
            fall_detected: true,
            sos: true,
            ..Default::default()
        });
        let outcome = monitor.ingest(&request).unwrap();
        assert_eq!(outcome.events[0].event_type, RiskEventType::Sos);
    }

    #[test]
    fn test_sos_without_samples_still_raises_event() {
        let monitor = monitor();
        let request = IngestRequest::new("A-1", at(0)).with_sensor_data(SensorPayload {
            sos: true,
            ..Default::default()
        });
        let outcome = monitor.ingest(&request).unwrap();
        assert_eq!(outcome.status, IngestStatus::Applied);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].event_type, RiskEventType::Sos);
    }

    #[test]
    fn test_stale_request_changes_nothing() {
        let monitor = monitor();
        monitor.ingest(&heart_rate("A-1", 10, 80.0)).unwrap();
        let before = monitor.get("A-1").unwrap();
        let mut sub = monitor.subscribe();

        let outcome = monitor.ingest(&heart_rate("A-1", 5, 170.0)).unwrap();
        assert_eq!(outcome.status, IngestStatus::Stale);
        assert_eq!(outcome.rejected_streams, vec![Stream::Health]);
        assert!(outcome.events.is_empty());
        assert_eq!(monitor.get("A-1").unwrap(), before);
        assert!(drain(&mut sub).is_empty());
    }

    #[test]
    fn test_invalid_request_is_rejected_before_state() {
        let monitor = monitor();
        let result = monitor.ingest(&heart_rate("A-1", 0, 300.0));
        assert!(matches!(result, Err(MonitorError::Validation(_))));
        assert!(matches!(monitor.get("A-1"), Err(MonitorError::OfficerNotFound(_))));
    }

    #[test]
    fn test_client_score_divergence_is_not_merged() {
        let monitor = monitor();
        let mut request = heart_rate("A-1", 0, 80.0);
        request.risk_score = Some(0.95);
        let outcome = monitor.ingest(&request).unwrap();
        assert_eq!(outcome.assessment.unwrap().risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_profile_update_rescores() {
        let monitor = monitor();
        monitor.ingest(&heart_rate("A-1", 0, 120.0)).unwrap();
        let before = monitor.get("A-1").unwrap();

        let profile = OfficerProfile {
            age: Some(30),
            resting_hr_bpm: Some(55.0),
            max_hr_bpm: Some(150.0),
        };
        let state = monitor.update_profile("A-1", profile.clone()).unwrap();
        assert_eq!(state.profile, profile);
        assert_eq!(state.revision, before.revision + 1);
        assert!(state.assessment.is_some());

        assert!(matches!(
            monitor.update_profile("nobody", profile),
            Err(MonitorError::OfficerNotFound(_))
        ));

        let bad = OfficerProfile {
            max_hr_bpm: Some(400.0),
            ..Default::default()
        };
        assert!(matches!(monitor.update_profile("A-1", bad), Err(MonitorError::Validation(_))));
    }

    #[test]
    fn test_duty_toggle() {
        let monitor = monitor();
        monitor.ingest(&heart_rate("A-1", 0, 80.0)).unwrap();
        assert!(!monitor.set_on_duty("A-1", false).unwrap().on_duty);
        assert!(monitor.set_on_duty("A-1", true).unwrap().on_duty);
    }

    #[test]
    fn test_alert_nearby_through_monitor() {
        let monitor = monitor();
        monitor.ingest(&located(heart_rate("SRC", 0, 80.0), 40.7128, -74.0060)).unwrap();
        monitor.ingest(&located(heart_rate("NEAR", 0, 80.0), 40.7137, -74.0060)).unwrap();
        monitor.ingest(&located(heart_rate("FAR", 0, 80.0), 40.7173, -74.0060)).unwrap();

        let targets = monitor
            .alert_nearby("SRC", 300.0, "Officer Down", "Assist needed nearby")
            .unwrap();
        assert_eq!(targets, vec!["NEAR".to_string()]);
        assert_eq!(monitor.recent_alerts(10).unwrap().len(), 1);
    }

    #[test]
    fn test_manual_alert() {
        let monitor = monitor();
        let mut sub = monitor.subscribe();
        let alert = monitor
            .raise_alert(ManualAlert {
                severity: AlertSeverity::Critical,
                title: "Shots fired".to_string(),
                message: "All units respond".to_string(),
                officer_id: None,
                risk_event_id: None,
            })
            .unwrap();
        assert_eq!(alert.alert_type, AlertType::Manual);
        assert_eq!(drain(&mut sub).len(), 1);
        assert_eq!(monitor.recent_alerts(5).unwrap()[0].id, alert.id);

        let empty_title = monitor.raise_alert(ManualAlert {
            severity: AlertSeverity::Low,
            title: "  ".to_string(),
            message: String::new(),
            officer_id: None,
            risk_event_id: None,
        });
        assert!(matches!(empty_title, Err(MonitorError::Validation(_))));
    }

    #[test]
    fn test_risk_history_rejects_bad_window() {
        let monitor = monitor();
        monitor.ingest(&heart_rate("A-1", 0, 80.0)).unwrap();
        assert!(matches!(monitor.risk_history("A-1", 0), Err(MonitorError::Validation(_))));
        assert!(matches!(
            monitor.risk_history("nobody", 24),
            Err(MonitorError::OfficerNotFound(_))
        ));
    }

    #[test]
    fn test_samples_are_recorded() {
        let records = Arc::new(MemoryRecordLog::default());
        let monitor = Monitor::with_record_log(MonitorConfig::default(), records.clone()).unwrap();
        let request = located(heart_rate("A-1", 0, 80.0), 40.0, -74.0);
        monitor.ingest(&request).unwrap();
        assert_eq!(records.len(), 2);

        // Stale request appends nothing
        monitor.ingest(&request).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_concurrent_officers_keep_per_officer_order() {
        let monitor = Arc::new(monitor());
        let mut sub = monitor.subscribe();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let monitor = monitor.clone();
                thread::spawn(move || {
                    let officer = format!("O-{}", t);
                    for i in 0..100 {
                        let bpm = 70.0 + (i % 10) as f64;
                        let mut request = heart_rate(&officer, i, bpm);
                        request.sensor_data = request.sensor_data.map(|s| SensorPayload {
                            acceleration: Some(Vector3::new(0.0, 0.0, 1.0)),
                            ..s
                        });
                        monitor.ingest(&request).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut last_revision: HashMap<String, u64> = HashMap::new();
        for message in drain(&mut sub) {
            if let FeedMessage::OfficerUpdate { officer, .. } = message {
                let previous = last_revision.insert(officer.officer_id.clone(), officer.revision);
                assert!(previous.map(|p| p < officer.revision).unwrap_or(true));
            }
        }
        assert_eq!(last_revision.len(), 4);

        for state in monitor.snapshot() {
            assert_eq!(state.revision, last_revision[&state.officer_id]);
            assert_eq!(state.heart_rate.unwrap().timestamp, at(99));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_emits_heartbeats() {
        let monitor = monitor();
        let mut sub = monitor.subscribe();
        let handle = monitor.start();

        let message = sub.recv().await.unwrap();
        assert_eq!(message.kind(), "heartbeat");
        handle.shutdown();
    }
}
