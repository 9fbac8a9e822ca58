//! Live state store
//!
//! Holds exactly one [`OfficerState`] per officer and is the only place that
//! mutates it. Locking is two-level:
//! - the officer map sits behind a `RwLock`, held shared by every mutation
//! - each officer's record sits behind its own `Mutex`
//!
//! Updates for different officers therefore run in parallel, while updates for
//! one officer are serialized. A snapshot takes the map lock exclusively, so it
//! never observes a half-applied update.

use crate::config::WindowPolicy;
use crate::error::MonitorError;
use crate::types::{
    HeartRateSample, LocationFix, MotionSample, OfficerIdentity, OfficerProfile, OfficerState,
};
use crate::window::HeartRateWindow;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Independently timestamped telemetry streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Health,
    Motion,
    Location,
}

/// Partial state for one officer. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfficerUpdate {
    pub heart_rate: Option<HeartRateSample>,
    pub motion: Option<MotionSample>,
    pub location: Option<LocationFix>,
    pub identity: Option<OfficerIdentity>,
    pub profile: Option<OfficerProfile>,
    pub device_id: Option<String>,
    pub on_duty: Option<bool>,
    /// Presence timestamp for requests that carry no samples
    pub seen_at: Option<DateTime<Utc>>,
}

impl OfficerUpdate {
    pub fn with_heart_rate(mut self, sample: HeartRateSample) -> Self {
        self.heart_rate = Some(sample);
        self
    }

    pub fn with_motion(mut self, sample: MotionSample) -> Self {
        self.motion = Some(sample);
        self
    }

    pub fn with_location(mut self, fix: LocationFix) -> Self {
        self.location = Some(fix);
        self
    }

    pub fn with_profile(mut self, profile: OfficerProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_on_duty(mut self, on_duty: bool) -> Self {
        self.on_duty = Some(on_duty);
        self
    }

    pub fn seen_at(mut self, at: DateTime<Utc>) -> Self {
        self.seen_at = Some(at);
        self
    }

    /// Streams this update carries samples for
    pub fn streams(&self) -> Vec<Stream> {
        let mut streams = Vec::new();
        if self.heart_rate.is_some() {
            streams.push(Stream::Health);
        }
        if self.motion.is_some() {
            streams.push(Stream::Motion);
        }
        if self.location.is_some() {
            streams.push(Stream::Location);
        }
        streams
    }
}

/// What an upsert did
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// State after the update
    pub state: OfficerState,
    pub applied: Vec<Stream>,
    /// Streams ignored because their sample was not newer than the stored one
    pub rejected: Vec<Stream>,
    /// Whether anything in the record changed
    pub changed: bool,
    /// Whether this update created the record
    pub created: bool,
}

/// One officer's record plus the heart-rate window behind its features
#[derive(Debug, Clone)]
pub struct OfficerEntry {
    pub state: OfficerState,
    pub window: HeartRateWindow,
}

/// Result of applying an update to an entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyResult {
    pub applied: Vec<Stream>,
    pub rejected: Vec<Stream>,
    pub changed: bool,
}

impl OfficerEntry {
    pub fn new(officer_id: &str, policy: WindowPolicy) -> Self {
        Self {
            state: OfficerState::new(officer_id),
            window: HeartRateWindow::new(policy),
        }
    }

    /// Apply an update, enforcing per-stream timestamp order
    pub fn apply(&mut self, update: OfficerUpdate) -> ApplyResult {
        let mut result = ApplyResult::default();
        let mut newest: Option<DateTime<Utc>> = None;

        if let Some(sample) = update.heart_rate {
            let fresh = is_newer(sample.timestamp, self.state.heart_rate.as_ref().map(|s| s.timestamp));
            if fresh && self.window.push(sample.clone()) {
                newest = newest.max(Some(sample.timestamp));
                self.state.heart_rate = Some(sample);
                result.applied.push(Stream::Health);
            } else {
                result.rejected.push(Stream::Health);
            }
        }

        if let Some(sample) = update.motion {
            if is_newer(sample.timestamp, self.state.motion.as_ref().map(|s| s.timestamp)) {
                newest = newest.max(Some(sample.timestamp));
                self.state.motion = Some(sample);
                result.applied.push(Stream::Motion);
            } else {
                result.rejected.push(Stream::Motion);
            }
        }

        if let Some(fix) = update.location {
            if is_newer(fix.timestamp, self.state.location.as_ref().map(|l| l.timestamp)) {
                newest = newest.max(Some(fix.timestamp));
                self.state.location = Some(fix);
                result.applied.push(Stream::Location);
            } else {
                result.rejected.push(Stream::Location);
            }
        }

        let mut changed = !result.applied.is_empty();

        if let Some(identity) = update.identity {
            if identity != self.state.identity {
                self.state.identity = identity;
                changed = true;
            }
        }
        if let Some(profile) = update.profile {
            if profile != self.state.profile {
                self.state.profile = profile;
                changed = true;
            }
        }
        if let Some(device_id) = update.device_id {
            if self.state.device_id.as_deref() != Some(device_id.as_str()) {
                self.state.device_id = Some(device_id);
                changed = true;
            }
        }
        if let Some(on_duty) = update.on_duty {
            if on_duty != self.state.on_duty {
                self.state.on_duty = on_duty;
                changed = true;
            }
        }

        // A request with no samples still counts as presence
        if result.applied.is_empty() && result.rejected.is_empty() {
            newest = update.seen_at;
        }
        if let Some(at) = newest {
            if is_newer(at, self.state.last_seen) {
                self.state.last_seen = Some(at);
                changed = true;
            }
        }

        if changed {
            self.state.revision += 1;
        }
        result.changed = changed;
        result
    }
}

fn is_newer(candidate: DateTime<Utc>, stored: Option<DateTime<Utc>>) -> bool {
    stored.map(|s| candidate > s).unwrap_or(true)
}

/// Authoritative per-officer state
#[derive(Debug)]
pub struct LiveStateStore {
    officers: RwLock<HashMap<String, Arc<Mutex<OfficerEntry>>>>,
    window_policy: WindowPolicy,
}

impl Default for LiveStateStore {
    fn default() -> Self {
        Self::new(WindowPolicy::default())
    }
}

impl LiveStateStore {
    pub fn new(window_policy: WindowPolicy) -> Self {
        Self {
            officers: RwLock::new(HashMap::new()),
            window_policy,
        }
    }

    /// Apply a partial update, creating the officer on first sight
    pub fn upsert(&self, officer_id: &str, update: OfficerUpdate) -> UpsertOutcome {
        self.with_entry(officer_id, |entry, created| {
            let result = entry.apply(update);
            if !result.rejected.is_empty() {
                tracing::debug!(
                    officer_id = %officer_id,
                    rejected = ?result.rejected,
                    "Ignored stale samples"
                );
            }
            UpsertOutcome {
                state: entry.state.clone(),
                applied: result.applied,
                rejected: result.rejected,
                changed: result.changed,
                created,
            }
        })
    }

    /// Run `f` inside the officer's critical section.
    ///
    /// The second argument tells whether the entry was created for this call.
    /// `f` must not call back into the store.
    pub fn with_entry<R>(&self, officer_id: &str, f: impl FnOnce(&mut OfficerEntry, bool) -> R) -> R {
        {
            let officers = self.officers.read();
            if let Some(slot) = officers.get(officer_id) {
                let mut entry = slot.lock();
                return f(&mut entry, false);
            }
        }

        // First sighting: insert under the exclusive lock. Another writer may
        // have raced us here, in which case its entry is reused.
        let mut officers = self.officers.write();
        let mut created = false;
        let slot = officers
            .entry(officer_id.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(OfficerEntry::new(officer_id, self.window_policy)))
            })
            .clone();
        let mut entry = slot.lock();
        if created {
            tracing::info!(officer_id = %officer_id, "Tracking new officer");
        }
        f(&mut entry, created)
    }

    /// Current state of one officer
    pub fn get(&self, officer_id: &str) -> Result<OfficerState, MonitorError> {
        let officers = self.officers.read();
        officers
            .get(officer_id)
            .map(|slot| slot.lock().state.clone())
            .ok_or_else(|| MonitorError::OfficerNotFound(officer_id.to_string()))
    }

    /// Point-in-time copy of every officer, ordered by id
    pub fn list(&self) -> Vec<OfficerState> {
        // Exclusive: waits for in-flight updates and blocks new ones
        let officers = self.officers.write();
        let mut states: Vec<OfficerState> =
            officers.values().map(|slot| slot.lock().state.clone()).collect();
        states.sort_by(|a, b| a.officer_id.cmp(&b.officer_id));
        states
    }

    pub fn contains(&self, officer_id: &str) -> bool {
        self.officers.read().contains_key(officer_id)
    }

    pub fn len(&self) -> usize {
        self.officers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.officers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vector3;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use std::thread;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn hr(officer: &str, secs: i64, bpm: f64) -> HeartRateSample {
        HeartRateSample {
            officer_id: officer.to_string(),
            value: bpm,
            timestamp: at(secs),
            confidence: 1.0,
            source: "test".to_string(),
            hrv_rmssd_ms: None,
        }
    }

    fn fix(officer: &str, secs: i64) -> LocationFix {
        LocationFix {
            officer_id: officer.to_string(),
            latitude: 40.0,
            longitude: -74.0,
            altitude: None,
            accuracy: 5.0,
            speed: None,
            heading: None,
            timestamp: at(secs),
        }
    }

    #[test]
    fn test_create_on_first_seen() {
        let store = LiveStateStore::default();
        assert!(matches!(store.get("A-1"), Err(MonitorError::OfficerNotFound(_))));

        let outcome = store.upsert("A-1", OfficerUpdate::default().with_heart_rate(hr("A-1", 0, 80.0)));
        assert!(outcome.created);
        assert!(outcome.changed);
        assert_eq!(outcome.applied, vec![Stream::Health]);
        assert_eq!(outcome.state.revision, 1);
        assert_eq!(store.get("A-1").unwrap().heart_rate.unwrap().value, 80.0);
    }

    #[test]
    fn test_stale_sample_leaves_state_unchanged() {
        let store = LiveStateStore::default();
        store.upsert("A-1", OfficerUpdate::default().with_heart_rate(hr("A-1", 10, 80.0)));
        let before = store.get("A-1").unwrap();

        let outcome = store.upsert("A-1", OfficerUpdate::default().with_heart_rate(hr("A-1", 10, 150.0)));
        assert!(!outcome.changed);
        assert_eq!(outcome.rejected, vec![Stream::Health]);

        let outcome = store.upsert("A-1", OfficerUpdate::default().with_heart_rate(hr("A-1", 5, 150.0)));
        assert!(!outcome.changed);
        assert_eq!(store.get("A-1").unwrap(), before);
    }

    #[test]
    fn test_streams_are_checked_independently() {
        let store = LiveStateStore::default();
        store.upsert(
            "A-1",
            OfficerUpdate::default()
                .with_heart_rate(hr("A-1", 10, 80.0))
                .with_location(fix("A-1", 10)),
        );

        // Old heart rate, new location
        let outcome = store.upsert(
            "A-1",
            OfficerUpdate::default()
                .with_heart_rate(hr("A-1", 5, 120.0))
                .with_location(fix("A-1", 20)),
        );
        assert_eq!(outcome.applied, vec![Stream::Location]);
        assert_eq!(outcome.rejected, vec![Stream::Health]);
        assert_eq!(outcome.state.heart_rate.unwrap().value, 80.0);
        assert_eq!(outcome.state.last_seen, Some(at(20)));
    }

    #[test]
    fn test_profile_update_and_presence() {
        let store = LiveStateStore::default();
        let profile = OfficerProfile {
            age: Some(35),
            ..Default::default()
        };
        let outcome = store.upsert("A-1", OfficerUpdate::default().with_profile(profile.clone()));
        assert_eq!(outcome.state.profile, profile);
        assert!(outcome.state.last_seen.is_none());

        let outcome = store.upsert("A-1", OfficerUpdate::default().seen_at(at(3)));
        assert_eq!(outcome.state.last_seen, Some(at(3)));

        // Same profile again changes nothing
        let outcome = store.upsert("A-1", OfficerUpdate::default().with_profile(profile));
        assert!(!outcome.changed);
    }

    #[test]
    fn test_motion_stream() {
        let store = LiveStateStore::default();
        let motion = MotionSample {
            officer_id: "A-1".to_string(),
            acceleration: Vector3::new(0.0, 0.0, 1.0),
            angular_rate: Vector3::default(),
            fall_detected: true,
            fall_confidence: 0.9,
            activity: None,
            activity_confidence: None,
            timestamp: at(1),
        };
        let outcome = store.upsert("A-1", OfficerUpdate::default().with_motion(motion));
        assert!(outcome.state.fall_detected());
    }

    #[test]
    fn test_list_is_sorted_snapshot() {
        let store = LiveStateStore::default();
        for id in ["C-3", "A-1", "B-2"] {
            store.upsert(id, OfficerUpdate::default().with_location(fix(id, 0)));
        }
        let ids: Vec<String> = store.list().into_iter().map(|s| s.officer_id).collect();
        assert_eq!(ids, vec!["A-1", "B-2", "C-3"]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_concurrent_updates_serialize_per_officer() {
        let store = Arc::new(LiveStateStore::default());
        let mut handles = Vec::new();

        for t in 0..8 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                let officer = format!("O-{}", t % 2);
                for i in 0..200 {
                    let secs = i * 8 + t;
                    let update = OfficerUpdate::default()
                        .with_heart_rate(hr(&officer, secs, 60.0 + (secs % 100) as f64))
                        .with_location(fix(&officer, secs));
                    store.upsert(&officer, update);
                }
            }));
        }

        let snapshot_store = store.clone();
        let reader = thread::spawn(move || {
            for _ in 0..50 {
                for state in snapshot_store.list() {
                    // Both streams of one update land together or not at all
                    let heart_rate = state.heart_rate.expect("heart rate");
                    let location = state.location.expect("location");
                    assert_eq!(heart_rate.timestamp, location.timestamp);
                    assert_eq!(state.last_seen, Some(location.timestamp));
                }
            }
        });

        for handle in handles {
            handle.join().unwrap();
        }
        reader.join().unwrap();

        let states = store.list();
        assert_eq!(states.len(), 2);
        for state in states {
            // The newest timestamp always wins, regardless of arrival order
            let latest = state.location.unwrap().timestamp;
            assert!(latest >= at(199 * 8));
            assert_eq!(state.heart_rate.unwrap().timestamp, latest);
            assert_eq!(state.last_seen, Some(latest));
        }
    }
}
