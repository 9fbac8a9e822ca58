//! Proximity alerting
//!
//! Finds officers close to a source officer and sends each of them an alert.
//! Distances use the haversine formula on a spherical Earth. Candidates come
//! from one store snapshot, so every distance is measured against the same
//! point in time.

use crate::config::ProximityConfig;
use crate::error::MonitorError;
use crate::fanout::{EventFanout, FeedMessage};
use crate::records::{Record, RecordLog};
use crate::schema::ValidationError;
use crate::store::LiveStateStore;
use crate::types::{AlertType, GeoPoint, OfficerState, SystemAlert};
use std::sync::Arc;

/// Mean Earth radius (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points (meters)
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Officers strictly inside `radius_m` of the source, nearest first.
///
/// The source itself and officers without a location are skipped.
pub fn officers_within(
    snapshot: &[OfficerState],
    source_officer_id: &str,
    radius_m: f64,
) -> Result<Vec<(String, f64)>, MonitorError> {
    if !(radius_m.is_finite() && radius_m > 0.0) {
        return Err(ValidationError::Invalid {
            field: "radius_m".to_string(),
            reason: format!("must be a positive number, got {}", radius_m),
        }
        .into());
    }

    let source = snapshot
        .iter()
        .find(|s| s.officer_id == source_officer_id)
        .ok_or_else(|| MonitorError::OfficerNotFound(source_officer_id.to_string()))?;
    let origin = source
        .location
        .as_ref()
        .map(GeoPoint::from)
        .ok_or_else(|| {
            MonitorError::Precondition(format!(
                "officer {} has no known location",
                source_officer_id
            ))
        })?;

    let mut nearby: Vec<(String, f64)> = snapshot
        .iter()
        .filter(|s| s.officer_id != source_officer_id)
        .filter_map(|s| {
            let fix = s.location.as_ref()?;
            let distance = haversine_m(origin, GeoPoint::from(fix));
            (distance < radius_m).then(|| (s.officer_id.clone(), distance))
        })
        .collect();

    nearby.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    Ok(nearby)
}

/// Sends "officer down" style alerts to nearby officers
#[derive(Debug)]
pub struct ProximityAlerter {
    store: Arc<LiveStateStore>,
    fanout: Arc<EventFanout>,
    records: Arc<dyn RecordLog>,
    config: ProximityConfig,
}

impl ProximityAlerter {
    pub fn new(
        store: Arc<LiveStateStore>,
        fanout: Arc<EventFanout>,
        records: Arc<dyn RecordLog>,
        config: ProximityConfig,
    ) -> Self {
        Self {
            store,
            fanout,
            records,
            config,
        }
    }

    pub fn config(&self) -> &ProximityConfig {
        &self.config
    }

    /// Alert every officer within `radius_m` of the source.
    ///
    /// Returns the alerted officer ids in ascending order.
    pub fn alert_nearby(
        &self,
        source_officer_id: &str,
        radius_m: f64,
        title: &str,
        message: &str,
    ) -> Result<Vec<String>, MonitorError> {
        let snapshot = self.store.list();
        let nearby = officers_within(&snapshot, source_officer_id, radius_m)?;

        let mut targets = Vec::with_capacity(nearby.len());
        for (officer_id, distance) in nearby {
            let alert = SystemAlert::new(AlertType::Proximity, self.config.severity, title, message)
                .for_officer(officer_id.clone())
                .from_source(source_officer_id);

            tracing::info!(
                alert_id = %alert.id,
                source_officer_id = %source_officer_id,
                officer_id = %officer_id,
                distance_m = distance,
                "Proximity alert raised"
            );

            if let Err(e) = self.records.append(Record::Alert(alert.clone())) {
                tracing::warn!(alert_id = %alert.id, error = %e, "Failed to record alert");
            }
            self.fanout.publish(FeedMessage::system_alert(alert));
            targets.push(officer_id);
        }

        targets.sort();
        Ok(targets)
    }

    /// Alert with the configured radius, title and message
    pub fn alert_nearby_with_defaults(&self, source_officer_id: &str) -> Result<Vec<String>, MonitorError> {
        let config = &self.config;
        self.alert_nearby(
            source_officer_id,
            config.default_radius_m,
            &config.default_title,
            &config.default_message,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::MemoryRecordLog;
    use crate::store::OfficerUpdate;
    use crate::types::LocationFix;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    /// Meters per degree of latitude on the model sphere
    const M_PER_DEG_LAT: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

    const ORIGIN: GeoPoint = GeoPoint {
        latitude: 40.7128,
        longitude: -74.0060,
    };

    fn north_of_origin(meters: f64) -> GeoPoint {
        GeoPoint {
            latitude: ORIGIN.latitude + meters / M_PER_DEG_LAT,
            longitude: ORIGIN.longitude,
        }
    }

    fn place(store: &LiveStateStore, id: &str, point: GeoPoint) {
        store.upsert(
            id,
            OfficerUpdate::default().with_location(LocationFix {
                officer_id: id.to_string(),
                latitude: point.latitude,
                longitude: point.longitude,
                altitude: None,
                accuracy: 5.0,
                speed: None,
                heading: None,
                timestamp: Utc::now(),
            }),
        );
    }

    fn setup() -> (Arc<LiveStateStore>, Arc<EventFanout>, Arc<MemoryRecordLog>, ProximityAlerter) {
        let store = Arc::new(LiveStateStore::default());
        let fanout = Arc::new(EventFanout::new(store.clone(), 16));
        let records = Arc::new(MemoryRecordLog::default());
        let alerter = ProximityAlerter::new(
            store.clone(),
            fanout.clone(),
            records.clone(),
            ProximityConfig::default(),
        );
        (store, fanout, records, alerter)
    }

    #[test]
    fn test_haversine_known_distances() {
        assert_eq!(haversine_m(ORIGIN, ORIGIN), 0.0);
        let d = haversine_m(ORIGIN, north_of_origin(100.0));
        assert!((d - 100.0).abs() < 0.01, "got {}", d);

        // One degree of longitude on the equator
        let a = GeoPoint { latitude: 0.0, longitude: 0.0 };
        let b = GeoPoint { latitude: 0.0, longitude: 1.0 };
        assert!((haversine_m(a, b) - M_PER_DEG_LAT).abs() < 0.01);
    }

    #[test]
    fn test_alerts_only_officers_inside_radius() {
        let (store, fanout, records, alerter) = setup();
        place(&store, "SRC", ORIGIN);
        place(&store, "A", north_of_origin(100.0));
        place(&store, "B", north_of_origin(500.0));
        store.upsert("C", OfficerUpdate::default().with_on_duty(true));
        let mut sub = fanout.subscribe();

        let targets = alerter.alert_nearby("SRC", 300.0, "Officer Down", "Assist needed nearby").unwrap();
        assert_eq!(targets, vec!["A".to_string()]);

        match sub.try_recv().unwrap() {
            FeedMessage::SystemAlert { alert, .. } => {
                assert_eq!(alert.officer_id.as_deref(), Some("A"));
                assert_eq!(alert.source_officer_id.as_deref(), Some("SRC"));
                assert_eq!(alert.alert_type, AlertType::Proximity);
                assert_eq!(alert.title, "Officer Down");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(sub.try_recv().is_none());
        assert_eq!(records.recent_alerts(10).unwrap().len(), 1);
    }

    #[test]
    fn test_radius_is_exclusive() {
        let snapshot = {
            let store = LiveStateStore::default();
            place(&store, "SRC", ORIGIN);
            place(&store, "EDGE", north_of_origin(100.0));
            store.list()
        };
        let distance = haversine_m(ORIGIN, GeoPoint::from(snapshot[0].location.as_ref().unwrap()));
        // Exactly at the computed distance: excluded
        assert!(officers_within(&snapshot, "SRC", distance).unwrap().is_empty());
        assert_eq!(officers_within(&snapshot, "SRC", distance + 0.001).unwrap().len(), 1);
    }

    #[test]
    fn test_source_without_location_is_precondition_error() {
        let (store, _, _, alerter) = setup();
        store.upsert("SRC", OfficerUpdate::default().with_on_duty(true));
        place(&store, "A", ORIGIN);

        let result = alerter.alert_nearby_with_defaults("SRC");
        assert!(matches!(result, Err(MonitorError::Precondition(_))));
    }

    #[test]
    fn test_unknown_source_and_bad_radius() {
        let (store, _, _, alerter) = setup();
        place(&store, "SRC", ORIGIN);
        assert!(matches!(
            alerter.alert_nearby_with_defaults("nobody"),
            Err(MonitorError::OfficerNotFound(_))
        ));
        assert!(matches!(
            alerter.alert_nearby("SRC", 0.0, "t", "m"),
            Err(MonitorError::Validation(_))
        ));
        assert!(matches!(
            alerter.alert_nearby("SRC", f64::NAN, "t", "m"),
            Err(MonitorError::Validation(_))
        ));
    }

    #[test]
    fn test_no_one_nearby() {
        let (store, fanout, _, alerter) = setup();
        place(&store, "SRC", ORIGIN);
        let mut sub = fanout.subscribe();
        assert!(alerter.alert_nearby_with_defaults("SRC").unwrap().is_empty());
        assert!(sub.try_recv().is_none());
    }
}
