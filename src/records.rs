//! Record log
//!
//! The read/append boundary to durable storage. Accepted samples, risk events
//! and alerts are appended as they happen; the API reads back risk history and
//! recent alerts. The in-memory implementation keeps a bounded tail.

use crate::error::MonitorError;
use crate::types::{HeartRateSample, LocationFix, MotionSample, RiskEvent, SystemAlert};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Debug;

/// One appended record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Record {
    HeartRate(HeartRateSample),
    Motion(MotionSample),
    Location(LocationFix),
    RiskEvent(RiskEvent),
    Alert(SystemAlert),
}

/// Read/append interface to record storage
pub trait RecordLog: Send + Sync + Debug {
    fn append(&self, record: Record) -> Result<(), MonitorError>;

    /// Risk events for one officer at or after `since`, oldest first
    fn risk_events(&self, officer_id: &str, since: DateTime<Utc>) -> Result<Vec<RiskEvent>, MonitorError>;

    /// Up to `limit` alerts, newest first
    fn recent_alerts(&self, limit: usize) -> Result<Vec<SystemAlert>, MonitorError>;
}

/// Bounded in-memory record log
#[derive(Debug)]
pub struct MemoryRecordLog {
    records: RwLock<VecDeque<Record>>,
    max_records: usize,
}

impl Default for MemoryRecordLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MemoryRecordLog {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            max_records: max_records.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl RecordLog for MemoryRecordLog {
    fn append(&self, record: Record) -> Result<(), MonitorError> {
        let mut records = self.records.write();
        records.push_back(record);
        while records.len() > self.max_records {
            records.pop_front();
        }
        Ok(())
    }

    fn risk_events(&self, officer_id: &str, since: DateTime<Utc>) -> Result<Vec<RiskEvent>, MonitorError> {
        let records = self.records.read();
        let mut events: Vec<RiskEvent> = records
            .iter()
            .filter_map(|r| match r {
                Record::RiskEvent(e) if e.officer_id == officer_id && e.occurred_at >= since => Some(e.clone()),
                _ => None,
            })
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }

    fn recent_alerts(&self, limit: usize) -> Result<Vec<SystemAlert>, MonitorError> {
        let records = self.records.read();
        Ok(records
            .iter()
            .rev()
            .filter_map(|r| match r {
                Record::Alert(a) => Some(a.clone()),
                _ => None,
            })
            .take(limit)
            .collect())
    }
}
