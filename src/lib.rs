//! Fieldwatch - Live risk monitoring for first-responder telemetry
//!
//! Fieldwatch ingests heart-rate, motion and location telemetry from officers in
//! the field and keeps one authoritative live record per officer through a
//! deterministic path: validation → per-stream stale check → feature extraction
//! → weighted risk scoring → state commit → fan-out to observers.
//!
//! ## Modules
//!
//! - **Scoring**: `window`, `features`, `normalizer` and `scorer` turn a heart-rate
//!   window plus the latest motion and location into a [`RiskAssessment`]
//! - **Live state**: `store` holds officer records, `fanout` and `feed` deliver changes
//! - **Alerting**: `proximity` finds and alerts nearby officers
//! - **Service**: `pipeline` wires everything into [`Monitor`]; `api` exposes it over
//!   HTTP and WebSocket (feature `server`)

#[cfg(feature = "server")]
pub mod api;
pub mod config;
pub mod error;
pub mod fanout;
pub mod features;
pub mod feed;
pub mod normalizer;
pub mod pipeline;
pub mod proximity;
pub mod records;
pub mod schema;
pub mod scorer;
pub mod store;
pub mod types;
pub mod window;

pub use config::{FeedMode, MonitorConfig, WindowPolicy};
pub use error::MonitorError;
pub use fanout::{EventFanout, FanoutStats, FeedMessage, Subscription};
pub use features::FeatureExtractor;
pub use feed::{open_feed, EventSource, PullSource, PushSource};
pub use pipeline::{IngestOutcome, IngestStatus, ManualAlert, Monitor, MonitorHandle};
pub use proximity::{haversine_m, ProximityAlerter};
pub use records::{MemoryRecordLog, Record, RecordLog};
pub use scorer::RiskScorer;
pub use store::{LiveStateStore, OfficerUpdate, Stream, UpsertOutcome};
pub use types::{OfficerState, RiskAssessment, RiskEvent, RiskFeatures, RiskLevel, SystemAlert};

// Schema exports
pub use schema::{IngestAdapter, IngestRequest, ValidationError};

/// Crate version reported by the health endpoint and the CLI
pub const FIELDWATCH_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service name reported by the health endpoint
pub const SERVICE_NAME: &str = "fieldwatch";
