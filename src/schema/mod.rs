//! Ingestion schema
//!
//! This module defines the request clients submit with officer telemetry,
//! its validation bounds, and the adapter that splits a request into
//! per-stream samples.

mod adapter;
mod ingest;

pub use adapter::*;
pub use ingest::*;
