//! Axum request handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::fanout::FanoutStats;
use crate::pipeline::{IngestOutcome, ManualAlert, Monitor};
use crate::schema::IngestRequest;
use crate::types::{OfficerProfile, OfficerState, RiskEvent, RiskLevel, SystemAlert};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub officers: usize,
    pub subscribers: usize,
}

/// Filters for the officer listing
#[derive(Debug, Default, Deserialize)]
pub struct ListOfficersQuery {
    pub on_duty: Option<bool>,
    /// Only officers assessed at or above this level
    pub min_level: Option<RiskLevel>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OfficerListResponse {
    pub officers: Vec<OfficerState>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DutyRequest {
    pub on_duty: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RiskHistoryQuery {
    pub hours: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RiskHistoryResponse {
    pub officer_id: String,
    pub hours: i64,
    pub events: Vec<RiskEvent>,
}

/// Proximity alert request; omitted fields use configured defaults
#[derive(Debug, Serialize, Deserialize)]
pub struct NearbyAlertRequest {
    pub source_officer_id: String,
    pub radius_m: Option<f64>,
    pub title: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NearbyAlertResponse {
    pub source_officer_id: String,
    pub radius_m: f64,
    pub alerted_officers: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAlertsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertListResponse {
    pub alerts: Vec<SystemAlert>,
    pub total: usize,
}

/// Run a monitor call on the blocking pool.
///
/// Ingestion, snapshots and proximity lookups take the store's locks, so they
/// stay off the async workers.
pub(crate) async fn run_blocking<T, F>(monitor: &Arc<Monitor>, f: F) -> ApiResult<T>
where
    F: FnOnce(&Monitor) -> T + Send + 'static,
    T: Send + 'static,
{
    let monitor = Arc::clone(monitor);
    tokio::task::spawn_blocking(move || f(&monitor))
        .await
        .map_err(|e| ApiError::internal(format!("monitor task failed: {}", e)))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let monitor = state.monitor();
    Json(HealthResponse {
        status: "ok".to_string(),
        service: crate::SERVICE_NAME.to_string(),
        version: crate::FIELDWATCH_VERSION.to_string(),
        officers: monitor.officer_count(),
        subscribers: monitor.feed_stats().subscribers,
    })
}

/// Ingest one telemetry request.
///
/// Runs on the blocking pool, bounded by the configured ingestion timeout.
#[tracing::instrument(skip(state, request), fields(officer_id = %request.officer_id))]
pub async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<Json<IngestOutcome>> {
    let monitor = state.monitor();
    let timeout = monitor.config().server.ingest_timeout();
    let task = run_blocking(monitor, move |m| m.ingest(&request));

    let outcome = tokio::time::timeout(timeout, task)
        .await
        .map_err(|_| ApiError::ServiceUnavailable {
            message: format!("ingestion exceeded {} ms", timeout.as_millis()),
        })???;

    Ok(Json(outcome))
}

#[tracing::instrument(skip(state))]
pub async fn list_officers(
    State(state): State<AppState>,
    Query(query): Query<ListOfficersQuery>,
) -> ApiResult<Json<OfficerListResponse>> {
    let snapshot = run_blocking(state.monitor(), |m| m.snapshot()).await?;
    let officers: Vec<OfficerState> = snapshot
        .into_iter()
        .filter(|o| query.on_duty.map(|d| o.on_duty == d).unwrap_or(true))
        .filter(|o| match query.min_level {
            Some(min) => o.risk_level().map(|l| l >= min).unwrap_or(false),
            None => true,
        })
        .collect();

    let total = officers.len();
    Ok(Json(OfficerListResponse { officers, total }))
}

pub async fn get_officer(
    State(state): State<AppState>,
    Path(officer_id): Path<String>,
) -> ApiResult<Json<OfficerState>> {
    Ok(Json(state.monitor().get(&officer_id)?))
}

#[tracing::instrument(skip(state, profile))]
pub async fn update_profile(
    State(state): State<AppState>,
    Path(officer_id): Path<String>,
    Json(profile): Json<OfficerProfile>,
) -> ApiResult<Json<OfficerState>> {
    let officer = run_blocking(state.monitor(), move |m| m.update_profile(&officer_id, profile)).await??;
    Ok(Json(officer))
}

#[tracing::instrument(skip(state))]
pub async fn set_duty(
    State(state): State<AppState>,
    Path(officer_id): Path<String>,
    Json(request): Json<DutyRequest>,
) -> ApiResult<Json<OfficerState>> {
    let on_duty = request.on_duty;
    let officer = run_blocking(state.monitor(), move |m| m.set_on_duty(&officer_id, on_duty)).await??;
    Ok(Json(officer))
}

pub async fn risk_history(
    State(state): State<AppState>,
    Path(officer_id): Path<String>,
    Query(query): Query<RiskHistoryQuery>,
) -> ApiResult<Json<RiskHistoryResponse>> {
    let monitor = state.monitor();
    let hours = query
        .hours
        .unwrap_or(monitor.config().records.risk_history_hours);
    let events = monitor.risk_history(&officer_id, hours)?;
    Ok(Json(RiskHistoryResponse {
        officer_id,
        hours,
        events,
    }))
}

/// Alert every officer within the radius of the source officer
#[tracing::instrument(skip(state, request), fields(source_officer_id = %request.source_officer_id))]
pub async fn alert_nearby(
    State(state): State<AppState>,
    Json(request): Json<NearbyAlertRequest>,
) -> ApiResult<Json<NearbyAlertResponse>> {
    let monitor = state.monitor();
    let defaults = &monitor.config().proximity;
    let radius_m = request.radius_m.unwrap_or(defaults.default_radius_m);
    let title = request.title.unwrap_or_else(|| defaults.default_title.clone());
    let message = request.message.unwrap_or_else(|| defaults.default_message.clone());
    let source = request.source_officer_id.clone();

    let alerted_officers =
        run_blocking(monitor, move |m| m.alert_nearby(&source, radius_m, &title, &message)).await??;
    let count = alerted_officers.len();
    Ok(Json(NearbyAlertResponse {
        source_officer_id: request.source_officer_id,
        radius_m,
        alerted_officers,
        count,
    }))
}

#[tracing::instrument(skip(state, request))]
pub async fn raise_alert(
    State(state): State<AppState>,
    Json(request): Json<ManualAlert>,
) -> ApiResult<(StatusCode, Json<SystemAlert>)> {
    let alert = state.monitor().raise_alert(request)?;
    Ok((StatusCode::CREATED, Json(alert)))
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListAlertsQuery>,
) -> ApiResult<Json<AlertListResponse>> {
    let monitor = state.monitor();
    let limit = query
        .limit
        .unwrap_or(monitor.config().records.recent_alerts_limit);
    let alerts = monitor.recent_alerts(limit)?;
    let total = alerts.len();
    Ok(Json(AlertListResponse { alerts, total }))
}

pub async fn feed_stats(State(state): State<AppState>) -> Json<FanoutStats> {
    Json(state.monitor().feed_stats())
}
