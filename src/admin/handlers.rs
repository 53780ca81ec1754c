use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::bridge::BridgeStatus;
use crate::events::filter::FilterChainStats;
use crate::events::types::RuntimeEvent;
use crate::recovery::state::RecoveryStatus;
use crate::resilience::circuit_breaker::BreakerSnapshot;
use crate::resilience::registry::RegistrySummary;

const DEFAULT_EVENT_LIMIT: usize = 50;

#[derive(Serialize)]
pub struct BreakersView {
    pub summary: RegistrySummary,
    pub breakers: Vec<BreakerSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub event_type: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct ResetOutcome {
    pub reset: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<BridgeStatus> {
    Json(state.bridge.status())
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<BreakersView> {
    let registry = state.bridge.breakers();
    Json(BreakersView {
        summary: registry.summary(),
        breakers: registry.snapshots(),
    })
}

pub async fn reset_breaker(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<BreakerSnapshot>, StatusCode> {
    let breaker = state
        .bridge
        .breakers()
        .get(&name)
        .ok_or(StatusCode::NOT_FOUND)?;
    breaker.reset();
    tracing::info!(breaker = %name, "Circuit breaker reset via admin API");
    Ok(Json(breaker.snapshot()))
}

/// Force a breaker open; calls are rejected until the open delay elapses.
pub async fn open_breaker(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<BreakerSnapshot>, StatusCode> {
    let breaker = state
        .bridge
        .breakers()
        .get(&name)
        .ok_or(StatusCode::NOT_FOUND)?;
    breaker.force_open();
    Ok(Json(breaker.snapshot()))
}

pub async fn close_breaker(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<BreakerSnapshot>, StatusCode> {
    let breaker = state
        .bridge
        .breakers()
        .get(&name)
        .ok_or(StatusCode::NOT_FOUND)?;
    breaker.force_close();
    Ok(Json(breaker.snapshot()))
}

pub async fn get_connection(State(state): State<AdminState>) -> Json<RecoveryStatus> {
    Json(state.bridge.recovery().status())
}

/// Leave the terminal Failed state and start reconnecting.
pub async fn reset_connection(State(state): State<AdminState>) -> Json<ResetOutcome> {
    let reset = state.bridge.recovery().reset();
    Json(ResetOutcome { reset })
}

pub async fn reset_metrics(State(state): State<AdminState>) -> StatusCode {
    state.bridge.recovery().reset_metrics();
    StatusCode::NO_CONTENT
}

pub async fn get_events(
    State(state): State<AdminState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<RuntimeEvent>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    Json(state.bridge.recent_events(query.event_type.as_deref(), limit))
}

pub async fn get_event_filters(State(state): State<AdminState>) -> Json<FilterChainStats> {
    Json(state.bridge.events().filters().stats())
}
