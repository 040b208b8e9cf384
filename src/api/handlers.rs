//! Request handlers for the API endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::AppState;
use super::types::{ErrorResponse, SlotQuery, StateResponse};
use crate::sim::types::SlotSummary;
use crate::stats::KpiPercentages;
use crate::stats::device_statistics::DeviceSeries;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: String) -> ApiError {
    (status, Json(ErrorResponse { error: message }))
}

/// `GET /state` → 200 + `StateResponse` JSON
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    Json(StateResponse {
        config: state.config.clone(),
        slot_count: state.summaries.len(),
        kpi: state.kpi.get(&state.root_uuid).cloned(),
        latest_slot: state.summaries.last().cloned(),
    })
}

/// Returns slot summaries, optionally filtered by index range.
///
/// `GET /slots` → 200 + `Vec<SlotSummary>` JSON
/// `GET /slots?from=N&to=M` → filtered range (inclusive)
/// `GET /slots?from=10&to=5` → 400 + `ErrorResponse`
pub async fn get_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Vec<SlotSummary>>, ApiError> {
    let from = query.from.unwrap_or(0);
    let to = query.to.unwrap_or(usize::MAX);

    if from > to {
        return Err(error(
            StatusCode::BAD_REQUEST,
            format!("`from` ({from}) must be <= `to` ({to})"),
        ));
    }

    let slots = state
        .summaries
        .iter()
        .enumerate()
        .filter(|(i, _)| (from..=to).contains(i))
        .map(|(_, s)| s.clone())
        .collect();
    Ok(Json(slots))
}

/// `GET /kpi` → 200 + KPI percentages keyed by area uuid
pub async fn get_kpi(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<String, KpiPercentages>> {
    Json(state.kpi.clone())
}

/// `GET /unmatched-loads` → 200 + accumulated view keyed by area name
pub async fn get_unmatched_loads(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.unmatched_loads.clone())
}

/// `GET /device-statistics/{uuid}` → 200 + series, or 404 for an unknown device
pub async fn get_device_statistics(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<DeviceSeries>, ApiError> {
    state
        .device_statistics
        .get(&uuid)
        .cloned()
        .map(Json)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("no device with uuid `{uuid}`")))
}
