//! REST API over the results of a finished run.
//!
//! Provides GET endpoints:
//! - `/state`: simulation config, root KPIs, and latest slot summary
//! - `/slots`: slot summaries with optional index range filtering
//! - `/kpi`: KPI records per area uuid
//! - `/unmatched-loads`: accumulated unmatched-load view per area name
//! - `/device-statistics/{uuid}`: full statistics of one device

mod handlers;
mod types;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tracing::info;

use crate::aggregator::EventSink;
use crate::sim::Engine;
use crate::sim::types::{SimConfig, SlotSummary};
use crate::stats::device_statistics::DeviceSeries;
use crate::stats::{KpiPercentages, UnmatchedLoadsView};

pub use types::{ErrorResponse, SlotQuery, StateResponse};

/// Immutable application state shared across all request handlers.
///
/// Constructed once after the simulation run completes and wrapped in
/// `Arc`; all data is read-only.
pub struct AppState {
    /// Simulation configuration used for this run.
    pub config: SimConfig,
    /// Uuid of the root area.
    pub root_uuid: String,
    /// Per-slot summaries.
    pub summaries: Vec<SlotSummary>,
    /// KPI percentages per area uuid.
    pub kpi: BTreeMap<String, KpiPercentages>,
    /// Accumulated unmatched loads per area name.
    pub unmatched_loads: UnmatchedLoadsView,
    /// Full statistics per device uuid.
    pub device_statistics: BTreeMap<String, DeviceSeries>,
}

impl AppState {
    /// Snapshots the results held by `engine`.
    pub fn from_engine<S: EventSink>(engine: &Engine<S>) -> Self {
        let tree = engine.tree();
        Self {
            config: engine.config().clone(),
            root_uuid: tree.area(tree.root()).uuid().to_string(),
            summaries: engine.summaries().to_vec(),
            kpi: engine.kpi().performance_indices_by_uuid().clone(),
            unmatched_loads: engine.unmatched_loads().unmatched_loads().clone(),
            device_statistics: engine.device_statistics().device_stats().clone(),
        }
    }
}

/// Builds the axum router with all API routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/state", get(handlers::get_state))
        .route("/slots", get(handlers::get_slots))
        .route("/kpi", get(handlers::get_kpi))
        .route("/unmatched-loads", get(handlers::get_unmatched_loads))
        .route(
            "/device-statistics/{uuid}",
            get(handlers::get_device_statistics),
        )
        .with_state(state)
}

/// Binds to the given address and serves the API.
///
/// # Errors
///
/// Returns an `io::Error` if the listener cannot bind or the server fails.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, app).await
}
