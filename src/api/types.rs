//! API response and query types.

use serde::{Deserialize, Serialize};

use crate::sim::types::{SimConfig, SlotSummary};
use crate::stats::KpiPercentages;

/// Combined state response: config, root KPIs, and the latest slot.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub config: SimConfig,
    /// Number of settled slots.
    pub slot_count: usize,
    /// KPIs of the root area, if computed.
    pub kpi: Option<KpiPercentages>,
    /// Most recent slot summary.
    pub latest_slot: Option<SlotSummary>,
}

/// Optional range query parameters for the slots endpoint.
#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    /// Start slot index (inclusive).
    pub from: Option<usize>,
    /// End slot index (inclusive).
    pub to: Option<usize>,
}

/// Error response body for 4xx errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}
