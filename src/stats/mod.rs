//! Post-settlement analytics: KPIs, unmatched loads, and device statistics.

pub mod device_statistics;
pub mod kpi;
pub mod unmatched_loads;

pub use device_statistics::DeviceStatistics;
pub use kpi::{Kpi, KpiPercentages, KpiRecord, KpiState};
pub use unmatched_loads::{
    AreaUnmatchedLoads, ExportUnmatchedLoads, HoverInfo, MarketUnmatchedLoads,
    UnmatchedLoadsReport, UnmatchedLoadsView, merge_unmatched_load_results_to_global,
    total_unmatched_count,
};
