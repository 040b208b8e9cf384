//! Core simulation types: timing configuration and per-slot summaries.

use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

/// Centralized simulation configuration.
///
/// Markets, devices, and the statistics engines reference this struct for
/// slot timing and history retention.
///
/// # Examples
///
/// ```
/// use area_market_sim::sim::types::SimConfig;
///
/// let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
/// let cfg = SimConfig::new(start, 60, 1, 42);
/// assert_eq!(cfg.slot_hours(), 1.0);
/// assert_eq!(cfg.total_slots(), 24);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct SimConfig {
    /// First day of the simulation (slots start at midnight).
    pub start_date: NaiveDate,
    /// Length of one market slot in minutes.
    pub slot_length_minutes: u32,
    /// Number of days to simulate.
    pub days: u32,
    /// Master random seed for reproducibility.
    pub seed: u64,
    /// Keep every past market (`true`) or only the most recent one (`false`).
    pub keep_past_markets: bool,
    /// Collaboration identifier used in aggregator channel names.
    pub collaboration_id: String,
    /// Capacity of each bounded aggregator event queue.
    pub event_queue_capacity: usize,
}

impl SimConfig {
    /// Creates a new simulation configuration keeping all past markets.
    ///
    /// # Panics
    ///
    /// Panics if `slot_length_minutes` or `days` is zero, or if the slot
    /// length does not divide a day evenly.
    pub fn new(start_date: NaiveDate, slot_length_minutes: u32, days: u32, seed: u64) -> Self {
        assert!(slot_length_minutes > 0, "slot_length_minutes must be > 0");
        assert!(days > 0, "days must be > 0");
        assert!(
            MINUTES_PER_DAY % slot_length_minutes == 0,
            "slot_length_minutes must divide a day"
        );
        Self {
            start_date,
            slot_length_minutes,
            days,
            seed,
            keep_past_markets: true,
            collaboration_id: "local".to_string(),
            event_queue_capacity: 4096,
        }
    }

    /// Returns a copy with the given past-market retention policy.
    pub fn with_keep_past_markets(mut self, keep: bool) -> Self {
        self.keep_past_markets = keep;
        self
    }

    /// Midnight of the first simulated day.
    pub fn start(&self) -> NaiveDateTime {
        self.start_date.and_time(NaiveTime::MIN)
    }

    /// Slot duration.
    pub fn slot_length(&self) -> Duration {
        Duration::minutes(i64::from(self.slot_length_minutes))
    }

    /// Slot duration in hours.
    pub fn slot_hours(&self) -> f64 {
        f64::from(self.slot_length_minutes) / 60.0
    }

    /// Number of slots per simulated day.
    pub fn slots_per_day(&self) -> usize {
        (MINUTES_PER_DAY / self.slot_length_minutes) as usize
    }

    /// Total number of slots across all days.
    pub fn total_slots(&self) -> usize {
        self.slots_per_day() * self.days as usize
    }

    /// Start time of slot `index`.
    pub fn slot_at(&self, index: usize) -> NaiveDateTime {
        self.start() + self.slot_length() * index as i32
    }

    /// Hourly timestamps covering the simulated period.
    ///
    /// Runs longer than one day get one entry per hour of every day;
    /// shorter runs get the 24 hours of the first day.
    pub fn hour_list(&self) -> Vec<NaiveDateTime> {
        let days = self.days.max(1);
        (0..days * 24)
            .map(|h| self.start() + Duration::hours(i64::from(h)))
            .collect()
    }
}

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Compact record of one settled slot, used for console output and CSV export.
#[derive(Debug, Clone, Serialize)]
pub struct SlotSummary {
    /// Slot start time.
    pub time_slot: NaiveDateTime,
    /// Trades recorded across every market of the tree, all hierarchy levels.
    pub trade_count: usize,
    /// Energy traded by device-level sellers (kWh), counted once per origin trade.
    pub traded_energy_kwh: f64,
    /// Average pay-as-bid clearing rate over device-level trades (ct/kWh).
    pub average_rate: Option<f64>,
    /// Load devices that missed their demand in this slot.
    pub unmatched_loads: usize,
    /// Root self-sufficiency after this slot (percent, 0 when undefined).
    pub self_sufficiency_pct: f64,
    /// Root self-consumption after this slot (percent, 0 when undefined).
    pub self_consumption_pct: f64,
}

impl fmt::Display for SlotSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = self
            .average_rate
            .map_or_else(|| "-".to_string(), |r| format!("{r:.2}"));
        write!(
            f,
            "{} | trades={:>3} energy={:>8.3} kWh rate={:>6} ct/kWh | \
             unmatched={:>2} | SS={:>5.1}% SC={:>5.1}%",
            self.time_slot.format("%Y-%m-%d %H:%M"),
            self.trade_count,
            self.traded_energy_kwh,
            rate,
            self.unmatched_loads,
            self.self_sufficiency_pct,
            self.self_consumption_pct,
        )
    }
}
