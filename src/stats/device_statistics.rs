//! Per-device trade and state time series.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::area::{AreaId, AreaTree};
use crate::devices::Strategy;
use crate::market::Market;

pub const TRADE_PRICE_EUR: &str = "trade_price_eur";
pub const TRADE_ENERGY_KWH: &str = "trade_energy_kWh";
pub const SOLD_TRADE_ENERGY_KWH: &str = "sold_trade_energy_kWh";
pub const BOUGHT_TRADE_ENERGY_KWH: &str = "bought_trade_energy_kWh";
pub const PV_PRODUCTION_KWH: &str = "pv_production_kWh";
pub const SOC_HISTORY_PCT: &str = "soc_history_%";
pub const LOAD_PROFILE_KWH: &str = "load_profile_kWh";
pub const PRODUCTION_KWH: &str = "production_kWh";

/// Slot to value; `None` means no data for the slot.
pub type TimeSeries = BTreeMap<NaiveDateTime, Option<f64>>;

/// Metric key to series, including the derived `min_*`/`max_*` series.
pub type DeviceSeries = BTreeMap<String, TimeSeries>;

/// Time-series statistics for every device, keyed by device uuid.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatistics {
    device_stats: BTreeMap<String, DeviceSeries>,
    current_stats: BTreeMap<String, DeviceSeries>,
}

impl DeviceStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full history per device uuid.
    pub fn device_stats(&self) -> &BTreeMap<String, DeviceSeries> {
        &self.device_stats
    }

    /// Latest slot only per device uuid. Its min/max cover that slot alone, so
    /// they equal the value itself.
    pub fn current_stats(&self) -> &BTreeMap<String, DeviceSeries> {
        &self.current_stats
    }

    /// Appends the most recent settled slot of every device.
    ///
    /// Devices whose parent has no settled market yet are skipped.
    pub fn update(&mut self, tree: &AreaTree) {
        for id in tree.devices() {
            let Some(market) = tree.parent(id).and_then(|p| p.current_market()) else {
                continue;
            };
            let area = tree.area(id);
            let Some(strategy) = area.strategy() else {
                continue;
            };
            let observations = observe(tree, id, strategy, market);
            let slot = market.time_slot();

            let history = self.device_stats.entry(area.uuid().to_string()).or_default();
            let mut current = DeviceSeries::new();
            for (key, value) in observations {
                history.entry(key.to_string()).or_default().insert(slot, value);
                let latest = TimeSeries::from([(slot, value)]);
                let (latest_min, latest_max) = calc_min_max(&latest);
                current.insert(format!("min_{key}"), latest_min);
                current.insert(format!("max_{key}"), latest_max);
                current.insert(key.to_string(), latest);
                let (min, max) = calc_min_max(&history[key]);
                history.insert(format!("min_{key}"), min);
                history.insert(format!("max_{key}"), max);
            }
            self.current_stats.insert(area.uuid().to_string(), current);
        }
    }
}

/// Metric values of one device for the slot of `market`.
fn observe(
    tree: &AreaTree,
    id: AreaId,
    strategy: &Strategy,
    market: &Market,
) -> Vec<(&'static str, Option<f64>)> {
    let name = tree.area(id).name();
    let slot = market.time_slot();
    let mut observations = vec![(TRADE_PRICE_EUR, average_price_eur(market, name))];

    let (mut sold, mut bought) = (0.0, 0.0);
    for trade in market.trades() {
        if trade.seller == name {
            sold += trade.offer.energy;
        }
        if trade.buyer == name {
            bought += trade.offer.energy;
        }
    }
    match strategy {
        Strategy::InfiniteBus(_) => {
            observations.push((SOLD_TRADE_ENERGY_KWH, Some(sold)));
            observations.push((BOUGHT_TRADE_ENERGY_KWH, Some(bought)));
        }
        _ => observations.push((TRADE_ENERGY_KWH, Some(bought - sold))),
    }

    match strategy {
        Strategy::Pv(pv) => observations.push((
            PV_PRODUCTION_KWH,
            Some(pv.production_forecast_kwh(slot).unwrap_or(0.0)),
        )),
        Strategy::Storage(storage) => {
            observations.push((SOC_HISTORY_PCT, storage.soc_history_pct(slot)));
        }
        Strategy::Load(load) => observations.push((
            LOAD_PROFILE_KWH,
            Some(load.desired_energy_wh(slot).unwrap_or(0.0) / 1000.0),
        )),
        Strategy::FinitePowerPlant(plant) => {
            observations.push((PRODUCTION_KWH, Some(plant.energy_per_slot_kwh())));
        }
        Strategy::CommercialProducer(_) | Strategy::InfiniteBus(_) => {}
    }
    observations
}

/// Mean clearing rate of the device's trades in EUR/kWh.
fn average_price_eur(market: &Market, name: &str) -> Option<f64> {
    let rates: Vec<f64> = market
        .trades()
        .iter()
        .filter(|t| t.involves(name))
        .map(|t| t.energy_rate() / 100.0)
        .collect();
    if rates.is_empty() {
        None
    } else {
        Some(rates.iter().sum::<f64>() / rates.len() as f64)
    }
}

/// Minimum and maximum per time-of-day bucket (`HH:MM`), mapped back onto every slot.
///
/// `None` values are ignored; a bucket with no observations yields `None`.
pub fn calc_min_max(series: &TimeSeries) -> (TimeSeries, TimeSeries) {
    let mut buckets: BTreeMap<String, (Option<f64>, Option<f64>)> = BTreeMap::new();
    for (slot, value) in series {
        let bucket = buckets.entry(slot.format("%H:%M").to_string()).or_default();
        if let Some(v) = *value {
            bucket.0 = Some(bucket.0.map_or(v, |m| m.min(v)));
            bucket.1 = Some(bucket.1.map_or(v, |m| m.max(v)));
        }
    }
    let mut min = TimeSeries::new();
    let mut max = TimeSeries::new();
    for slot in series.keys() {
        let (lo, hi) = buckets
            .get(&slot.format("%H:%M").to_string())
            .copied()
            .unwrap_or_default();
        min.insert(*slot, lo);
        max.insert(*slot, hi);
    }
    (min, max)
}
