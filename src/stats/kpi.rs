//! Self-sufficiency and self-consumption KPIs per area.
//!
//! Each area with children gets a [`KpiState`] that lives for the whole run.
//! Devices below the area are classified once by [`DeviceRole`]; the markets
//! of every area that directly hosts a producer or consumer are then scanned
//! for trades, each settled market exactly once.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::area::{AreaId, AreaTree};
use crate::devices::DeviceRole;
use crate::market::Trade;

/// Running energy counters for one area.
#[derive(Debug, Clone, Default)]
pub struct KpiState {
    roles: BTreeMap<String, DeviceRole>,
    areas_to_trace: Vec<AreaId>,
    accounted_markets: HashMap<AreaId, BTreeSet<NaiveDateTime>>,
    total_energy_demanded_wh: f64,
    demanded_buffer_wh: f64,
    total_energy_produced_wh: f64,
    total_self_consumption_wh: f64,
    self_consumption_buffer_wh: f64,
}

impl KpiState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies every device below `area` and records the areas whose
    /// markets carry producer or consumer trades.
    ///
    /// Devices already classified keep their first role.
    pub fn accumulate_devices(&mut self, tree: &AreaTree, area: AreaId) {
        for &child in tree.area(area).children() {
            let node = tree.area(child);
            if let Some(strategy) = node.strategy() {
                let role = strategy.role();
                self.roles.entry(node.name().to_string()).or_insert(role);
                match role {
                    DeviceRole::Producer | DeviceRole::Consumer => {
                        if !self.areas_to_trace.contains(&area) {
                            self.areas_to_trace.push(area);
                        }
                    }
                    DeviceRole::Prosumer | DeviceRole::Buffer => {}
                }
            }
            if node.has_children() {
                self.accumulate_devices(tree, child);
            }
        }
    }

    /// Role recorded for `name`, if classified.
    pub fn role_of(&self, name: &str) -> Option<DeviceRole> {
        self.roles.get(name).copied()
    }

    /// Areas whose markets are scanned for trades, in discovery order.
    pub fn areas_to_trace(&self) -> &[AreaId] {
        &self.areas_to_trace
    }

    /// Time slots already folded for `area`.
    pub fn accounted_markets(&self, area: AreaId) -> Option<&BTreeSet<NaiveDateTime>> {
        self.accounted_markets.get(&area)
    }

    fn is(&self, name: &str, role: DeviceRole) -> bool {
        self.role_of(name) == Some(role)
    }

    fn accumulate_total_energy_demanded(&mut self, tree: &AreaTree, area: AreaId) {
        for &child in tree.area(area).children() {
            let node = tree.area(child);
            if let Some(load) = node.strategy().and_then(|s| s.as_load()) {
                self.total_energy_demanded_wh += load.total_energy_demanded_wh();
            }
            if node.has_children() {
                self.accumulate_total_energy_demanded(tree, child);
            }
        }
    }

    /// Applies the accounting rules to a single trade.
    ///
    /// Counters are in Wh. Rules run in a fixed order because the buffer
    /// outflow rules read the buffer written by the inflow rule.
    pub fn fold_trade(&mut self, trade: &Trade) {
        use DeviceRole::{Buffer, Consumer, Producer, Prosumer};

        let energy_wh = trade.offer.energy * 1000.0;
        let seller_origin = trade.seller_origin.as_str();
        let buyer_origin = trade.buyer_origin.as_str();
        let buyer_is_direct = buyer_origin == trade.buyer;

        // Only the market where the producer itself sold counts production.
        if self.is(seller_origin, Producer) && seller_origin == trade.seller {
            self.total_energy_produced_wh += energy_wh;
        }
        if self.is(seller_origin, Producer) && self.is(buyer_origin, Consumer) && buyer_is_direct {
            self.total_self_consumption_wh += energy_wh;
        }
        if self.is(seller_origin, Producer) && self.is(buyer_origin, Prosumer) {
            self.self_consumption_buffer_wh += energy_wh;
        }
        if self.is(seller_origin, Prosumer) && self.self_consumption_buffer_wh > 0.0 {
            if self.is(buyer_origin, Consumer) {
                if buyer_is_direct {
                    if self.self_consumption_buffer_wh - energy_wh > 0.0 {
                        self.self_consumption_buffer_wh -= energy_wh;
                        self.total_self_consumption_wh += energy_wh;
                    } else {
                        self.total_self_consumption_wh += self.self_consumption_buffer_wh;
                        self.self_consumption_buffer_wh = 0.0;
                    }
                }
            } else if !self.is(buyer_origin, Prosumer) {
                // Energy leaves the traced system, whichever market forwarded it.
                // Excess over the buffer is dropped.
                self.self_consumption_buffer_wh = (self.self_consumption_buffer_wh - energy_wh).max(0.0);
            }
        }
        if self.is(seller_origin, Buffer) && self.is(buyer_origin, Consumer) && buyer_is_direct {
            self.total_self_consumption_wh += energy_wh;
            self.total_energy_produced_wh += energy_wh;
        }
        if self.is(buyer_origin, Buffer) && self.is(seller_origin, Producer) {
            self.total_self_consumption_wh += energy_wh;
            self.demanded_buffer_wh += energy_wh;
        }
    }

    fn accumulate_energy_trace(&mut self, tree: &AreaTree) {
        for idx in 0..self.areas_to_trace.len() {
            let traced = self.areas_to_trace[idx];
            for market in tree.area(traced).past_markets() {
                let newly_seen = self
                    .accounted_markets
                    .entry(traced)
                    .or_default()
                    .insert(market.time_slot());
                if !newly_seen {
                    continue;
                }
                for trade in market.trades() {
                    self.fold_trade(trade);
                }
            }
        }
    }

    /// Re-sums demand from scratch and folds every not yet accounted market.
    pub fn update_area_kpi(&mut self, tree: &AreaTree, area: AreaId) {
        self.total_energy_demanded_wh = 0.0;
        self.accumulate_total_energy_demanded(tree, area);
        self.accumulate_energy_trace(tree);
    }

    /// Load demand plus energy absorbed by buffers (Wh).
    pub fn total_demand(&self) -> f64 {
        self.total_energy_demanded_wh + self.demanded_buffer_wh
    }

    pub fn total_energy_demanded_wh(&self) -> f64 {
        self.total_energy_demanded_wh
    }

    pub fn demanded_buffer_wh(&self) -> f64 {
        self.demanded_buffer_wh
    }

    pub fn total_energy_produced_wh(&self) -> f64 {
        self.total_energy_produced_wh
    }

    pub fn total_self_consumption_wh(&self) -> f64 {
        self.total_self_consumption_wh
    }

    pub fn self_consumption_buffer_wh(&self) -> f64 {
        self.self_consumption_buffer_wh
    }

    /// Raw KPI ratios derived from the current counters.
    pub fn record(&self) -> KpiRecord {
        let demand = self.total_demand();
        let consumed = self.total_self_consumption_wh;
        let produced = self.total_energy_produced_wh;
        KpiRecord {
            self_sufficiency: ratio(consumed, demand),
            self_consumption: ratio(consumed, produced),
            total_energy_demanded_wh: demand,
            total_energy_produced_wh: produced,
            total_self_consumption_wh: consumed,
        }
    }
}

/// `None` when the base is not positive, saturates at `1.0`.
fn ratio(part: f64, base: f64) -> Option<f64> {
    if base <= 0.0 {
        None
    } else if part >= base {
        Some(1.0)
    } else {
        Some(part / base)
    }
}

/// KPI ratios of one area; `None` where the ratio is undefined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiRecord {
    pub self_sufficiency: Option<f64>,
    pub self_consumption: Option<f64>,
    pub total_energy_demanded_wh: f64,
    pub total_energy_produced_wh: f64,
    pub total_self_consumption_wh: f64,
}

impl KpiRecord {
    /// Percentage view: ratios scaled by 100, undefined ratios shown as `0.0`.
    pub fn to_percentages(&self) -> KpiPercentages {
        KpiPercentages {
            self_sufficiency: self.self_sufficiency.map_or(0.0, |r| r * 100.0),
            self_consumption: self.self_consumption.map_or(0.0, |r| r * 100.0),
            total_energy_demanded_wh: self.total_energy_demanded_wh,
            total_energy_produced_wh: self.total_energy_produced_wh,
            total_self_consumption_wh: self.total_self_consumption_wh,
        }
    }
}

/// Display-ready KPI record with percentages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiPercentages {
    pub self_sufficiency: f64,
    pub self_consumption: f64,
    pub total_energy_demanded_wh: f64,
    pub total_energy_produced_wh: f64,
    pub total_self_consumption_wh: f64,
}

/// KPI cache for every area with children, keyed by name and by uuid.
#[derive(Debug, Clone, Default)]
pub struct Kpi {
    performance_indices: BTreeMap<String, KpiRecord>,
    performance_indices_by_uuid: BTreeMap<String, KpiPercentages>,
    states: HashMap<String, KpiState>,
}

impl Kpi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates and returns the KPI record of a single area.
    pub fn area_performance_indices(&mut self, tree: &AreaTree, area: AreaId) -> KpiRecord {
        let name = tree.area(area).name().to_string();
        let state = self.states.entry(name).or_default();
        state.accumulate_devices(tree, area);
        state.update_area_kpi(tree, area);
        state.record()
    }

    /// Recomputes `area` and every descendant that has children.
    pub fn update_kpis_from_area(&mut self, tree: &AreaTree, area: AreaId) {
        let record = self.area_performance_indices(tree, area);
        let node = tree.area(area);
        self.performance_indices_by_uuid
            .insert(node.uuid().to_string(), record.to_percentages());
        self.performance_indices
            .insert(node.name().to_string(), record);
        for &child in node.children() {
            if tree.area(child).has_children() {
                self.update_kpis_from_area(tree, child);
            }
        }
    }

    /// Raw records keyed by area name.
    pub fn performance_indices(&self) -> &BTreeMap<String, KpiRecord> {
        &self.performance_indices
    }

    /// Percentage records keyed by area uuid.
    pub fn performance_indices_by_uuid(&self) -> &BTreeMap<String, KpiPercentages> {
        &self.performance_indices_by_uuid
    }

    pub fn state(&self, area_name: &str) -> Option<&KpiState> {
        self.states.get(area_name)
    }
}
