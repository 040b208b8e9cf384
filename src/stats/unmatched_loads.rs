//! Unmatched-load reports.
//!
//! A load is unmatched in a slot when what it bought falls short of what it
//! wanted by more than [`FLOATING_POINT_TOLERANCE`]. Per-load slot lists are
//! propagated upwards so every area carries the union of its subtree, then
//! bucketed by hour for display.
//!
//! Published reports are flat maps keyed by area name (or uuid). Every area
//! of the tree gets its own top-level entry whatever its depth; children are
//! never nested inside their parent's entry.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;

use crate::area::{AreaId, AreaTree};
use crate::market::Market;
use crate::sim::types::SimConfig;

/// Shortfall (Wh) above which a load slot counts as unmatched.
pub const FLOATING_POINT_TOLERANCE: f64 = 1e-8;

/// Timestamp format used in hover details.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Unmatched loads of one hour bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HoverInfo {
    pub unmatched_count: usize,
    /// Child name to formatted unmatched slot times; absent when nothing is unmatched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmatched_times: Option<BTreeMap<String, Vec<String>>>,
}

/// Hourly unmatched-load view of one area.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaUnmatchedLoads {
    #[serde(rename = "type")]
    pub area_type: String,
    pub unmatched_loads: BTreeMap<NaiveDateTime, HoverInfo>,
}

/// Area name (or uuid) to its hourly view.
pub type UnmatchedLoadsReport = BTreeMap<String, AreaUnmatchedLoads>;

/// Published view; `None` marks areas without any load below them.
pub type UnmatchedLoadsView = BTreeMap<String, Option<AreaUnmatchedLoads>>;

/// Node name to (child name to sorted unmatched slots of the child's subtree).
type SubtreeSlots = BTreeMap<String, BTreeMap<String, Vec<NaiveDateTime>>>;

/// Computes unmatched-load reports from the area tree.
#[derive(Debug, Clone)]
pub struct ExportUnmatchedLoads {
    hour_list: Vec<NaiveDateTime>,
    latest_time_slot: NaiveDateTime,
    keep_past_markets: bool,
    name_uuid_map: HashMap<String, String>,
    name_type_map: HashMap<String, String>,
    load_count: usize,
}

impl ExportUnmatchedLoads {
    pub fn new(tree: &AreaTree, config: &SimConfig) -> Self {
        let root = tree.area(tree.root());
        let hour_list = config.hour_list();
        let load_count = tree
            .devices()
            .into_iter()
            .filter(|&id| tree.area(id).strategy().and_then(|s| s.as_load()).is_some())
            .count();
        Self {
            latest_time_slot: config.start(),
            hour_list,
            keep_past_markets: config.keep_past_markets,
            name_uuid_map: HashMap::from([(root.name().to_string(), root.uuid().to_string())]),
            name_type_map: HashMap::from([(root.name().to_string(), root.display_type().to_string())]),
            load_count,
        }
    }

    /// Number of load devices anywhere in the tree.
    pub fn load_count(&self) -> usize {
        self.load_count
    }

    pub fn latest_time_slot(&self) -> NaiveDateTime {
        self.latest_time_slot
    }

    fn set_latest_time_slot(&mut self, tree: &AreaTree) {
        if let Some(market) = tree.area(tree.root()).current_market() {
            self.latest_time_slot = market.time_slot();
        } else if let Some(first) = self.hour_list.first() {
            self.latest_time_slot = *first;
        }
    }

    /// Builds the report keyed by area name and the same report keyed by uuid.
    ///
    /// With `all_past_markets` every retained market is scanned, otherwise
    /// only the most recent one.
    pub fn get_current_market_results(
        &mut self,
        tree: &AreaTree,
        all_past_markets: bool,
    ) -> (UnmatchedLoadsReport, UnmatchedLoadsReport) {
        self.set_latest_time_slot(tree);
        let mut slots = SubtreeSlots::new();
        self.expand_to_parents(tree, tree.root(), all_past_markets, &mut slots);

        let by_name: UnmatchedLoadsReport = slots
            .iter()
            .map(|(name, children)| {
                let view = AreaUnmatchedLoads {
                    area_type: self.name_type_map.get(name).cloned().unwrap_or_default(),
                    unmatched_loads: self.expand_to_hours(children),
                };
                (name.clone(), view)
            })
            .collect();
        let by_uuid = self.change_name_to_uuid(&by_name);
        (by_name, by_uuid)
    }

    /// Records the entry of `area` and returns the union of unmatched slots below it.
    fn expand_to_parents(
        &mut self,
        tree: &AreaTree,
        area: AreaId,
        all_past_markets: bool,
        out: &mut SubtreeSlots,
    ) -> Vec<NaiveDateTime> {
        let mut entry = BTreeMap::new();
        let mut union = Vec::new();
        for &child in tree.area(area).children() {
            let node = tree.area(child);
            self.name_uuid_map
                .insert(node.name().to_string(), node.uuid().to_string());
            self.name_type_map
                .insert(node.name().to_string(), node.display_type().to_string());
            let slots = if node.has_children() {
                self.expand_to_parents(tree, child, all_past_markets, out)
            } else if node.strategy().and_then(|s| s.as_load()).is_some() {
                let slots = unmatched_slots_of_load(tree, child, all_past_markets);
                out.insert(
                    node.name().to_string(),
                    BTreeMap::from([(node.name().to_string(), slots.clone())]),
                );
                slots
            } else {
                continue;
            };
            union.extend(slots.iter().copied());
            entry.insert(node.name().to_string(), slots);
        }
        if !entry.is_empty() {
            out.insert(tree.area(area).name().to_string(), entry);
        }
        union.sort();
        union.dedup();
        union
    }

    fn expand_to_hours(
        &self,
        children: &BTreeMap<String, Vec<NaiveDateTime>>,
    ) -> BTreeMap<NaiveDateTime, HoverInfo> {
        if self.keep_past_markets {
            self.hour_list
                .iter()
                .filter(|&&hour| hour <= self.latest_time_slot)
                .map(|&hour| (hour, hover_info(children, hour)))
                .collect()
        } else {
            BTreeMap::from([(
                self.latest_time_slot,
                hover_info(children, self.latest_time_slot),
            )])
        }
    }

    fn change_name_to_uuid(&self, report: &UnmatchedLoadsReport) -> UnmatchedLoadsReport {
        report
            .iter()
            .map(|(name, view)| {
                let key = self.name_uuid_map.get(name).unwrap_or(name).clone();
                (key, view.clone())
            })
            .collect()
    }
}

/// Slots in which the load `id` bought less than it wanted, sorted.
fn unmatched_slots_of_load(tree: &AreaTree, id: AreaId, all_past_markets: bool) -> Vec<NaiveDateTime> {
    let area = tree.area(id);
    let (Some(parent), Some(load)) = (tree.parent(id), area.strategy().and_then(|s| s.as_load()))
    else {
        return Vec::new();
    };
    let markets: Vec<&Market> = if all_past_markets {
        parent.past_markets().collect()
    } else {
        parent.current_market().into_iter().collect()
    };
    let mut slots: Vec<NaiveDateTime> = markets
        .into_iter()
        .filter(|market| {
            let desired_wh = load.desired_energy_wh(market.time_slot()).unwrap_or(0.0);
            let traded_kwh = market.traded_energy().get(area.name()).copied().unwrap_or(0.0);
            desired_wh + traded_kwh * 1000.0 > FLOATING_POINT_TOLERANCE
        })
        .map(Market::time_slot)
        .collect();
    slots.sort();
    slots.dedup();
    slots
}

fn same_hour(a: NaiveDateTime, b: NaiveDateTime) -> bool {
    a.year() == b.year() && a.month() == b.month() && a.day() == b.day() && a.hour() == b.hour()
}

/// Unmatched slots of each child that fall into the hour of `hour_time`.
fn hover_info(children: &BTreeMap<String, Vec<NaiveDateTime>>, hour_time: NaiveDateTime) -> HoverInfo {
    let mut times: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut count = 0;
    for (child, slots) in children {
        for slot in slots.iter().filter(|&&s| same_hour(s, hour_time)) {
            count += 1;
            times
                .entry(child.clone())
                .or_default()
                .push(slot.format(DATE_TIME_FORMAT).to_string());
        }
    }
    if times.is_empty() {
        HoverInfo::default()
    } else {
        HoverInfo {
            unmatched_count: count,
            unmatched_times: Some(times),
        }
    }
}

/// Total unmatched slots over the entries of the root's direct children.
pub fn total_unmatched_count(tree: &AreaTree, report: &UnmatchedLoadsReport) -> usize {
    tree.area(tree.root())
        .children()
        .iter()
        .filter_map(|&child| report.get(tree.area(child).name()))
        .flat_map(|view| view.unmatched_loads.values())
        .map(|info| info.unmatched_count)
        .sum()
}

/// Load devices whose most recent slot is unmatched.
pub fn unmatched_load_devices(tree: &AreaTree) -> usize {
    tree.devices()
        .into_iter()
        .filter(|&id| !unmatched_slots_of_load(tree, id, false).is_empty())
        .count()
}

/// Folds a new-cycle report into the accumulated view.
///
/// Unmatched times are unioned per device and counts recomputed, so a slot
/// already present is never counted twice.
pub fn merge_unmatched_load_results_to_global(
    current: &UnmatchedLoadsReport,
    global: &mut UnmatchedLoadsView,
) {
    for (area, view) in current {
        match global.get_mut(area) {
            Some(Some(existing)) => {
                for (hour, info) in &view.unmatched_loads {
                    merge_hover(existing.unmatched_loads.entry(*hour).or_default(), info);
                }
            }
            _ => {
                global.insert(area.clone(), Some(view.clone()));
            }
        }
    }
}

fn merge_hover(into: &mut HoverInfo, new: &HoverInfo) {
    let Some(new_times) = &new.unmatched_times else {
        return;
    };
    let times = into.unmatched_times.get_or_insert_with(BTreeMap::new);
    for (device, list) in new_times {
        let merged = times.entry(device.clone()).or_default();
        merged.extend(list.iter().cloned());
        merged.sort();
        merged.dedup();
    }
    into.unmatched_count = times.values().map(Vec::len).sum();
}

/// Running unmatched-load results, updated once per settled slot.
#[derive(Debug, Clone)]
pub struct MarketUnmatchedLoads {
    unmatched_loads: UnmatchedLoadsView,
    last_unmatched_loads: UnmatchedLoadsView,
    export_unmatched_loads: ExportUnmatchedLoads,
    keep_past_markets: bool,
}

impl MarketUnmatchedLoads {
    pub fn new(tree: &AreaTree, config: &SimConfig) -> Self {
        Self {
            unmatched_loads: UnmatchedLoadsView::new(),
            last_unmatched_loads: UnmatchedLoadsView::new(),
            export_unmatched_loads: ExportUnmatchedLoads::new(tree, config),
            keep_past_markets: config.keep_past_markets,
        }
    }

    /// Accumulated results keyed by area name.
    pub fn unmatched_loads(&self) -> &UnmatchedLoadsView {
        &self.unmatched_loads
    }

    /// Results of the latest update keyed by area uuid.
    pub fn last_unmatched_loads(&self) -> &UnmatchedLoadsView {
        &self.last_unmatched_loads
    }

    fn write_none_to_unmatched_loads(&mut self, tree: &AreaTree, area: AreaId) {
        for id in tree.subtree(area) {
            let node = tree.area(id);
            self.unmatched_loads.insert(node.name().to_string(), None);
            self.last_unmatched_loads.insert(node.uuid().to_string(), None);
        }
    }

    /// Recomputes the latest results and folds them into the accumulated view.
    pub fn update_unmatched_loads(&mut self, tree: &AreaTree) {
        if self.export_unmatched_loads.load_count() == 0 {
            self.write_none_to_unmatched_loads(tree, tree.root());
            return;
        }
        let (by_name, by_uuid) = self
            .export_unmatched_loads
            .get_current_market_results(tree, self.keep_past_markets);
        self.last_unmatched_loads = by_uuid.into_iter().map(|(k, v)| (k, Some(v))).collect();
        if self.keep_past_markets {
            self.unmatched_loads = by_name.into_iter().map(|(k, v)| (k, Some(v))).collect();
        } else {
            merge_unmatched_load_results_to_global(&by_name, &mut self.unmatched_loads);
        }
    }
}
