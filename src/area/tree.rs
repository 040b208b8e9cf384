//! Arena-backed area hierarchy.
//!
//! Areas refer to each other through [`AreaId`] indices into the arena, so
//! parent links never own their target and the tree has no reference cycles.

use std::collections::VecDeque;

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::devices::Strategy;
use crate::market::Market;

/// Opaque handle to an area inside an [`AreaTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AreaId(usize);

/// A node of the grid hierarchy: either an aggregating area with children and
/// a market, or a leaf device carrying a [`Strategy`].
#[derive(Debug)]
pub struct Area {
    name: String,
    uuid: String,
    parent: Option<AreaId>,
    children: Vec<AreaId>,
    strategy: Option<Strategy>,
    market: Option<Market>,
    past_markets: VecDeque<Market>,
}

impl Area {
    fn new(name: &str, uuid: Option<&str>, parent: Option<AreaId>, strategy: Option<Strategy>) -> Self {
        Self {
            name: name.to_string(),
            uuid: uuid.map_or_else(|| Uuid::new_v4().to_string(), str::to_string),
            parent,
            children: Vec::new(),
            strategy,
            market: None,
            past_markets: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn parent(&self) -> Option<AreaId> {
        self.parent
    }

    pub fn children(&self) -> &[AreaId] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn strategy(&self) -> Option<&Strategy> {
        self.strategy.as_ref()
    }

    pub fn strategy_mut(&mut self) -> Option<&mut Strategy> {
        self.strategy.as_mut()
    }

    /// Human-facing type label: the strategy kind for devices, `"Area"` otherwise.
    pub fn display_type(&self) -> &'static str {
        self.strategy.as_ref().map_or("Area", Strategy::display_type)
    }

    /// Market of the slot currently being traded, if one is open.
    pub fn market(&self) -> Option<&Market> {
        self.market.as_ref()
    }

    pub fn market_mut(&mut self) -> Option<&mut Market> {
        self.market.as_mut()
    }

    /// Settled markets, oldest first.
    pub fn past_markets(&self) -> impl DoubleEndedIterator<Item = &Market> + ExactSizeIterator {
        self.past_markets.iter()
    }

    /// Most recently settled market.
    pub fn current_market(&self) -> Option<&Market> {
        self.past_markets.back()
    }

    /// Settled market for `time_slot`, if still retained.
    pub fn past_market(&self, time_slot: NaiveDateTime) -> Option<&Market> {
        self.past_markets.iter().find(|m| m.time_slot() == time_slot)
    }
}

/// Ordered area hierarchy stored in an arena.
#[derive(Debug)]
pub struct AreaTree {
    areas: Vec<Area>,
    root: AreaId,
    keep_past_markets: bool,
}

impl AreaTree {
    /// Creates a tree holding only the root area.
    pub fn new(root_name: &str, root_uuid: Option<&str>) -> Self {
        Self {
            areas: vec![Area::new(root_name, root_uuid, None, None)],
            root: AreaId(0),
            keep_past_markets: true,
        }
    }

    /// Sets whether every settled market is retained or only the latest one.
    pub fn set_keep_past_markets(&mut self, keep: bool) {
        self.keep_past_markets = keep;
    }

    pub fn keep_past_markets(&self) -> bool {
        self.keep_past_markets
    }

    /// Adds an aggregating area under `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is a device.
    pub fn add_area(&mut self, parent: AreaId, name: &str, uuid: Option<&str>) -> AreaId {
        self.push(parent, Area::new(name, uuid, Some(parent), None))
    }

    /// Adds a device leaf under `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is a device.
    pub fn add_device(
        &mut self,
        parent: AreaId,
        name: &str,
        uuid: Option<&str>,
        strategy: Strategy,
    ) -> AreaId {
        self.push(parent, Area::new(name, uuid, Some(parent), Some(strategy)))
    }

    fn push(&mut self, parent: AreaId, area: Area) -> AreaId {
        assert!(
            self.area(parent).strategy.is_none(),
            "device `{}` cannot have children",
            self.area(parent).name
        );
        let id = AreaId(self.areas.len());
        self.areas.push(area);
        self.areas[parent.0].children.push(id);
        id
    }

    pub fn root(&self) -> AreaId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn area(&self, id: AreaId) -> &Area {
        &self.areas[id.0]
    }

    pub fn area_mut(&mut self, id: AreaId) -> &mut Area {
        &mut self.areas[id.0]
    }

    /// Parent area of `id`, `None` for the root.
    pub fn parent(&self, id: AreaId) -> Option<&Area> {
        self.area(id).parent.map(|p| self.area(p))
    }

    pub fn find_by_name(&self, name: &str) -> Option<AreaId> {
        self.areas.iter().position(|a| a.name == name).map(AreaId)
    }

    pub fn find_by_uuid(&self, uuid: &str) -> Option<AreaId> {
        self.areas.iter().position(|a| a.uuid == uuid).map(AreaId)
    }

    /// `id` and everything below it, parents before children.
    pub fn subtree(&self, id: AreaId) -> Vec<AreaId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.area(current).children.iter().rev().copied());
        }
        out
    }

    /// Every area, children before parents.
    pub fn post_order(&self) -> Vec<AreaId> {
        fn visit(tree: &AreaTree, id: AreaId, out: &mut Vec<AreaId>) {
            for &child in tree.area(id).children() {
                visit(tree, child, out);
            }
            out.push(id);
        }
        let mut out = Vec::with_capacity(self.areas.len());
        visit(self, self.root, &mut out);
        out
    }

    /// Device leaves in depth-first order.
    pub fn devices(&self) -> Vec<AreaId> {
        self.subtree(self.root)
            .into_iter()
            .filter(|&id| self.area(id).strategy.is_some())
            .collect()
    }

    /// Opens a fresh market for `time_slot` on every area that has children.
    pub fn open_markets(&mut self, time_slot: NaiveDateTime) {
        for area in &mut self.areas {
            if area.has_children() {
                area.market = Some(Market::new(time_slot));
            }
        }
    }

    /// Moves every open market into its area's history.
    ///
    /// With `keep_past_markets` disabled only the most recent market survives.
    pub fn close_markets(&mut self) {
        let keep = self.keep_past_markets;
        for area in &mut self.areas {
            if let Some(market) = area.market.take() {
                if !keep {
                    area.past_markets.clear();
                }
                area.past_markets.push_back(market);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{InfiniteBusStrategy, Strategy};

    fn slot(hour: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn sample_tree() -> (AreaTree, AreaId, AreaId) {
        let mut tree = AreaTree::new("Grid", Some("grid-uuid"));
        let root = tree.root();
        let house = tree.add_area(root, "House 1", None);
        let bus = tree.add_device(
            house,
            "Bus",
            None,
            Strategy::InfiniteBus(InfiniteBusStrategy::new(30.0, 10.0)),
        );
        (tree, house, bus)
    }

    #[test]
    fn parent_links_are_non_owning_indices() {
        let (tree, house, bus) = sample_tree();
        assert_eq!(tree.parent(bus).map(Area::name), Some("House 1"));
        assert_eq!(tree.area(house).parent(), Some(tree.root()));
        assert!(tree.parent(tree.root()).is_none());
        assert_eq!(tree.area(tree.root()).uuid(), "grid-uuid");
    }

    #[test]
    fn traversal_orders() {
        let (tree, house, bus) = sample_tree();
        assert_eq!(tree.subtree(tree.root()), vec![tree.root(), house, bus]);
        assert_eq!(tree.post_order(), vec![bus, house, tree.root()]);
        assert_eq!(tree.devices(), vec![bus]);
    }

    #[test]
    fn display_type_distinguishes_devices() {
        let (tree, house, bus) = sample_tree();
        assert_eq!(tree.area(house).display_type(), "Area");
        assert_eq!(tree.area(bus).display_type(), "InfiniteBus");
    }

    #[test]
    fn markets_open_only_on_aggregating_areas() {
        let (mut tree, house, bus) = sample_tree();
        tree.open_markets(slot(0));
        assert!(tree.area(house).market().is_some());
        assert!(tree.area(bus).market().is_none());
    }

    #[test]
    fn rolling_history_keeps_latest_market() {
        let (mut tree, house, _) = sample_tree();
        tree.set_keep_past_markets(false);
        for h in 0..3 {
            tree.open_markets(slot(h));
            tree.close_markets();
        }
        assert_eq!(tree.area(house).past_markets().len(), 1);
        assert_eq!(tree.area(house).current_market().map(Market::time_slot), Some(slot(2)));
    }

    #[test]
    fn full_history_keeps_all_markets() {
        let (mut tree, house, _) = sample_tree();
        for h in 0..3 {
            tree.open_markets(slot(h));
            tree.close_markets();
        }
        assert_eq!(tree.area(house).past_markets().len(), 3);
        assert!(tree.area(house).past_market(slot(1)).is_some());
    }

    #[test]
    #[should_panic]
    fn devices_cannot_have_children() {
        let (mut tree, _, bus) = sample_tree();
        tree.add_area(bus, "Nested", None);
    }
}
