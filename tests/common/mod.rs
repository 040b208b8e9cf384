//! Shared test fixtures for integration tests.

#![allow(dead_code)]

use area_market_sim::aggregator::RecordingSink;
use area_market_sim::area::AreaTree;
use area_market_sim::config::ScenarioConfig;
use area_market_sim::devices::{
    CommercialProducerStrategy, FinitePowerPlantStrategy, LoadHoursStrategy, LoadProfile,
    PvStrategy, StorageStrategy, Strategy,
};
use area_market_sim::sim::Engine;
use area_market_sim::sim::types::SimConfig;
use chrono::NaiveDate;

/// One day of hourly slots starting 2024-01-01, seed 42.
pub fn default_config() -> SimConfig {
    SimConfig::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 60, 1, 42)
}

/// Engine over the built-in `default` preset.
pub fn default_engine() -> Engine<RecordingSink> {
    let (config, tree) = ScenarioConfig::default_preset().build().unwrap();
    Engine::new(config, tree, RecordingSink::new())
}

/// Load drawing `avg_power_w` around the clock, bidding at `rate`.
pub fn flat_load(avg_power_w: f64, rate: f64) -> Strategy {
    Strategy::Load(LoadHoursStrategy::new(
        LoadProfile::Hours {
            avg_power_w,
            hours_of_day: (0..24).collect(),
        },
        rate,
        0,
    ))
}

/// Grid > House { Load 500 W @ 30, Plant 0.25 kW @ 10 } + Producer @ 20.
///
/// Every hour the load buys half its demand from the plant inside the
/// house and the other half from the producer on the grid.
pub fn house_with_plant() -> AreaTree {
    let mut tree = AreaTree::new("Grid", Some("grid-uuid"));
    let root = tree.root();
    let house = tree.add_area(root, "House", Some("house-uuid"));
    tree.add_device(house, "Load", Some("load-uuid"), flat_load(500.0, 30.0));
    tree.add_device(
        house,
        "Plant",
        Some("plant-uuid"),
        Strategy::FinitePowerPlant(FinitePowerPlantStrategy::new(0.25, 10.0)),
    );
    tree.add_device(
        root,
        "Producer",
        Some("producer-uuid"),
        Strategy::CommercialProducer(CommercialProducerStrategy::new(20.0)),
    );
    tree
}

/// Grid > House { Load 300 W @ 30, Battery (buy 24, sell 25) } + Producer @ 20.
///
/// Every hour the battery sells to the load inside the house and recharges
/// from the producer on the grid.
pub fn house_with_battery() -> AreaTree {
    let mut tree = AreaTree::new("Grid", None);
    let root = tree.root();
    let house = tree.add_area(root, "House", None);
    tree.add_device(house, "Load", None, flat_load(300.0, 30.0));
    tree.add_device(
        house,
        "Battery",
        Some("battery-uuid"),
        Strategy::Storage(StorageStrategy::new(10.0, 0.5, 0.1, 5.0, (24.0, 25.0))),
    );
    tree.add_device(
        root,
        "Producer",
        None,
        Strategy::CommercialProducer(CommercialProducerStrategy::new(20.0)),
    );
    tree
}

/// Grid > House A { Load A @ 10 } + House B { Load B @ 40, PV } + Producer @ 30.
///
/// Load A bids below every offer and stays unmatched in every slot.
pub fn two_houses_one_starved() -> AreaTree {
    let mut tree = AreaTree::new("Grid", None);
    let root = tree.root();
    let house_a = tree.add_area(root, "House A", None);
    tree.add_device(house_a, "Load A", None, flat_load(300.0, 10.0));
    let house_b = tree.add_area(root, "House B", None);
    tree.add_device(house_b, "Load B", None, flat_load(300.0, 40.0));
    tree.add_device(
        house_b,
        "PV B",
        None,
        Strategy::Pv(PvStrategy::new(2.0, 6.0, 18.0, 0.0, 15.0, 1)),
    );
    tree.add_device(
        root,
        "Producer",
        None,
        Strategy::CommercialProducer(CommercialProducerStrategy::new(30.0)),
    );
    tree
}
