//! Property tests for market and analytics invariants.
//!
//! 1. Clearing never trades below an offer's rate or above the posted volume
//! 2. KPI buffer accounting stays within [0, produced] and counters only grow
//! 3. Unmatched loads of an area are also unmatched in every ancestor

mod common;

use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;

use area_market_sim::aggregator::RecordingSink;
use area_market_sim::area::AreaTree;
use area_market_sim::devices::{
    CommercialProducerStrategy, InfiniteBusStrategy, StorageStrategy, Strategy as DeviceStrategy,
};
use area_market_sim::market::{Offer, Trade, clear_markets};
use area_market_sim::sim::Engine;
use area_market_sim::stats::KpiState;

fn slot() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_energy() -> impl Strategy<Value = f64> {
    (0.01..5.0_f64).prop_map(|e| (e * 1000.0).round() / 1000.0)
}

fn arb_rate() -> impl Strategy<Value = f64> {
    (1.0..50.0_f64).prop_map(|r| (r * 100.0).round() / 100.0)
}

fn arb_orders() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((arb_energy(), arb_rate()), 1..6)
}

// ── 1. Clearing bounds ───────────────────────────────────────────────

proptest! {
    /// Every trade clears at or above the offer's rate, and no party trades
    /// more than it posted.
    #[test]
    fn clearing_respects_rates_and_volumes(bids in arb_orders(), offers in arb_orders()) {
        let mut tree = AreaTree::new("Grid", None);
        let root = tree.root();
        tree.add_device(
            root,
            "Bus",
            None,
            DeviceStrategy::InfiniteBus(InfiniteBusStrategy::new(30.0, 10.0)),
        );
        tree.open_markets(slot());
        let market = tree.area_mut(root).market_mut().unwrap();
        for (i, (energy, rate)) in bids.iter().enumerate() {
            let name = format!("Buyer {i}");
            market.post_bid(energy * rate, *energy, &name, &name).unwrap();
        }
        for (i, (energy, rate)) in offers.iter().enumerate() {
            let name = format!("Seller {i}");
            market.post_offer(energy * rate, *energy, &name, &name).unwrap();
        }

        let trades = clear_markets(&mut tree).unwrap();

        let bid_total: f64 = bids.iter().map(|(e, _)| e).sum();
        let offer_total: f64 = offers.iter().map(|(e, _)| e).sum();
        let traded: f64 = trades.iter().map(|t| t.offer.energy).sum();
        prop_assert!(traded <= bid_total.min(offer_total) + 1e-9);

        for trade in &trades {
            let seller: usize = trade.seller["Seller ".len()..].parse().unwrap();
            let buyer: usize = trade.buyer["Buyer ".len()..].parse().unwrap();
            prop_assert!(trade.energy_rate() + 1e-9 >= offers[seller].1);
            prop_assert!((trade.energy_rate() - bids[buyer].1).abs() < 1e-9);
        }
        for (i, (energy, _)) in bids.iter().enumerate() {
            let name = format!("Buyer {i}");
            let bought: f64 = trades.iter().filter(|t| t.buyer == name).map(|t| t.offer.energy).sum();
            prop_assert!(bought <= energy + 1e-9);
        }
    }
}

// ── 2. KPI buffer accounting ─────────────────────────────────────────

/// Grid > House { Load, Battery, PV-like producer } + Bus.
fn kpi_state() -> KpiState {
    let mut tree = AreaTree::new("Grid", None);
    let root = tree.root();
    let house = tree.add_area(root, "House", None);
    tree.add_device(house, "Load", None, common::flat_load(100.0, 30.0));
    tree.add_device(
        house,
        "Battery",
        None,
        DeviceStrategy::Storage(StorageStrategy::new(10.0, 0.5, 0.1, 5.0, (24.0, 25.0))),
    );
    tree.add_device(
        house,
        "Producer",
        None,
        DeviceStrategy::CommercialProducer(CommercialProducerStrategy::new(20.0)),
    );
    tree.add_device(
        root,
        "Bus",
        None,
        DeviceStrategy::InfiniteBus(InfiniteBusStrategy::new(30.0, 10.0)),
    );
    let mut state = KpiState::new();
    state.accumulate_devices(&tree, root);
    state
}

const PARTIES: [&str; 5] = ["Load", "Battery", "Producer", "Bus", "House"];

fn arb_trade() -> impl Strategy<Value = Trade> {
    (0..PARTIES.len(), 0..PARTIES.len(), arb_energy(), any::<bool>())
        .prop_filter("distinct parties", |(s, b, _, _)| s != b)
        .prop_map(|(s, b, energy, direct)| {
            let seller = PARTIES[s].to_string();
            let buyer_origin = PARTIES[b].to_string();
            let buyer = if direct { buyer_origin.clone() } else { "House".to_string() };
            Trade {
                id: format!("{seller}->{buyer_origin}"),
                time_slot: slot(),
                offer: Offer {
                    id: "offer".into(),
                    price: energy * 20.0,
                    energy,
                    seller: seller.clone(),
                    seller_origin: seller.clone(),
                },
                seller: seller.clone(),
                buyer,
                seller_origin: seller,
                buyer_origin,
            }
        })
}

proptest! {
    /// The self-consumption buffer never goes negative nor exceeds what was
    /// produced, and the running totals never decrease, whatever the trade order.
    #[test]
    fn kpi_buffer_never_negative(trades in prop::collection::vec(arb_trade(), 0..40)) {
        let mut state = kpi_state();
        let mut last_sc = 0.0;
        let mut last_produced = 0.0;
        for trade in &trades {
            state.fold_trade(trade);
            prop_assert!(state.self_consumption_buffer_wh() >= 0.0);
            prop_assert!(
                state.self_consumption_buffer_wh() <= state.total_energy_produced_wh() + 1e-6
            );
            prop_assert!(state.total_self_consumption_wh() >= last_sc);
            prop_assert!(state.total_energy_produced_wh() >= last_produced);
            last_sc = state.total_self_consumption_wh();
            last_produced = state.total_energy_produced_wh();
        }
        let folded_wh: f64 = trades.iter().map(|t| t.offer.energy * 1000.0).sum();
        prop_assert!(state.total_self_consumption_wh() <= folded_wh + 1e-6);
    }
}

// ── 3. Unmatched loads propagate upwards ─────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any hour in which a house reports unmatched loads is also reported by
    /// the grid, with at least the same count.
    #[test]
    fn ancestors_include_child_unmatched_loads(
        rates in prop::collection::vec(arb_rate(), 1..4),
        producer_rate in arb_rate(),
    ) {
        prop_assume!(rates.iter().all(|r| (r - producer_rate).abs() > 0.005));
        let mut tree = AreaTree::new("Grid", None);
        let root = tree.root();
        let house = tree.add_area(root, "House", None);
        for (i, rate) in rates.iter().enumerate() {
            tree.add_device(house, &format!("Load {i}"), None, common::flat_load(200.0, *rate));
        }
        tree.add_device(
            root,
            "Producer",
            None,
            DeviceStrategy::CommercialProducer(CommercialProducerStrategy::new(producer_rate)),
        );

        let mut engine = Engine::new(common::default_config(), tree, RecordingSink::new());
        let summaries = engine.run().unwrap();
        let expected = rates.iter().filter(|r| **r < producer_rate).count();
        prop_assert!(summaries.iter().all(|s| s.unmatched_loads == expected));

        let view = engine.unmatched_loads().unmatched_loads();
        let grid = view["Grid"].as_ref().unwrap();
        let house = view["House"].as_ref().unwrap();
        for (hour, info) in &house.unmatched_loads {
            let upper = grid.unmatched_loads.get(hour).map_or(0, |i| i.unmatched_count);
            prop_assert!(upper >= info.unmatched_count);
        }
    }
}
