use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Timelike};
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::devices::types::{
    Device, DeviceRole, MIN_ORDER_ENERGY_KWH, OrderRequest, SlotContext, TradeSide,
    gaussian_noise,
};

/// Tolerance when checking a posted bid volume against the remaining requirement (kWh).
const BID_TOLERANCE_KWH: f64 = 1e-8;

/// Shape of a load's demand over the day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum LoadProfile {
    /// Constant `avg_power_w` during the listed hours of the day, zero otherwise.
    Hours {
        avg_power_w: f64,
        hours_of_day: Vec<u32>,
    },
    /// Daily sinusoid around `base_kw` with Gaussian noise.
    Sinusoidal {
        base_kw: f64,
        amp_kw: f64,
        #[serde(default)]
        phase_rad: f64,
        #[serde(default)]
        noise_std: f64,
    },
}

/// A consumer that bids for its demand every slot.
///
/// `LoadHoursStrategy` derives a desired energy per slot from its
/// [`LoadProfile`], tracks how much of it is still unmet, and bids the
/// remainder at a fixed `final_buying_rate`.
///
/// # Examples
///
/// ```
/// use area_market_sim::devices::load::{LoadHoursStrategy, LoadProfile};
/// use area_market_sim::devices::types::{Device, SlotContext};
///
/// let profile = LoadProfile::Hours { avg_power_w: 200.0, hours_of_day: (12..18).collect() };
/// let mut load = LoadHoursStrategy::new(profile, 35.0, 42);
/// let noon = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
///     .unwrap()
///     .and_hms_opt(12, 0, 0)
///     .unwrap();
/// load.market_cycle(&SlotContext::new(noon, 1.0));
/// assert_eq!(load.desired_energy_wh(noon), Some(200.0));
/// ```
#[derive(Debug, Clone)]
pub struct LoadHoursStrategy {
    /// Demand profile.
    pub profile: LoadProfile,

    /// Rate at which the remaining demand is bid (ct/kWh).
    pub final_buying_rate: f64,

    /// Random number generator for noise generation.
    rng: StdRng,

    desired_energy_wh: BTreeMap<NaiveDateTime, f64>,
    energy_requirement_wh: BTreeMap<NaiveDateTime, f64>,
    total_energy_demanded_wh: f64,
}

impl LoadHoursStrategy {
    /// Creates a new load.
    ///
    /// # Arguments
    ///
    /// * `profile` - Demand shape over the day
    /// * `final_buying_rate` - Bid rate in ct/kWh
    /// * `seed` - Random seed for reproducible noise generation
    ///
    /// # Panics
    ///
    /// Panics if the rate or a profile power is negative, or an hour is outside `0..24`.
    pub fn new(profile: LoadProfile, final_buying_rate: f64, seed: u64) -> Self {
        assert!(final_buying_rate >= 0.0, "final_buying_rate must be >= 0");
        match &profile {
            LoadProfile::Hours {
                avg_power_w,
                hours_of_day,
            } => {
                assert!(*avg_power_w >= 0.0, "avg_power_w must be >= 0");
                assert!(hours_of_day.iter().all(|h| *h < 24), "hours_of_day must be < 24");
            }
            LoadProfile::Sinusoidal {
                base_kw, noise_std, ..
            } => {
                assert!(*base_kw >= 0.0 && *noise_std >= 0.0);
            }
        }
        Self {
            profile,
            final_buying_rate,
            rng: StdRng::seed_from_u64(seed),
            desired_energy_wh: BTreeMap::new(),
            energy_requirement_wh: BTreeMap::new(),
            total_energy_demanded_wh: 0.0,
        }
    }

    /// Energy the load wanted for `time_slot` (Wh), if the slot has been cycled.
    pub fn desired_energy_wh(&self, time_slot: NaiveDateTime) -> Option<f64> {
        self.desired_energy_wh.get(&time_slot).copied()
    }

    /// Desired energy per cycled slot (Wh).
    pub fn desired_energy_history(&self) -> &BTreeMap<NaiveDateTime, f64> {
        &self.desired_energy_wh
    }

    /// Energy still unmet for `time_slot` (Wh); zero for unknown slots.
    pub fn energy_requirement_wh(&self, time_slot: NaiveDateTime) -> f64 {
        self.energy_requirement_wh
            .get(&time_slot)
            .copied()
            .unwrap_or(0.0)
    }

    /// Sum of desired energy over every slot cycled so far (Wh).
    pub fn total_energy_demanded_wh(&self) -> f64 {
        self.total_energy_demanded_wh
    }

    /// Whether a bid of `energy_kwh` fits next to `posted_kwh` already bid for `time_slot`.
    pub fn can_bid_be_posted(&self, energy_kwh: f64, posted_kwh: f64, time_slot: NaiveDateTime) -> bool {
        let required_kwh = self.energy_requirement_wh(time_slot) / 1000.0;
        posted_kwh + energy_kwh <= required_kwh + BID_TOLERANCE_KWH
    }

    fn demand_kw(&mut self, ctx: &SlotContext) -> f64 {
        match &self.profile {
            LoadProfile::Hours {
                avg_power_w,
                hours_of_day,
            } => {
                if hours_of_day.contains(&ctx.time_slot.hour()) {
                    avg_power_w / 1000.0
                } else {
                    0.0
                }
            }
            LoadProfile::Sinusoidal {
                base_kw,
                amp_kw,
                phase_rad,
                noise_std,
            } => {
                let day_pos = ctx.mid_slot_hour() / 24.0;
                let angle = 2.0 * std::f64::consts::PI * day_pos + phase_rad;
                let (base, amp, std) = (*base_kw, *amp_kw, *noise_std);
                let kw = base + amp * angle.sin() + gaussian_noise(&mut self.rng, std);
                kw.max(0.0) // no negative demand
            }
        }
    }
}

impl Device for LoadHoursStrategy {
    fn role(&self) -> DeviceRole {
        DeviceRole::Consumer
    }

    fn device_type(&self) -> &'static str {
        "Load"
    }

    fn market_cycle(&mut self, ctx: &SlotContext) {
        let desired_wh = self.demand_kw(ctx) * ctx.slot_hours * 1000.0;
        self.desired_energy_wh.insert(ctx.time_slot, desired_wh);
        self.energy_requirement_wh.insert(ctx.time_slot, desired_wh);
        self.total_energy_demanded_wh += desired_wh;
    }

    fn orders(&self, ctx: &SlotContext) -> Vec<OrderRequest> {
        let energy_kwh = self.energy_requirement_wh(ctx.time_slot) / 1000.0;
        if energy_kwh > MIN_ORDER_ENERGY_KWH {
            vec![OrderRequest::Bid {
                energy_kwh,
                rate: self.final_buying_rate,
            }]
        } else {
            Vec::new()
        }
    }

    fn on_trade(&mut self, ctx: &SlotContext, side: TradeSide, energy_kwh: f64) {
        if side == TradeSide::Bought {
            if let Some(req) = self.energy_requirement_wh.get_mut(&ctx.time_slot) {
                *req = (*req - energy_kwh * 1000.0).max(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(hour: u32) -> SlotContext {
        let slot = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap();
        SlotContext::new(slot, 1.0)
    }

    fn hours_load() -> LoadHoursStrategy {
        LoadHoursStrategy::new(
            LoadProfile::Hours {
                avg_power_w: 200.0,
                hours_of_day: (12..18).collect(),
            },
            35.0,
            42,
        )
    }

    #[test]
    fn hours_profile_only_demands_in_listed_hours() {
        let mut load = hours_load();
        load.market_cycle(&ctx(8));
        load.market_cycle(&ctx(12));
        assert_eq!(load.desired_energy_wh(ctx(8).time_slot), Some(0.0));
        assert_eq!(load.desired_energy_wh(ctx(12).time_slot), Some(200.0));
        assert_eq!(load.total_energy_demanded_wh(), 200.0);
        assert!(load.orders(&ctx(8)).is_empty());
    }

    #[test]
    fn bids_remaining_requirement() {
        let mut load = hours_load();
        let c = ctx(13);
        load.market_cycle(&c);
        load.on_trade(&c, TradeSide::Bought, 0.05);
        assert!((load.energy_requirement_wh(c.time_slot) - 150.0).abs() < 1e-9);
        match load.orders(&c).as_slice() {
            [OrderRequest::Bid { energy_kwh, rate }] => {
                assert!((energy_kwh - 0.15).abs() < 1e-12);
                assert_eq!(*rate, 35.0);
            }
            other => panic!("unexpected orders {other:?}"),
        }
    }

    #[test]
    fn selling_does_not_touch_requirement() {
        let mut load = hours_load();
        let c = ctx(13);
        load.market_cycle(&c);
        load.on_trade(&c, TradeSide::Sold, 0.1);
        assert_eq!(load.energy_requirement_wh(c.time_slot), 200.0);
    }

    #[test]
    fn can_bid_be_posted_respects_requirement() {
        let mut load = hours_load();
        let c = ctx(14);
        load.market_cycle(&c);
        assert!(load.can_bid_be_posted(0.2, 0.0, c.time_slot));
        assert!(load.can_bid_be_posted(0.1, 0.1, c.time_slot));
        assert!(!load.can_bid_be_posted(0.15, 0.1, c.time_slot));
    }

    #[test]
    fn sinusoidal_profile_is_non_negative_and_seeded() {
        let profile = LoadProfile::Sinusoidal {
            base_kw: 0.2,
            amp_kw: 1.0,
            phase_rad: 0.0,
            noise_std: 0.1,
        };
        let mut a = LoadHoursStrategy::new(profile.clone(), 30.0, 7);
        let mut b = LoadHoursStrategy::new(profile, 30.0, 7);
        for h in 0..24 {
            a.market_cycle(&ctx(h));
            b.market_cycle(&ctx(h));
            let wh = a.desired_energy_wh(ctx(h).time_slot).unwrap();
            assert!(wh >= 0.0);
            assert_eq!(Some(wh), b.desired_energy_wh(ctx(h).time_slot));
        }
    }

    #[test]
    #[should_panic]
    fn invalid_hour_panics() {
        LoadHoursStrategy::new(
            LoadProfile::Hours {
                avg_power_w: 100.0,
                hours_of_day: vec![24],
            },
            30.0,
            0,
        );
    }
}
