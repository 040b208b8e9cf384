//! Common types and traits shared by the device strategies.

use chrono::{NaiveDateTime, Timelike};
use rand::{Rng, rngs::StdRng};

/// Energy volume posted by devices that model an unlimited source or sink (kWh).
pub const UNLIMITED_ENERGY_KWH: f64 = 1.0e6;

/// Residual energy below this value is not worth posting (kWh).
pub const MIN_ORDER_ENERGY_KWH: f64 = 1e-6;

/// Accounting role a device plays in KPI bookkeeping.
///
/// Assigned once per device from its strategy kind and matched exhaustively
/// wherever role-specific behaviour is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    /// Generates energy (PV, power plants, commercial producers).
    Producer,
    /// Consumes energy (loads).
    Consumer,
    /// Stores and releases energy (storage).
    Prosumer,
    /// Idealised unlimited source and sink (infinite bus).
    Buffer,
}

/// Slot information handed to strategies on every lifecycle call.
#[derive(Debug, Clone, Copy)]
pub struct SlotContext {
    pub time_slot: NaiveDateTime,
    pub slot_hours: f64,
}

impl SlotContext {
    pub fn new(time_slot: NaiveDateTime, slot_hours: f64) -> Self {
        Self {
            time_slot,
            slot_hours,
        }
    }

    /// Hour of day at the middle of the slot, as a fraction (e.g. `12.5`).
    pub fn mid_slot_hour(&self) -> f64 {
        f64::from(self.time_slot.num_seconds_from_midnight()) / 3600.0 + self.slot_hours / 2.0
    }
}

/// Order a strategy wants posted on its parent market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderRequest {
    Offer { energy_kwh: f64, rate: f64 },
    Bid { energy_kwh: f64, rate: f64 },
}

/// Which side of a trade the device was on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Sold,
    Bought,
}

/// Behaviour shared by every device strategy.
///
/// The engine drives each strategy through the same lifecycle per slot:
/// [`market_cycle`](Device::market_cycle), [`orders`](Device::orders),
/// [`on_trade`](Device::on_trade) for each of its own trades, then
/// [`market_closed`](Device::market_closed).
pub trait Device {
    /// KPI accounting role of this device.
    fn role(&self) -> DeviceRole;

    /// Returns a human-readable type name for the device.
    fn device_type(&self) -> &'static str;

    /// Prepares internal state for a newly opened slot.
    fn market_cycle(&mut self, ctx: &SlotContext);

    /// Orders to post on the parent market for the current slot.
    fn orders(&self, ctx: &SlotContext) -> Vec<OrderRequest>;

    /// Applies a settled trade in which this device was the direct party.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Slot being traded
    /// * `side` - Whether the device sold or bought
    /// * `energy_kwh` - Traded energy in kWh
    fn on_trade(&mut self, ctx: &SlotContext, side: TradeSide, energy_kwh: f64);

    /// Called once the slot's market has been settled and archived.
    fn market_closed(&mut self, _ctx: &SlotContext) {}
}

/// Utility function to generate Gaussian noise using Box-Muller transform.
///
/// # Arguments
///
/// * `rng` - Random number generator
/// * `std_dev` - Standard deviation of the noise
///
/// # Returns
///
/// Random value from a Gaussian distribution with mean 0 and specified standard deviation
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.random::<f64>().clamp(1e-9, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z0 * std_dev
}

/// Half-sine daylight shape between sunrise (inclusive) and sunset (exclusive).
///
/// Returns a value in `[0, 1]`, peaking at solar noon.
pub fn daylight_frac(hour: f64, sunrise_hour: f64, sunset_hour: f64) -> f64 {
    if hour < sunrise_hour || hour >= sunset_hour {
        return 0.0;
    }
    let x = (hour - sunrise_hour) / (sunset_hour - sunrise_hour);
    (std::f64::consts::PI * x).sin().max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn noise_is_zero_without_spread() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(gaussian_noise(&mut rng, 0.0), 0.0);
    }

    #[test]
    fn noise_is_reproducible() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            assert_eq!(gaussian_noise(&mut a, 0.3), gaussian_noise(&mut b, 0.3));
        }
    }

    #[test]
    fn daylight_shape() {
        assert_eq!(daylight_frac(3.0, 6.0, 18.0), 0.0);
        assert_eq!(daylight_frac(18.0, 6.0, 18.0), 0.0);
        assert!(daylight_frac(6.0, 6.0, 18.0) < 0.1);
        assert!(daylight_frac(12.0, 6.0, 18.0) > 0.99);
        assert!((daylight_frac(9.0, 6.0, 18.0) - daylight_frac(15.0, 6.0, 18.0)).abs() < 1e-9);
    }

    #[test]
    fn mid_slot_hour_accounts_for_slot_length() {
        let slot = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(SlotContext::new(slot, 1.0).mid_slot_hour(), 12.5);
        assert_eq!(SlotContext::new(slot, 0.25).mid_slot_hour(), 12.125);
    }
}
