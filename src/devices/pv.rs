use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rand::{SeedableRng, rngs::StdRng};

use crate::devices::types::{
    Device, DeviceRole, MIN_ORDER_ENERGY_KWH, OrderRequest, SlotContext, TradeSide,
    daylight_frac, gaussian_noise,
};

/// A solar PV generator that sells its forecast production every slot.
///
/// `PvStrategy` creates a half-sine generation profile between sunrise and
/// sunset with configurable peak power and multiplicative noise, and offers
/// whatever it has not sold yet at `final_selling_rate`.
#[derive(Debug, Clone)]
pub struct PvStrategy {
    /// Maximum power output in kilowatts under ideal conditions.
    pub kw_peak: f64,

    /// Hour of day when generation starts (inclusive).
    pub sunrise_hour: f64,

    /// Hour of day when generation stops (exclusive).
    pub sunset_hour: f64,

    /// Standard deviation of the Gaussian noise as a fraction of output.
    pub noise_std: f64,

    /// Offer rate in ct/kWh.
    pub final_selling_rate: f64,

    /// Random number generator for noise generation.
    rng: StdRng,

    energy_production_forecast_kwh: BTreeMap<NaiveDateTime, f64>,
    available_kwh: f64,
}

impl PvStrategy {
    /// Creates a new PV generator.
    ///
    /// # Arguments
    ///
    /// * `kw_peak` - Peak output in kW (clamped to >= 0)
    /// * `sunrise_hour` - Start of generation, hour of day
    /// * `sunset_hour` - End of generation, hour of day
    /// * `noise_std` - Relative noise (e.g. 0.05 for +/-5% variation, clamped to >= 0)
    /// * `final_selling_rate` - Offer rate in ct/kWh
    /// * `seed` - Random seed for reproducible noise generation
    ///
    /// # Panics
    ///
    /// Panics if `sunrise_hour >= sunset_hour`, `sunset_hour > 24`, or the rate is negative.
    pub fn new(
        kw_peak: f64,
        sunrise_hour: f64,
        sunset_hour: f64,
        noise_std: f64,
        final_selling_rate: f64,
        seed: u64,
    ) -> Self {
        assert!(sunrise_hour >= 0.0 && sunrise_hour < sunset_hour && sunset_hour <= 24.0);
        assert!(final_selling_rate >= 0.0, "final_selling_rate must be >= 0");
        Self {
            kw_peak: kw_peak.max(0.0),
            sunrise_hour,
            sunset_hour,
            noise_std: noise_std.max(0.0),
            final_selling_rate,
            rng: StdRng::seed_from_u64(seed),
            energy_production_forecast_kwh: BTreeMap::new(),
            available_kwh: 0.0,
        }
    }

    /// Forecast production for `time_slot` (kWh), if the slot has been cycled.
    pub fn production_forecast_kwh(&self, time_slot: NaiveDateTime) -> Option<f64> {
        self.energy_production_forecast_kwh.get(&time_slot).copied()
    }

    /// Energy still unsold in the running slot (kWh).
    pub fn available_kwh(&self) -> f64 {
        self.available_kwh
    }
}

impl Device for PvStrategy {
    fn role(&self) -> DeviceRole {
        DeviceRole::Producer
    }

    fn device_type(&self) -> &'static str {
        "PV"
    }

    fn market_cycle(&mut self, ctx: &SlotContext) {
        let frac = daylight_frac(ctx.mid_slot_hour(), self.sunrise_hour, self.sunset_hour);
        let kw = if frac > 0.0 {
            let noise_mult = 1.0 + gaussian_noise(&mut self.rng, self.noise_std);
            (self.kw_peak * frac * noise_mult).max(0.0)
        } else {
            0.0
        };
        let forecast = kw * ctx.slot_hours;
        self.energy_production_forecast_kwh
            .insert(ctx.time_slot, forecast);
        self.available_kwh = forecast;
    }

    fn orders(&self, _ctx: &SlotContext) -> Vec<OrderRequest> {
        if self.available_kwh > MIN_ORDER_ENERGY_KWH {
            vec![OrderRequest::Offer {
                energy_kwh: self.available_kwh,
                rate: self.final_selling_rate,
            }]
        } else {
            Vec::new()
        }
    }

    fn on_trade(&mut self, _ctx: &SlotContext, side: TradeSide, energy_kwh: f64) {
        if side == TradeSide::Sold {
            self.available_kwh = (self.available_kwh - energy_kwh).max(0.0);
        }
    }
}
