use crate::devices::types::{
    Device, DeviceRole, MIN_ORDER_ENERGY_KWH, OrderRequest, SlotContext, TradeSide,
};

/// Dispatchable generator offering a fixed volume per slot.
#[derive(Debug, Clone)]
pub struct FinitePowerPlantStrategy {
    /// Constant output in kW.
    pub max_available_power_kw: f64,

    /// Offer rate in ct/kWh.
    pub energy_rate: f64,

    energy_per_slot_kwh: f64,
    available_kwh: f64,
}

impl FinitePowerPlantStrategy {
    /// # Panics
    ///
    /// Panics if power or rate is negative.
    pub fn new(max_available_power_kw: f64, energy_rate: f64) -> Self {
        assert!(max_available_power_kw >= 0.0 && energy_rate >= 0.0);
        Self {
            max_available_power_kw,
            energy_rate,
            energy_per_slot_kwh: 0.0,
            available_kwh: 0.0,
        }
    }

    /// Production of the current slot (kWh).
    pub fn energy_per_slot_kwh(&self) -> f64 {
        self.energy_per_slot_kwh
    }
}

impl Device for FinitePowerPlantStrategy {
    fn role(&self) -> DeviceRole {
        DeviceRole::Producer
    }

    fn device_type(&self) -> &'static str {
        "FinitePowerPlant"
    }

    fn market_cycle(&mut self, ctx: &SlotContext) {
        self.energy_per_slot_kwh = self.max_available_power_kw * ctx.slot_hours;
        self.available_kwh = self.energy_per_slot_kwh;
    }

    fn orders(&self, _ctx: &SlotContext) -> Vec<OrderRequest> {
        if self.available_kwh > MIN_ORDER_ENERGY_KWH {
            vec![OrderRequest::Offer {
                energy_kwh: self.available_kwh,
                rate: self.energy_rate,
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
