//! Grid connections: unlimited market makers at fixed rates.

use crate::devices::types::{Device, DeviceRole, OrderRequest, SlotContext, TradeSide, UNLIMITED_ENERGY_KWH};

/// Unlimited producer selling at a fixed rate.
#[derive(Debug, Clone)]
pub struct CommercialProducerStrategy {
    /// Offer rate in ct/kWh.
    pub energy_rate: f64,
}

impl CommercialProducerStrategy {
    pub fn new(energy_rate: f64) -> Self {
        assert!(energy_rate >= 0.0, "energy_rate must be >= 0");
        Self { energy_rate }
    }
}

impl Device for CommercialProducerStrategy {
    fn role(&self) -> DeviceRole {
        DeviceRole::Producer
    }

    fn device_type(&self) -> &'static str {
        "CommercialProducer"
    }

    fn market_cycle(&mut self, _ctx: &SlotContext) {}

    fn orders(&self, _ctx: &SlotContext) -> Vec<OrderRequest> {
        vec![OrderRequest::Offer {
            energy_kwh: UNLIMITED_ENERGY_KWH,
            rate: self.energy_rate,
        }]
    }

    fn on_trade(&mut self, _ctx: &SlotContext, _side: TradeSide, _energy_kwh: f64) {}
}

/// Unlimited source and sink: sells at `energy_sell_rate`, buys at `energy_buy_rate`.
#[derive(Debug, Clone)]
pub struct InfiniteBusStrategy {
    pub energy_sell_rate: f64,
    pub energy_buy_rate: f64,
}

impl InfiniteBusStrategy {
    /// # Panics
    ///
    /// Panics if a rate is negative or the buy rate exceeds the sell rate.
    pub fn new(energy_sell_rate: f64, energy_buy_rate: f64) -> Self {
        assert!(energy_buy_rate >= 0.0 && energy_buy_rate <= energy_sell_rate);
        Self {
            energy_sell_rate,
            energy_buy_rate,
        }
    }
}

impl Device for InfiniteBusStrategy {
    fn role(&self) -> DeviceRole {
        DeviceRole::Buffer
    }

    fn device_type(&self) -> &'static str {
        "InfiniteBus"
    }

    fn market_cycle(&mut self, _ctx: &SlotContext) {}

    fn orders(&self, _ctx: &SlotContext) -> Vec<OrderRequest> {
        vec![
            OrderRequest::Offer {
                energy_kwh: UNLIMITED_ENERGY_KWH,
                rate: self.energy_sell_rate,
            },
            OrderRequest::Bid {
                energy_kwh: UNLIMITED_ENERGY_KWH,
                rate: self.energy_buy_rate,
            },
        ]
    }

    fn on_trade(&mut self, _ctx: &SlotContext, _side: TradeSide, _energy_kwh: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SlotContext {
        let slot = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        SlotContext::new(slot, 1.0)
    }

    #[test]
    fn infinite_bus_posts_both_sides() {
        let bus = InfiniteBusStrategy::new(30.0, 10.0);
        assert_eq!(bus.role(), DeviceRole::Buffer);
        let orders = bus.orders(&ctx());
        assert_eq!(orders.len(), 2);
        assert!(matches!(orders[0], OrderRequest::Offer { rate, .. } if rate == 30.0));
        assert!(matches!(orders[1], OrderRequest::Bid { rate, .. } if rate == 10.0));
    }

    #[test]
    fn commercial_producer_is_a_producer() {
        let cp = CommercialProducerStrategy::new(25.0);
        assert_eq!(cp.role(), DeviceRole::Producer);
        assert_eq!(cp.orders(&ctx()).len(), 1);
    }

    #[test]
    #[should_panic]
    fn bus_with_inverted_rates_panics() {
        InfiniteBusStrategy::new(10.0, 30.0);
    }
}
