use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::devices::types::{
    Device, DeviceRole, MIN_ORDER_ENERGY_KWH, OrderRequest, SlotContext, TradeSide,
};

/// A battery that trades around a pair of break-even rates.
///
/// `StorageStrategy` offers its usable charge at the break-even sell rate and
/// bids for free capacity at the break-even buy rate, both bounded by the
/// power limit per slot. SOC never drops below `min_allowed_soc`.
#[derive(Debug, Clone)]
pub struct StorageStrategy {
    /// Battery capacity in kilowatt-hours.
    pub capacity_kwh: f64,

    /// Maximum charge or discharge power in kilowatts.
    pub max_abs_power_kw: f64,

    /// Lowest state of charge the strategy will sell down to (fraction).
    pub min_allowed_soc: f64,

    /// Highest rate at which the storage buys (ct/kWh).
    pub break_even_buy: f64,

    /// Lowest rate at which the storage sells (ct/kWh).
    pub break_even_sell: f64,

    /// State of charge as a fraction (0.0 to 1.0).
    soc: f64,

    sold_kwh: f64,
    bought_kwh: f64,
    charge_history: BTreeMap<NaiveDateTime, f64>,
}

impl StorageStrategy {
    /// Creates a new storage.
    ///
    /// # Arguments
    ///
    /// * `capacity_kwh` - Battery capacity in kWh (must be > 0)
    /// * `initial_soc` - Initial state of charge as a fraction
    /// * `min_allowed_soc` - SOC floor as a fraction
    /// * `max_abs_power_kw` - Power limit in kW
    /// * `break_even` - `(buy, sell)` rates in ct/kWh
    ///
    /// # Panics
    ///
    /// Panics if capacity or power is not positive, SOCs are out of range,
    /// or the buy rate exceeds the sell rate.
    pub fn new(
        capacity_kwh: f64,
        initial_soc: f64,
        min_allowed_soc: f64,
        max_abs_power_kw: f64,
        break_even: (f64, f64),
    ) -> Self {
        assert!(capacity_kwh > 0.0);
        assert!(max_abs_power_kw > 0.0);
        assert!((0.0..=1.0).contains(&min_allowed_soc));
        assert!((min_allowed_soc..=1.0).contains(&initial_soc));
        let (break_even_buy, break_even_sell) = break_even;
        assert!(
            break_even_buy >= 0.0 && break_even_buy <= break_even_sell,
            "break-even buy rate must not exceed sell rate"
        );
        Self {
            capacity_kwh,
            max_abs_power_kw,
            min_allowed_soc,
            break_even_buy,
            break_even_sell,
            soc: initial_soc,
            sold_kwh: 0.0,
            bought_kwh: 0.0,
            charge_history: BTreeMap::new(),
        }
    }

    pub fn soc(&self) -> f64 {
        self.soc
    }

    /// SOC at the end of `time_slot` in percent.
    pub fn soc_history_pct(&self, time_slot: NaiveDateTime) -> Option<f64> {
        self.charge_history.get(&time_slot).copied()
    }

    fn sellable_kwh(&self, ctx: &SlotContext) -> f64 {
        let power_budget = self.max_abs_power_kw * ctx.slot_hours - self.sold_kwh;
        let stored = (self.soc - self.min_allowed_soc) * self.capacity_kwh;
        power_budget.min(stored).max(0.0)
    }

    fn buyable_kwh(&self, ctx: &SlotContext) -> f64 {
        let power_budget = self.max_abs_power_kw * ctx.slot_hours - self.bought_kwh;
        let free = (1.0 - self.soc) * self.capacity_kwh;
        power_budget.min(free).max(0.0)
    }
}

impl Device for StorageStrategy {
    fn role(&self) -> DeviceRole {
        DeviceRole::Prosumer
    }

    fn device_type(&self) -> &'static str {
        "Storage"
    }

    fn market_cycle(&mut self, _ctx: &SlotContext) {
        self.sold_kwh = 0.0;
        self.bought_kwh = 0.0;
    }

    fn orders(&self, ctx: &SlotContext) -> Vec<OrderRequest> {
        let mut orders = Vec::with_capacity(2);
        let sell = self.sellable_kwh(ctx);
        if sell > MIN_ORDER_ENERGY_KWH {
            orders.push(OrderRequest::Offer {
                energy_kwh: sell,
                rate: self.break_even_sell,
            });
        }
        let buy = self.buyable_kwh(ctx);
        if buy > MIN_ORDER_ENERGY_KWH {
            orders.push(OrderRequest::Bid {
                energy_kwh: buy,
                rate: self.break_even_buy,
            });
        }
        orders
    }

    fn on_trade(&mut self, _ctx: &SlotContext, side: TradeSide, energy_kwh: f64) {
        match side {
            TradeSide::Sold => {
                self.sold_kwh += energy_kwh;
                self.soc -= energy_kwh / self.capacity_kwh;
            }
            TradeSide::Bought => {
                self.bought_kwh += energy_kwh;
                self.soc += energy_kwh / self.capacity_kwh;
            }
        }
        self.soc = self.soc.clamp(0.0, 1.0);
    }

    fn market_closed(&mut self, ctx: &SlotContext) {
        self.charge_history.insert(ctx.time_slot, self.soc * 100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SlotContext {
        let slot = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        SlotContext::new(slot, 0.25)
    }

    #[test]
    #[should_panic]
    fn test_invalid_capacity() {
        StorageStrategy::new(0.0, 0.5, 0.1, 5.0, (10.0, 30.0));
    }

    #[test]
    #[should_panic]
    fn test_soc_below_floor_panics() {
        StorageStrategy::new(10.0, 0.05, 0.1, 5.0, (10.0, 30.0));
    }

    #[test]
    #[should_panic]
    fn test_inverted_break_even_panics() {
        StorageStrategy::new(10.0, 0.5, 0.1, 5.0, (30.0, 10.0));
    }

    #[test]
    fn test_orders_at_break_even_rates() {
        let s = StorageStrategy::new(10.0, 0.5, 0.1, 4.0, (12.0, 28.0));
        let orders = s.orders(&ctx());
        // 4 kW for 15 minutes caps both sides at 1 kWh.
        assert_eq!(
            orders,
            vec![
                OrderRequest::Offer {
                    energy_kwh: 1.0,
                    rate: 28.0
                },
                OrderRequest::Bid {
                    energy_kwh: 1.0,
                    rate: 12.0
                },
            ]
        );
    }

    #[test]
    fn test_min_soc_limits_sales() {
        let s = StorageStrategy::new(10.0, 0.15, 0.1, 40.0, (12.0, 28.0));
        match s.orders(&ctx()).first() {
            Some(OrderRequest::Offer { energy_kwh, .. }) => assert!((energy_kwh - 0.5).abs() < 1e-9),
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[test]
    fn test_full_storage_does_not_bid() {
        let s = StorageStrategy::new(10.0, 1.0, 0.1, 4.0, (12.0, 28.0));
        assert!(s
            .orders(&ctx())
            .iter()
            .all(|o| matches!(o, OrderRequest::Offer { .. })));
    }

    #[test]
    fn test_trades_move_soc_and_power_budget() {
        let mut s = StorageStrategy::new(10.0, 0.5, 0.1, 4.0, (12.0, 28.0));
        let c = ctx();
        s.market_cycle(&c);
        s.on_trade(&c, TradeSide::Sold, 1.0);
        assert!((s.soc() - 0.4).abs() < 1e-12);
        // Discharge budget for the slot is used up.
        assert!(s
            .orders(&c)
            .iter()
            .all(|o| matches!(o, OrderRequest::Bid { .. })));
        s.market_closed(&c);
        assert!((s.soc_history_pct(c.time_slot).unwrap() - 40.0).abs() < 1e-9);
    }
}
