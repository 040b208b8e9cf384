//! Orders and trades exchanged in a slot market.

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

/// Energy below this magnitude (kWh) is treated as zero when splitting orders.
pub const ENERGY_EPSILON_KWH: f64 = 1e-9;

/// Errors raised by order-book operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    #[error("order energy must be > 0 (got {0})")]
    InvalidEnergy(f64),
    #[error("order price must be >= 0 (got {0})")]
    NegativePrice(f64),
    #[error("bid `{0}` is not posted on this market")]
    BidNotFound(String),
    #[error("offer `{0}` is not posted on this market")]
    OfferNotFound(String),
    #[error("`{0}` cannot trade with itself")]
    SelfTrade(String),
    #[error("area `{0}` has no open market")]
    NoOpenMarket(String),
}

/// Sell order. `price` is the total price for `energy` (ct).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    pub id: String,
    pub price: f64,
    /// Energy in kWh.
    pub energy: f64,
    /// Direct party offering in this market.
    pub seller: String,
    /// Device that originally produced the energy.
    pub seller_origin: String,
}

impl Offer {
    /// Price per kWh (ct/kWh).
    pub fn energy_rate(&self) -> f64 {
        self.price / self.energy
    }
}

/// Buy order. `price` is the total price for `energy` (ct).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bid {
    pub id: String,
    pub price: f64,
    /// Energy in kWh.
    pub energy: f64,
    /// Direct party bidding in this market.
    pub buyer: String,
    /// Device that will ultimately consume the energy.
    pub buyer_origin: String,
}

impl Bid {
    /// Price per kWh (ct/kWh).
    pub fn energy_rate(&self) -> f64 {
        self.price / self.energy
    }
}

/// Settled trade. Immutable once recorded on a market.
///
/// `seller`/`buyer` are the direct counterparties in the market that recorded
/// the trade; the `*_origin` fields name the devices at either end when the
/// trade was forwarded through intermediate areas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: String,
    pub time_slot: NaiveDateTime,
    /// Accepted portion of the offer (price and energy of this trade).
    pub offer: Offer,
    pub seller: String,
    pub buyer: String,
    pub seller_origin: String,
    pub buyer_origin: String,
}

impl Trade {
    /// Clearing rate (ct/kWh).
    pub fn energy_rate(&self) -> f64 {
        self.offer.energy_rate()
    }

    /// Whether `name` took part in this trade as direct seller or buyer.
    pub fn involves(&self, name: &str) -> bool {
        self.seller == name || self.buyer == name
    }
}

pub(crate) fn validate_order(price: f64, energy: f64) -> Result<(), MarketError> {
    if energy.is_nan() || energy <= 0.0 {
        return Err(MarketError::InvalidEnergy(energy));
    }
    if price < 0.0 || price.is_nan() {
        return Err(MarketError::NegativePrice(price));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_rate_is_price_per_kwh() {
        let offer = Offer {
            id: "o".into(),
            price: 60.0,
            energy: 2.0,
            seller: "PV".into(),
            seller_origin: "PV".into(),
        };
        assert_eq!(offer.energy_rate(), 30.0);
    }

    #[test]
    fn validate_rejects_bad_orders() {
        assert_eq!(validate_order(1.0, 0.0), Err(MarketError::InvalidEnergy(0.0)));
        assert_eq!(validate_order(-1.0, 1.0), Err(MarketError::NegativePrice(-1.0)));
        assert!(validate_order(0.0, 0.5).is_ok());
    }
}
