//! Per-slot order book and trade ledger.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use uuid::Uuid;

use super::types::{Bid, ENERGY_EPSILON_KWH, MarketError, Offer, Trade, validate_order};

/// Double-sided market for a single time slot.
///
/// Holds the open offers and bids while the slot is running and the ordered
/// list of trades it settled. `traded_energy` keeps the signed net energy per
/// direct party: sellers accumulate `+energy`, buyers `-energy` (kWh).
#[derive(Debug, Clone)]
pub struct Market {
    id: String,
    time_slot: NaiveDateTime,
    offers: Vec<Offer>,
    bids: Vec<Bid>,
    trades: Vec<Trade>,
    traded_energy: BTreeMap<String, f64>,
}

impl Market {
    /// Opens an empty market for `time_slot`.
    pub fn new(time_slot: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            time_slot,
            offers: Vec::new(),
            bids: Vec::new(),
            trades: Vec::new(),
            traded_energy: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn time_slot(&self) -> NaiveDateTime {
        self.time_slot
    }

    /// Settled trades in the order they were recorded.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Signed net energy per direct party (kWh; sold positive, bought negative).
    pub fn traded_energy(&self) -> &BTreeMap<String, f64> {
        &self.traded_energy
    }

    /// Open bids, in posting order.
    pub fn get_bids(&self) -> &[Bid] {
        &self.bids
    }

    /// Open offers, in posting order.
    pub fn get_offers(&self) -> &[Offer] {
        &self.offers
    }

    pub fn bid(&self, id: &str) -> Option<&Bid> {
        self.bids.iter().find(|b| b.id == id)
    }

    pub fn offer(&self, id: &str) -> Option<&Offer> {
        self.offers.iter().find(|o| o.id == id)
    }

    /// Posts a sell order and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError`] if `energy <= 0` or `price < 0`.
    pub fn post_offer(
        &mut self,
        price: f64,
        energy: f64,
        seller: &str,
        seller_origin: &str,
    ) -> Result<Offer, MarketError> {
        validate_order(price, energy)?;
        let offer = Offer {
            id: Uuid::new_v4().to_string(),
            price,
            energy,
            seller: seller.to_string(),
            seller_origin: seller_origin.to_string(),
        };
        self.offers.push(offer.clone());
        Ok(offer)
    }

    /// Posts a buy order and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError`] if `energy <= 0` or `price < 0`.
    pub fn post_bid(
        &mut self,
        price: f64,
        energy: f64,
        buyer: &str,
        buyer_origin: &str,
    ) -> Result<Bid, MarketError> {
        validate_order(price, energy)?;
        let bid = Bid {
            id: Uuid::new_v4().to_string(),
            price,
            energy,
            buyer: buyer.to_string(),
            buyer_origin: buyer_origin.to_string(),
        };
        self.bids.push(bid.clone());
        Ok(bid)
    }

    /// Removes an open bid.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::BidNotFound`] if no open bid has this id.
    pub fn delete_bid(&mut self, id: &str) -> Result<Bid, MarketError> {
        let idx = self
            .bids
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| MarketError::BidNotFound(id.to_string()))?;
        Ok(self.bids.remove(idx))
    }

    /// Removes an open offer.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::OfferNotFound`] if no open offer has this id.
    pub fn delete_offer(&mut self, id: &str) -> Result<Offer, MarketError> {
        let idx = self
            .offers
            .iter()
            .position(|o| o.id == id)
            .ok_or_else(|| MarketError::OfferNotFound(id.to_string()))?;
        Ok(self.offers.remove(idx))
    }

    /// Takes `energy` out of an open offer, removing it once exhausted.
    ///
    /// Returns the consumed part priced at the offer's own rate.
    pub(crate) fn consume_offer(&mut self, id: &str, energy: f64) -> Result<Offer, MarketError> {
        let idx = self
            .offers
            .iter()
            .position(|o| o.id == id)
            .ok_or_else(|| MarketError::OfferNotFound(id.to_string()))?;
        let offer = &mut self.offers[idx];
        let rate = offer.energy_rate();
        let taken = energy.min(offer.energy);
        let consumed = Offer {
            price: rate * taken,
            energy: taken,
            ..offer.clone()
        };
        offer.energy -= taken;
        offer.price = rate * offer.energy;
        if offer.energy <= ENERGY_EPSILON_KWH {
            self.offers.remove(idx);
        }
        Ok(consumed)
    }

    /// Takes `energy` out of an open bid, removing it once exhausted.
    pub(crate) fn consume_bid(&mut self, id: &str, energy: f64) -> Result<Bid, MarketError> {
        let idx = self
            .bids
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| MarketError::BidNotFound(id.to_string()))?;
        let bid = &mut self.bids[idx];
        let rate = bid.energy_rate();
        let taken = energy.min(bid.energy);
        let consumed = Bid {
            price: rate * taken,
            energy: taken,
            ..bid.clone()
        };
        bid.energy -= taken;
        bid.price = rate * bid.energy;
        if bid.energy <= ENERGY_EPSILON_KWH {
            self.bids.remove(idx);
        }
        Ok(consumed)
    }

    /// Appends a trade to the ledger and updates `traded_energy`.
    ///
    /// # Errors
    ///
    /// Rejects trades with non-positive energy and trades whose seller and
    /// buyer are the same party.
    pub(crate) fn record_trade(
        &mut self,
        offer: Offer,
        buyer: &str,
        buyer_origin: &str,
    ) -> Result<Trade, MarketError> {
        if offer.energy.is_nan() || offer.energy <= 0.0 {
            return Err(MarketError::InvalidEnergy(offer.energy));
        }
        if offer.seller == buyer {
            return Err(MarketError::SelfTrade(buyer.to_string()));
        }
        let energy = offer.energy;
        let trade = Trade {
            id: Uuid::new_v4().to_string(),
            time_slot: self.time_slot,
            seller: offer.seller.clone(),
            seller_origin: offer.seller_origin.clone(),
            buyer: buyer.to_string(),
            buyer_origin: buyer_origin.to_string(),
            offer,
        };
        *self.traded_energy.entry(trade.seller.clone()).or_insert(0.0) += energy;
        *self.traded_energy.entry(trade.buyer.clone()).or_insert(0.0) -= energy;
        self.trades.push(trade.clone());
        Ok(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn post_and_delete_bid() {
        let mut market = Market::new(slot());
        let bid = market.post_bid(30.0, 1.0, "Load", "Load").unwrap();
        assert_eq!(market.get_bids().len(), 1);
        assert_eq!(market.delete_bid(&bid.id).unwrap().id, bid.id);
        assert!(market.get_bids().is_empty());
        assert_eq!(
            market.delete_bid(&bid.id),
            Err(MarketError::BidNotFound(bid.id.clone()))
        );
    }

    #[test]
    fn rejects_invalid_orders() {
        let mut market = Market::new(slot());
        assert!(market.post_offer(1.0, 0.0, "PV", "PV").is_err());
        assert!(market.post_bid(-5.0, 1.0, "Load", "Load").is_err());
    }

    #[test]
    fn partial_consume_keeps_rate() {
        let mut market = Market::new(slot());
        let offer = market.post_offer(30.0, 3.0, "PV", "PV").unwrap();
        let part = market.consume_offer(&offer.id, 1.0).unwrap();
        assert_eq!(part.energy, 1.0);
        assert!((part.price - 10.0).abs() < 1e-12);
        let rest = market.offer(&offer.id).unwrap();
        assert!((rest.energy - 2.0).abs() < 1e-12);
        assert!((rest.energy_rate() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn full_consume_removes_order() {
        let mut market = Market::new(slot());
        let bid = market.post_bid(20.0, 2.0, "Load", "Load").unwrap();
        market.consume_bid(&bid.id, 2.0).unwrap();
        assert!(market.get_bids().is_empty());
    }

    #[test]
    fn traded_energy_signs() {
        let mut market = Market::new(slot());
        let offer = market.post_offer(30.0, 1.5, "PV", "PV").unwrap();
        market.record_trade(offer, "Load", "Load").unwrap();
        assert_eq!(market.traded_energy()["PV"], 1.5);
        assert_eq!(market.traded_energy()["Load"], -1.5);
        assert_eq!(market.trades().len(), 1);
    }

    #[test]
    fn self_trade_is_rejected() {
        let mut market = Market::new(slot());
        let offer = market.post_offer(30.0, 1.0, "Storage", "Storage").unwrap();
        assert_eq!(
            market.record_trade(offer, "Storage", "Storage"),
            Err(MarketError::SelfTrade("Storage".into()))
        );
    }
}
