//! Hierarchical two-sided pay-as-bid clearing.
//!
//! Markets are cleared leaves first. Whatever an area cannot match locally is
//! forwarded into its parent's market under the area's own name, with the
//! original `*_origin` preserved. When a forwarded order trades upstream, the
//! matching portion is settled in every market it passed through, so one
//! device-to-device exchange leaves a trade at each level it crossed.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::area::{AreaId, AreaTree};

use super::book::Market;
use super::types::{Bid, MarketError, Offer, Trade};

/// Slack when comparing bid and offer rates (ct/kWh).
const RATE_TOLERANCE: f64 = 1e-9;

/// Where a forwarded order came from.
#[derive(Debug, Clone)]
struct Link {
    area: AreaId,
    order_id: String,
}

#[derive(Debug, Default)]
struct ForwardTable {
    offers: HashMap<String, Link>,
    bids: HashMap<String, Link>,
}

#[derive(Debug)]
struct Match {
    offer_id: String,
    bid_id: String,
    energy: f64,
    rate: f64,
}

/// Clears every open market of `tree` for the running slot.
///
/// # Returns
///
/// All trades recorded during this pass, across every level, in recording order.
///
/// # Errors
///
/// Returns [`MarketError`] if the order books are inconsistent, which indicates
/// a bug rather than a recoverable condition.
pub fn clear_markets(tree: &mut AreaTree) -> Result<Vec<Trade>, MarketError> {
    let mut links = ForwardTable::default();
    let mut recorded = Vec::new();
    for id in tree.post_order() {
        if tree.area(id).market().is_none() {
            continue;
        }
        match_market(tree, id, &links, &mut recorded)?;
        if let Some(parent) = tree.area(id).parent() {
            forward_residuals(tree, id, parent, &mut links)?;
        }
    }
    Ok(recorded)
}

fn match_market(
    tree: &mut AreaTree,
    area: AreaId,
    links: &ForwardTable,
    recorded: &mut Vec<Trade>,
) -> Result<(), MarketError> {
    while let Some(m) = best_match(open_market(tree, area)?) {
        let market = open_market_mut(tree, area)?;
        let offer = market.consume_offer(&m.offer_id, m.energy)?;
        let bid = market.consume_bid(&m.bid_id, m.energy)?;
        let accepted = Offer {
            price: m.rate * offer.energy,
            ..offer
        };
        let trade = market.record_trade(accepted, &bid.buyer, &bid.buyer_origin)?;
        debug!(
            market = tree.area(area).name(),
            seller = %trade.seller,
            buyer = %trade.buyer,
            energy_kwh = trade.offer.energy,
            rate = m.rate,
            "trade"
        );
        recorded.push(trade.clone());
        settle_forwarded_offer(tree, links, &m.offer_id, &trade, recorded)?;
        settle_forwarded_bid(tree, links, &m.bid_id, &trade, recorded)?;
    }
    Ok(())
}

/// Highest bid against the cheapest compatible offer.
///
/// Sorting is stable, so equal rates keep posting order.
fn best_match(market: &Market) -> Option<Match> {
    let mut bids: Vec<&Bid> = market.get_bids().iter().collect();
    bids.sort_by(|a, b| b.energy_rate().total_cmp(&a.energy_rate()));
    let mut offers: Vec<&Offer> = market.get_offers().iter().collect();
    offers.sort_by(|a, b| a.energy_rate().total_cmp(&b.energy_rate()));

    for bid in bids {
        let bid_rate = bid.energy_rate();
        for offer in &offers {
            if offer.energy_rate() > bid_rate + RATE_TOLERANCE {
                break;
            }
            if offer.seller_origin == bid.buyer_origin || offer.seller == bid.buyer {
                continue;
            }
            return Some(Match {
                offer_id: offer.id.clone(),
                bid_id: bid.id.clone(),
                energy: bid.energy.min(offer.energy),
                rate: bid_rate,
            });
        }
    }
    None
}

/// Settles the offer side of `trade` in every lower market the offer was forwarded from.
fn settle_forwarded_offer(
    tree: &mut AreaTree,
    links: &ForwardTable,
    offer_id: &str,
    trade: &Trade,
    recorded: &mut Vec<Trade>,
) -> Result<(), MarketError> {
    let energy = trade.offer.energy;
    let rate = trade.energy_rate();
    let mut current = offer_id;
    while let Some(link) = links.offers.get(current) {
        let forwarder = tree.area(link.area).name().to_string();
        let market = open_market_mut(tree, link.area)?;
        let part = market.consume_offer(&link.order_id, energy)?;
        let accepted = Offer {
            price: rate * part.energy,
            ..part
        };
        recorded.push(market.record_trade(accepted, &forwarder, &trade.buyer_origin)?);
        current = &link.order_id;
    }
    Ok(())
}

/// Settles the bid side of `trade` in every lower market the bid was forwarded from.
fn settle_forwarded_bid(
    tree: &mut AreaTree,
    links: &ForwardTable,
    bid_id: &str,
    trade: &Trade,
    recorded: &mut Vec<Trade>,
) -> Result<(), MarketError> {
    let energy = trade.offer.energy;
    let rate = trade.energy_rate();
    let mut current = bid_id;
    while let Some(link) = links.bids.get(current) {
        let forwarder = tree.area(link.area).name().to_string();
        let market = open_market_mut(tree, link.area)?;
        let bid = market.consume_bid(&link.order_id, energy)?;
        let accepted = Offer {
            id: Uuid::new_v4().to_string(),
            price: rate * bid.energy,
            energy: bid.energy,
            seller: forwarder,
            seller_origin: trade.seller_origin.clone(),
        };
        recorded.push(market.record_trade(accepted, &bid.buyer, &bid.buyer_origin)?);
        current = &link.order_id;
    }
    Ok(())
}

/// Re-posts the unmatched orders of `child` on the parent market.
fn forward_residuals(
    tree: &mut AreaTree,
    child: AreaId,
    parent: AreaId,
    links: &mut ForwardTable,
) -> Result<(), MarketError> {
    let name = tree.area(child).name().to_string();
    let (offers, bids) = {
        let market = open_market(tree, child)?;
        (market.get_offers().to_vec(), market.get_bids().to_vec())
    };
    let parent_market = open_market_mut(tree, parent)?;
    for offer in offers {
        let forwarded = parent_market.post_offer(offer.price, offer.energy, &name, &offer.seller_origin)?;
        links.offers.insert(
            forwarded.id,
            Link {
                area: child,
                order_id: offer.id,
            },
        );
    }
    for bid in bids {
        let forwarded = parent_market.post_bid(bid.price, bid.energy, &name, &bid.buyer_origin)?;
        links.bids.insert(
            forwarded.id,
            Link {
                area: child,
                order_id: bid.id,
            },
        );
    }
    Ok(())
}

fn open_market(tree: &AreaTree, id: AreaId) -> Result<&Market, MarketError> {
    let area = tree.area(id);
    area.market()
        .ok_or_else(|| MarketError::NoOpenMarket(area.name().to_string()))
}

fn open_market_mut(tree: &mut AreaTree, id: AreaId) -> Result<&mut Market, MarketError> {
    let area = tree.area_mut(id);
    let name = area.name().to_string();
    area.market_mut().ok_or(MarketError::NoOpenMarket(name))
}
