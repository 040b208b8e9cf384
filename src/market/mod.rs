//! Slot markets: orders, trades, the order book, and hierarchical clearing.

pub mod book;
pub mod clearing;
pub mod types;

pub use book::Market;
pub use clearing::clear_markets;
pub use types::{Bid, MarketError, Offer, Trade};
