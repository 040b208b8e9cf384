//! Hierarchical energy market simulator with post-settlement analytics.

pub mod aggregator;
#[cfg(feature = "api")]
pub mod api;
pub mod area;
pub mod cli;
pub mod config;
pub mod devices;
pub mod error;
pub mod io;
pub mod market;
/// Slot clock, engine, and timing configuration.
pub mod sim;
pub mod stats;
