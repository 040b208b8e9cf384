//! Top-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::market::MarketError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid scenario:\n{}", format_errors(.0))]
    InvalidScenario(Vec<ConfigError>),
    #[error(transparent)]
    Market(#[from] MarketError),
    #[error("no market slot is open")]
    NoOpenSlot,
    #[error("slot {0} is still open")]
    SlotAlreadyOpen(chrono::NaiveDateTime),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| format!("  {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}
