/// Slot clock for stepping through market slots.
pub mod clock;
pub mod engine;
pub mod types;

pub use engine::Engine;
pub use types::{SimConfig, SlotSummary};
