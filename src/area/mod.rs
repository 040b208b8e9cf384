//! Grid hierarchy of areas and devices.

pub mod tree;

pub use tree::{Area, AreaId, AreaTree};
