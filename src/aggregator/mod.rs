//! External aggregator protocol: registry, command batching, and event publishing.

pub mod batcher;
pub mod commands;
pub mod registry;
pub mod sink;

pub use batcher::{AggregatorError, AggregatorEventBatcher, AggregatorHandle, BatchCommand, EventKind};
pub use commands::{CommandError, CommandResponse, LoadCommand, handle_load_command};
pub use registry::{AGGREGATOR_RESPONSE_CHANNEL, Registry, RegistryMessage, RegistryResponse};
pub use sink::{EventSink, LogSink, RecordingSink};
