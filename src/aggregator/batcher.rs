//! Event batching and batch-command intake for external aggregators.
//!
//! [`AggregatorHandle`] is the thread-safe side: transport threads use it to
//! manage aggregators and submit batch commands. [`AggregatorEventBatcher`]
//! is owned by the simulation loop, which drains commands once per tick and
//! publishes batched events and responses.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use super::commands::CommandResponse;
use super::registry::{AGGREGATOR_RESPONSE_CHANNEL, Registry, RegistryMessage, RegistryResponse};
use super::sink::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    Market,
    Tick,
    Trade,
    Finish,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [Self::Market, Self::Tick, Self::Trade, Self::Finish];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Tick => "tick",
            Self::Trade => "trade",
            Self::Finish => "finish",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Commands for several devices submitted under one transaction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchCommand {
    pub transaction_id: String,
    pub aggregator_uuid: String,
    /// Device uuid to that device's commands, executed in order.
    pub batch_commands: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("malformed aggregator message: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("batch command queue is full")]
    QueueFull,
    #[error("simulation is no longer accepting commands")]
    Disconnected,
}

/// Cloneable entry point for transport threads.
#[derive(Debug, Clone)]
pub struct AggregatorHandle {
    registry: Arc<Mutex<Registry>>,
    commands: Sender<BatchCommand>,
}

impl AggregatorHandle {
    /// Parses and applies a registry message (`CREATE`, `DELETE`, `SELECT`).
    ///
    /// The returned response belongs on [`AGGREGATOR_RESPONSE_CHANNEL`].
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Parse`] if `payload` is not a registry message.
    pub fn aggregator_callback(&self, payload: &str) -> Result<RegistryResponse, AggregatorError> {
        let message: RegistryMessage = serde_json::from_str(payload)?;
        Ok(self.handle_registry_message(message))
    }

    pub fn handle_registry_message(&self, message: RegistryMessage) -> RegistryResponse {
        self.registry.lock().handle(message)
    }

    /// Like [`aggregator_callback`](Self::aggregator_callback), publishing the
    /// response on `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Parse`] if `payload` is not a registry message.
    pub fn aggregator_callback_to<S: EventSink>(
        &self,
        payload: &str,
        sink: &mut S,
    ) -> Result<RegistryResponse, AggregatorError> {
        let response = self.aggregator_callback(payload)?;
        sink.publish_json(AGGREGATOR_RESPONSE_CHANNEL, &json!(response));
        Ok(response)
    }

    pub fn set_aggregator_device_mapping(&self, mapping: BTreeMap<String, Vec<String>>) {
        self.registry.lock().set_aggregator_device_mapping(mapping);
    }

    pub fn aggregator_of(&self, device_uuid: &str) -> Option<String> {
        self.registry.lock().aggregator_of(device_uuid).map(str::to_string)
    }

    /// Parses a batch-command message and queues it for the next tick.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or when the queue cannot take the batch.
    pub fn receive_batch_commands_callback(&self, payload: &str) -> Result<(), AggregatorError> {
        let batch: BatchCommand = serde_json::from_str(payload)?;
        self.submit_batch_commands(batch)
    }

    /// Queues a batch for the next tick. A later batch with the same
    /// transaction id replaces an earlier one that is still pending.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::QueueFull`] or [`AggregatorError::Disconnected`].
    pub fn submit_batch_commands(&self, batch: BatchCommand) -> Result<(), AggregatorError> {
        self.commands.try_send(batch).map_err(|err| match err {
            TrySendError::Full(_) => AggregatorError::QueueFull,
            TrySendError::Disconnected(_) => AggregatorError::Disconnected,
        })
    }
}

type EventQueue = (Sender<(String, Value)>, Receiver<(String, Value)>);

/// Simulation-side batcher.
#[derive(Debug)]
pub struct AggregatorEventBatcher {
    collaboration_id: String,
    handle: AggregatorHandle,
    command_rx: Receiver<BatchCommand>,
    event_queues: Vec<EventQueue>,
    processing: BTreeMap<String, BatchCommand>,
    responses: BTreeMap<String, (String, Vec<CommandResponse>)>,
}

impl AggregatorEventBatcher {
    /// Creates a batcher whose event and command queues each hold `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(collaboration_id: &str, capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        let (command_tx, command_rx) = bounded(capacity);
        Self {
            collaboration_id: collaboration_id.to_string(),
            handle: AggregatorHandle {
                registry: Arc::new(Mutex::new(Registry::default())),
                commands: command_tx,
            },
            command_rx,
            event_queues: EventKind::ALL.iter().map(|_| bounded(capacity)).collect(),
            processing: BTreeMap::new(),
            responses: BTreeMap::new(),
        }
    }

    pub fn handle(&self) -> AggregatorHandle {
        self.handle.clone()
    }

    pub fn is_controlling_device(&self, device_uuid: &str) -> bool {
        self.handle.registry.lock().is_controlling_device(device_uuid)
    }

    /// Queues `event` for the aggregator controlling `device_uuid`.
    ///
    /// Devices without an aggregator are ignored. A full queue drops the event.
    pub fn add_batch_event(&self, kind: EventKind, device_uuid: &str, event: Value) {
        let Some(aggregator) = self.handle.aggregator_of(device_uuid) else {
            return;
        };
        let (tx, _) = &self.event_queues[kind.index()];
        if let Err(TrySendError::Full(_)) = tx.try_send((aggregator.clone(), event)) {
            warn!(kind = kind.as_str(), %aggregator, device_uuid, "event queue full, dropping event");
        }
    }

    pub fn add_batch_market_event(&self, device_uuid: &str, event: Value) {
        self.add_batch_event(EventKind::Market, device_uuid, event);
    }

    pub fn add_batch_tick_event(&self, device_uuid: &str, event: Value) {
        self.add_batch_event(EventKind::Tick, device_uuid, event);
    }

    pub fn add_batch_trade_event(&self, device_uuid: &str, event: Value) {
        self.add_batch_event(EventKind::Trade, device_uuid, event);
    }

    pub fn add_batch_finished_event(&self, device_uuid: &str, event: Value) {
        self.add_batch_event(EventKind::Finish, device_uuid, event);
    }

    /// Moves every batch received so far into processing.
    ///
    /// Batches arriving after this call wait for the next one.
    pub fn approve_batch_commands(&mut self) {
        let mut pending = BTreeMap::new();
        for batch in self.command_rx.try_iter() {
            pending.insert(batch.transaction_id.clone(), batch);
        }
        if !pending.is_empty() {
            debug!(batches = pending.len(), "approved batch commands");
        }
        self.processing = pending;
    }

    /// Runs every approved command addressed to `area_uuid` through `handler`
    /// and stores the responses under their transaction.
    ///
    /// `handler` receives each command with its `transaction_id` filled in.
    pub fn consume_all_area_commands<F>(&mut self, area_uuid: &str, mut handler: F)
    where
        F: FnMut(&Value) -> CommandResponse,
    {
        for (transaction_id, batch) in &mut self.processing {
            let Some(commands) = batch.batch_commands.remove(area_uuid) else {
                continue;
            };
            let entry = self
                .responses
                .entry(transaction_id.clone())
                .or_insert_with(|| (batch.aggregator_uuid.clone(), Vec::new()));
            for mut command in commands {
                if let Some(object) = command.as_object_mut() {
                    object.insert("transaction_id".into(), Value::String(transaction_id.clone()));
                }
                entry.1.push(handler(&command));
            }
        }
    }

    /// Device uuids with approved commands not yet consumed.
    pub fn pending_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self
            .processing
            .values()
            .flat_map(|b| b.batch_commands.keys().cloned())
            .collect();
        devices.sort();
        devices.dedup();
        devices
    }

    /// Publishes one message per aggregator and event kind, then clears the queues.
    pub fn publish_all_events<S: EventSink>(&self, sink: &mut S) {
        for kind in EventKind::ALL {
            let (_, rx) = &self.event_queues[kind.index()];
            let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
            for (aggregator, event) in rx.try_iter() {
                grouped.entry(aggregator).or_default().push(event);
            }
            for (aggregator, content) in grouped {
                let channel = format!(
                    "external-aggregator/{}/{}/events/all",
                    self.collaboration_id, aggregator
                );
                sink.publish_json(&channel, &json!({"event": kind.as_str(), "content": content}));
            }
        }
    }

    /// Publishes the responses of every consumed transaction, then clears
    /// responses and processing.
    pub fn publish_all_commands_responses<S: EventSink>(&mut self, sink: &mut S) {
        for (transaction_id, (aggregator, responses)) in std::mem::take(&mut self.responses) {
            let channel = format!(
                "external-aggregator/{}/{}/response/batch_commands",
                self.collaboration_id, aggregator
            );
            sink.publish_json(
                &channel,
                &json!({
                    "command": "batch_commands",
                    "transaction_id": transaction_id,
                    "aggregator_uuid": aggregator,
                    "responses": responses,
                }),
            );
        }
        self.processing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::commands::{CommandOutcome, ResponseStatus};
    use crate::aggregator::sink::RecordingSink;

    fn batcher_with_device() -> AggregatorEventBatcher {
        let batcher = AggregatorEventBatcher::new("collab", 4);
        batcher
            .handle()
            .set_aggregator_device_mapping(BTreeMap::from([("agg".to_string(), vec!["dev".to_string()])]));
        batcher
    }

    fn echo(command: &Value) -> CommandResponse {
        CommandResponse {
            command: command["type"].as_str().unwrap_or_default().to_string(),
            status: ResponseStatus::Ready,
            area_uuid: "dev".into(),
            transaction_id: command["transaction_id"].as_str().map(str::to_string),
            outcome: CommandOutcome::DeletedBids {
                deleted_bids: vec![],
            },
        }
    }

    #[test]
    fn events_are_grouped_per_aggregator_and_kind() {
        let batcher = batcher_with_device();
        batcher.add_batch_market_event("dev", json!({"n": 1}));
        batcher.add_batch_market_event("dev", json!({"n": 2}));
        batcher.add_batch_trade_event("dev", json!({"n": 3}));
        batcher.add_batch_tick_event("unknown", json!({"n": 4}));

        let mut sink = RecordingSink::new();
        batcher.publish_all_events(&mut sink);
        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, "external-aggregator/collab/agg/events/all");
        assert_eq!(messages[0].1["event"], "market");
        assert_eq!(messages[0].1["content"].as_array().unwrap().len(), 2);
        assert_eq!(messages[1].1["event"], "trade");

        sink.clear();
        batcher.publish_all_events(&mut sink);
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn full_queue_drops_events() {
        let batcher = batcher_with_device();
        for n in 0..10 {
            batcher.add_batch_tick_event("dev", json!({"n": n}));
        }
        let mut sink = RecordingSink::new();
        batcher.publish_all_events(&mut sink);
        assert_eq!(sink.messages()[0].1["content"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn commands_flow_from_handle_to_responses() {
        let mut batcher = batcher_with_device();
        let handle = batcher.handle();
        handle
            .receive_batch_commands_callback(
                r#"{"transaction_id": "tx", "aggregator_uuid": "agg",
                    "batch_commands": {"dev": [{"type": "list_bids"}, {"type": "device_info"}]}}"#,
            )
            .unwrap();

        batcher.consume_all_area_commands("dev", echo);
        let mut sink = RecordingSink::new();
        batcher.publish_all_commands_responses(&mut sink);
        assert!(sink.messages().is_empty(), "nothing approved yet");

        batcher.approve_batch_commands();
        assert_eq!(batcher.pending_devices(), vec!["dev".to_string()]);
        batcher.consume_all_area_commands("dev", echo);
        batcher.publish_all_commands_responses(&mut sink);

        let (channel, payload) = &sink.messages()[0];
        assert_eq!(channel, "external-aggregator/collab/agg/response/batch_commands");
        assert_eq!(payload["command"], "batch_commands");
        assert_eq!(payload["transaction_id"], "tx");
        let responses = payload["responses"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["command"], "list_bids");
        assert_eq!(responses[0]["transaction_id"], "tx");
        assert!(batcher.pending_devices().is_empty());
    }

    #[test]
    fn later_batch_with_same_transaction_replaces_pending() {
        let mut batcher = batcher_with_device();
        let handle = batcher.handle();
        for kind in ["list_bids", "device_info"] {
            handle
                .submit_batch_commands(BatchCommand {
                    transaction_id: "tx".into(),
                    aggregator_uuid: "agg".into(),
                    batch_commands: BTreeMap::from([("dev".to_string(), vec![json!({"type": kind})])]),
                })
                .unwrap();
        }
        batcher.approve_batch_commands();
        let mut seen = Vec::new();
        batcher.consume_all_area_commands("dev", |c| {
            seen.push(c["type"].clone());
            echo(c)
        });
        assert_eq!(seen, vec![json!("device_info")]);
    }

    #[test]
    fn registry_callback_publishes_response() {
        let batcher = AggregatorEventBatcher::new("collab", 4);
        let mut sink = RecordingSink::new();
        let response = batcher
            .handle()
            .aggregator_callback_to(r#"{"type": "CREATE", "name": "a", "transaction_id": "agg-1"}"#, &mut sink)
            .unwrap();
        assert_eq!(response.status, "ready");
        assert_eq!(sink.messages()[0].0, AGGREGATOR_RESPONSE_CHANNEL);
        assert!(batcher.handle().aggregator_callback("not json").is_err());
    }

    #[test]
    fn handle_is_usable_from_other_threads() {
        let mut batcher = batcher_with_device();
        let handle = batcher.handle();
        std::thread::spawn(move || {
            handle
                .submit_batch_commands(BatchCommand {
                    transaction_id: "tx".into(),
                    aggregator_uuid: "agg".into(),
                    batch_commands: BTreeMap::new(),
                })
                .unwrap();
        })
        .join()
        .unwrap();
        batcher.approve_batch_commands();
        assert!(batcher.pending_devices().is_empty());
        assert_eq!(batcher.processing.len(), 1);
    }
}
