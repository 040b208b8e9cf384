//! End-to-end aggregator flow: registry, batch commands, events, responses.

mod common;

use area_market_sim::aggregator::{AGGREGATOR_RESPONSE_CHANNEL, AggregatorHandle, RecordingSink};
use area_market_sim::config::ScenarioConfig;
use area_market_sim::sim::Engine;
use serde_json::{Value, json};

const EVENTS: &str = "external-aggregator/local/agg-1/events/all";
const RESPONSES: &str = "external-aggregator/local/agg-1/response/batch_commands";

fn controlled_engine() -> (Engine<RecordingSink>, AggregatorHandle) {
    let mut engine = Engine::new(
        common::default_config(),
        common::house_with_plant(),
        RecordingSink::new(),
    );
    let handle = engine.aggregator();
    handle
        .aggregator_callback_to(
            r#"{"type": "CREATE", "name": "home-ems", "transaction_id": "agg-1"}"#,
            engine.sink_mut(),
        )
        .unwrap();
    handle
        .aggregator_callback_to(
            r#"{"type": "SELECT", "aggregator_uuid": "agg-1", "device_uuid": "load-uuid", "transaction_id": "sel-1"}"#,
            engine.sink_mut(),
        )
        .unwrap();
    (engine, handle)
}

fn batch(transaction_id: &str, commands: Value) -> String {
    json!({
        "transaction_id": transaction_id,
        "aggregator_uuid": "agg-1",
        "batch_commands": {"load-uuid": commands},
    })
    .to_string()
}

fn events_of<'a>(sink: &'a RecordingSink, kind: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    sink.on_channel(EVENTS).filter(move |m| m["event"] == kind)
}

#[test]
fn registry_responses_are_published() {
    let (engine, _) = controlled_engine();
    let responses: Vec<_> = engine.sink().on_channel(AGGREGATOR_RESPONSE_CHANNEL).collect();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["status"], "ready");
    assert_eq!(responses[1]["status"], "SELECTED");
    assert_eq!(responses[1]["device_uuid"], "load-uuid");
}

#[test]
fn controlled_load_trades_only_through_commands() {
    let (mut engine, handle) = controlled_engine();
    let slot = engine.config().slot_at(0);

    engine.begin_slot(slot).unwrap();
    let market: Vec<_> = events_of(engine.sink(), "market").collect();
    assert_eq!(market.len(), 1);
    assert_eq!(market[0]["content"][0]["area_uuid"], "load-uuid");
    assert_eq!(market[0]["content"][0]["device_info"]["energy_requirement_kWh"], 0.5);

    handle
        .receive_batch_commands_callback(&batch(
            "tx-1",
            json!([
                {"type": "list_bids"},
                {"type": "bid", "price": 15.0, "energy": 0.5},
            ]),
        ))
        .unwrap();
    let summary = engine.finish_slot().unwrap();
    assert_eq!(summary.trade_count, 3);
    assert_eq!(summary.unmatched_loads, 0);

    let responses: Vec<_> = engine.sink().on_channel(RESPONSES).collect();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["transaction_id"], "tx-1");
    let items = responses[0]["responses"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["command"], "list_bids");
    assert_eq!(items[0]["bid_list"], json!([]));
    assert_eq!(items[1]["command"], "bid");
    assert_eq!(items[1]["status"], "ready");
    assert_eq!(items[1]["transaction_id"], "tx-1");

    assert_eq!(events_of(engine.sink(), "tick").count(), 1);
    let trades: Vec<_> = events_of(engine.sink(), "trade").collect();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0]["content"].as_array().unwrap().len(), 2);
}

#[test]
fn silent_aggregator_leaves_load_unmatched() {
    let (mut engine, _) = controlled_engine();
    let slot = engine.config().slot_at(0);
    let summary = engine.step(slot).unwrap();
    assert_eq!(summary.unmatched_loads, 1);
    assert!(engine.sink().on_channel(RESPONSES).next().is_none());
}

#[test]
fn oversized_bid_is_rejected_with_error_response() {
    let (mut engine, handle) = controlled_engine();
    let slot = engine.config().slot_at(0);
    engine.begin_slot(slot).unwrap();
    handle
        .receive_batch_commands_callback(&batch(
            "tx-big",
            json!([{"type": "bid", "price": 30.0, "energy": 0.75}]),
        ))
        .unwrap();
    let summary = engine.finish_slot().unwrap();
    assert_eq!(summary.unmatched_loads, 1);

    let response = engine.sink().on_channel(RESPONSES).next().unwrap();
    let item = &response["responses"][0];
    assert_eq!(item["status"], "error");
    assert!(item["error_message"].as_str().unwrap().contains("Load"));
}

#[test]
fn deleting_the_aggregator_returns_control_to_the_device() {
    let (mut engine, handle) = controlled_engine();
    let first = engine.config().slot_at(0);
    assert_eq!(engine.step(first).unwrap().unmatched_loads, 1);

    let response = handle
        .aggregator_callback(r#"{"type": "DELETE", "aggregator_uuid": "agg-1", "transaction_id": "del-1"}"#)
        .unwrap();
    assert_eq!(response.status, "deleted");
    assert!(handle.aggregator_of("load-uuid").is_none());

    let second = engine.config().slot_at(1);
    assert_eq!(engine.step(second).unwrap().unmatched_loads, 0);
}

#[test]
fn finish_event_closes_the_run() {
    let (mut engine, _) = controlled_engine();
    engine.run().unwrap();
    let finish: Vec<_> = events_of(engine.sink(), "finish").collect();
    assert_eq!(finish.len(), 1);
    assert_eq!(finish[0]["content"][0]["area_uuid"], "load-uuid");
}

#[test]
fn configured_aggregators_control_devices_from_the_start() {
    let toml = r#"
[simulation]
days = 1

[area]
name = "Grid"

[[area.children]]
name = "Home"

[[area.children.children]]
name = "Home Load"
uuid = "home-load"
strategy = { type = "load", profile = { kind = "hours", avg_power_w = 400.0, hours_of_day = [0] } }

[[area.children]]
name = "Feed"
strategy = { type = "commercial_producer", energy_rate = 25.0 }

[[aggregators]]
uuid = "agg-1"
devices = ["Home Load"]
"#;
    let scenario = ScenarioConfig::from_toml_str(toml).unwrap();
    let (config, tree) = scenario.build().unwrap();
    let mapping = scenario.aggregator_mapping(&tree);
    let mut engine = Engine::new(config, tree, RecordingSink::new());
    let handle = engine.aggregator();
    handle.set_aggregator_device_mapping(mapping);
    assert_eq!(handle.aggregator_of("home-load").as_deref(), Some("agg-1"));

    let slot = engine.config().slot_at(0);
    engine.begin_slot(slot).unwrap();
    handle
        .receive_batch_commands_callback(
            &json!({
                "transaction_id": "tx",
                "aggregator_uuid": "agg-1",
                "batch_commands": {"home-load": [{"type": "device_info"}]},
            })
            .to_string(),
        )
        .unwrap();
    let summary = engine.finish_slot().unwrap();
    assert_eq!(summary.unmatched_loads, 1);

    let response = engine.sink().on_channel(RESPONSES).next().unwrap();
    assert_eq!(response["responses"][0]["device_info"]["energy_requirement_kWh"], 0.4);
}
