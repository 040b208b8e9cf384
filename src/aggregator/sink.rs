//! Publishing side of the aggregator protocol.

use serde_json::Value;
use tracing::info;

/// Destination for published aggregator messages.
///
/// The transport itself lives outside the simulator; implementors forward
/// `payload` to whatever pub/sub system backs `channel`.
pub trait EventSink {
    fn publish_json(&mut self, channel: &str, payload: &Value);
}

/// Keeps every published message in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    messages: Vec<(String, Value)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages in publishing order.
    pub fn messages(&self) -> &[(String, Value)] {
        &self.messages
    }

    /// Payloads published on `channel`, in order.
    pub fn on_channel<'a>(&'a self, channel: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.messages
            .iter()
            .filter(move |(c, _)| c == channel)
            .map(|(_, payload)| payload)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl EventSink for RecordingSink {
    fn publish_json(&mut self, channel: &str, payload: &Value) {
        self.messages.push((channel.to_string(), payload.clone()));
    }
}

/// Writes every message to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish_json(&mut self, channel: &str, payload: &Value) {
        info!(channel, %payload, "publish");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recording_sink_filters_by_channel() {
        let mut sink = RecordingSink::new();
        sink.publish_json("a", &json!({"n": 1}));
        sink.publish_json("b", &json!({"n": 2}));
        sink.publish_json("a", &json!({"n": 3}));
        let on_a: Vec<_> = sink.on_channel("a").collect();
        assert_eq!(on_a, vec![&json!({"n": 1}), &json!({"n": 3})]);
        sink.clear();
        assert!(sink.messages().is_empty());
    }
}
