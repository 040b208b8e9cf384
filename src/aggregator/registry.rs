//! Aggregator lifecycle: create, delete, and device selection.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Channel on which registry responses are published.
pub const AGGREGATOR_RESPONSE_CHANNEL: &str = "aggregator_response";

/// Inbound registry request, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum RegistryMessage {
    /// Creates an aggregator whose uuid is the request's transaction id.
    Create { name: String, transaction_id: String },
    Delete {
        aggregator_uuid: String,
        transaction_id: String,
    },
    /// Puts a device under an aggregator's control.
    Select {
        aggregator_uuid: String,
        device_uuid: String,
        transaction_id: String,
    },
}

/// Registry reply envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryResponse {
    /// `ready`, `deleted`, `SELECTED`, or `error`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregator_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_uuid: Option<String>,
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl RegistryResponse {
    fn new(status: &str, transaction_id: &str) -> Self {
        Self {
            status: status.to_string(),
            name: None,
            aggregator_uuid: None,
            device_uuid: None,
            transaction_id: transaction_id.to_string(),
            msg: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

/// Aggregator to device mapping, kept consistent in both directions.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    aggregator_devices: BTreeMap<String, Vec<String>>,
    device_aggregator: HashMap<String, String>,
}

impl Registry {
    /// Replaces the whole mapping (aggregator uuid to device uuids).
    pub fn set_aggregator_device_mapping(&mut self, mapping: BTreeMap<String, Vec<String>>) {
        self.device_aggregator = mapping
            .iter()
            .flat_map(|(aggr, devices)| devices.iter().map(move |d| (d.clone(), aggr.clone())))
            .collect();
        self.aggregator_devices = mapping;
    }

    pub fn aggregator_of(&self, device_uuid: &str) -> Option<&str> {
        self.device_aggregator.get(device_uuid).map(String::as_str)
    }

    pub fn is_controlling_device(&self, device_uuid: &str) -> bool {
        self.device_aggregator.contains_key(device_uuid)
    }

    pub fn devices_of(&self, aggregator_uuid: &str) -> Option<&[String]> {
        self.aggregator_devices.get(aggregator_uuid).map(Vec::as_slice)
    }

    pub fn handle(&mut self, message: RegistryMessage) -> RegistryResponse {
        match message {
            RegistryMessage::Create {
                name,
                transaction_id,
            } => self.create(name, &transaction_id),
            RegistryMessage::Delete {
                aggregator_uuid,
                transaction_id,
            } => self.delete(aggregator_uuid, &transaction_id),
            RegistryMessage::Select {
                aggregator_uuid,
                device_uuid,
                transaction_id,
            } => self.select(aggregator_uuid, device_uuid, &transaction_id),
        }
    }

    fn create(&mut self, name: String, transaction_id: &str) -> RegistryResponse {
        if self.aggregator_devices.contains_key(transaction_id) {
            return RegistryResponse {
                aggregator_uuid: Some(transaction_id.to_string()),
                ..RegistryResponse::new("error", transaction_id)
            };
        }
        self.aggregator_devices
            .insert(transaction_id.to_string(), Vec::new());
        RegistryResponse {
            name: Some(name),
            ..RegistryResponse::new("ready", transaction_id)
        }
    }

    fn delete(&mut self, aggregator_uuid: String, transaction_id: &str) -> RegistryResponse {
        let status = match self.aggregator_devices.remove(&aggregator_uuid) {
            Some(devices) => {
                for device in devices {
                    self.device_aggregator.remove(&device);
                }
                "deleted"
            }
            None => "error",
        };
        RegistryResponse {
            aggregator_uuid: Some(aggregator_uuid),
            ..RegistryResponse::new(status, transaction_id)
        }
    }

    fn select(
        &mut self,
        aggregator_uuid: String,
        device_uuid: String,
        transaction_id: &str,
    ) -> RegistryResponse {
        let msg = if !self.aggregator_devices.contains_key(&aggregator_uuid) {
            Some(format!("{aggregator_uuid} aggregator not found."))
        } else if let Some(current) = self.device_aggregator.get(&device_uuid) {
            Some(format!("Device already have selected {current}"))
        } else {
            None
        };
        let status = if msg.is_some() { "error" } else { "SELECTED" };
        if msg.is_none() {
            if let Some(devices) = self.aggregator_devices.get_mut(&aggregator_uuid) {
                devices.push(device_uuid.clone());
            }
            self.device_aggregator
                .insert(device_uuid.clone(), aggregator_uuid.clone());
        }
        RegistryResponse {
            aggregator_uuid: Some(aggregator_uuid),
            device_uuid: Some(device_uuid),
            msg,
            ..RegistryResponse::new(status, transaction_id)
        }
    }
}
