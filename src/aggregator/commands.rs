//! Batch commands an aggregator may issue on behalf of a load.
//!
//! Each command is a JSON object tagged by `type`. Commands operate on the
//! open market of the load's parent area and always produce a response,
//! either `ready` or `error`.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::area::{AreaId, AreaTree};
use crate::market::{Bid, MarketError};

const PRICE_ENERGY_KEYS: [&str; 4] = ["price", "energy", "type", "transaction_id"];

/// A parsed load command.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadCommand {
    /// Posts a bid; `price` is the total price for `energy` kWh.
    Bid { price: f64, energy: f64 },
    /// Deletes one bid of the device, or all of them.
    DeleteBid { bid: Option<String> },
    ListBids,
    /// Replaces every bid of the device with one bid of their total energy
    /// at rate `price / energy`.
    UpdateBid { price: f64, energy: f64 },
    DeviceInfo,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command is not a JSON object")]
    NotAnObject,
    #[error("missing command type")]
    MissingType,
    #[error("unknown command type `{0}`")]
    UnknownCommand(String),
    #[error("invalid arguments: expected keys {expected:?}, got {got:?}")]
    UnexpectedKeys {
        expected: Vec<&'static str>,
        got: Vec<String>,
    },
    #[error("field `{0}` must be a number")]
    NotANumber(&'static str),
    #[error("Error when handling bid create on area {area} with arguments {args}.")]
    BidCreate { area: String, args: String },
    #[error(
        "Error when handling bid delete on area {area} with arguments {args}. Bid does not exist on the current market."
    )]
    BidDelete { area: String, args: String },
    #[error("Updated bid would only work if the old exist in market.")]
    NoBidToUpdate,
    #[error("device `{0}` does not accept aggregator commands")]
    UnsupportedDevice(String),
    #[error(transparent)]
    Market(#[from] MarketError),
}

impl LoadCommand {
    /// Parses a command object.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] for an unknown `type` or an argument set that
    /// does not match the command.
    pub fn parse(command: &Value) -> Result<Self, CommandError> {
        let object = command.as_object().ok_or(CommandError::NotAnObject)?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(CommandError::MissingType)?;
        match kind {
            "bid" => {
                check_keys(object)?;
                Ok(Self::Bid {
                    price: number(object, "price")?,
                    energy: number(object, "energy")?,
                })
            }
            "update_bid" => {
                check_keys(object)?;
                Ok(Self::UpdateBid {
                    price: number(object, "price")?,
                    energy: number(object, "energy")?,
                })
            }
            "delete_bid" => Ok(Self::DeleteBid {
                bid: object.get("bid").and_then(Value::as_str).map(str::to_string),
            }),
            "list_bids" => Ok(Self::ListBids),
            "device_info" => Ok(Self::DeviceInfo),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }

    /// Name under which the response is reported.
    pub fn response_name(&self) -> &'static str {
        match self {
            Self::Bid { .. } => "bid",
            Self::DeleteBid { .. } => "bid_delete",
            Self::ListBids => "list_bids",
            Self::UpdateBid { .. } => "update_bid",
            Self::DeviceInfo => "device_info",
        }
    }
}

fn check_keys(object: &Map<String, Value>) -> Result<(), CommandError> {
    let matches = object.len() == PRICE_ENERGY_KEYS.len()
        && PRICE_ENERGY_KEYS.iter().all(|k| object.contains_key(*k));
    if matches {
        Ok(())
    } else {
        Err(CommandError::UnexpectedKeys {
            expected: PRICE_ENERGY_KEYS.to_vec(),
            got: object.keys().cloned().collect(),
        })
    }
}

fn number(object: &Map<String, Value>, key: &'static str) -> Result<f64, CommandError> {
    object
        .get(key)
        .and_then(Value::as_f64)
        .ok_or(CommandError::NotANumber(key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ready,
    Error,
}

/// Public view of a bid in command responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BidView {
    pub id: String,
    pub price: f64,
    pub energy: f64,
}

impl From<&Bid> for BidView {
    fn from(bid: &Bid) -> Self {
        Self {
            id: bid.id.clone(),
            price: bid.price,
            energy: bid.energy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    #[serde(rename = "energy_requirement_kWh")]
    pub energy_requirement_kwh: f64,
}

/// Command-specific part of a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandOutcome {
    Bid { bid: BidView },
    DeletedBids { deleted_bids: Vec<String> },
    BidList { bid_list: Vec<BidView> },
    DeviceInfo { device_info: DeviceInfo },
    Error { error_message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub command: String,
    pub status: ResponseStatus,
    pub area_uuid: String,
    pub transaction_id: Option<String>,
    #[serde(flatten)]
    pub outcome: CommandOutcome,
}

/// Executes one aggregator command for the load at `device`.
///
/// Never fails: every error is reported as an `error` response.
pub fn handle_load_command(tree: &mut AreaTree, device: AreaId, command: &Value) -> CommandResponse {
    let area_uuid = tree.area(device).uuid().to_string();
    let transaction_id = command
        .get("transaction_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let raw_name = command
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let result = LoadCommand::parse(command).and_then(|parsed| {
        let name = parsed.response_name().to_string();
        execute(tree, device, &parsed, command).map(|outcome| (name, outcome))
    });
    match result {
        Ok((name, outcome)) => CommandResponse {
            command: name,
            status: ResponseStatus::Ready,
            area_uuid,
            transaction_id,
            outcome,
        },
        Err(err) => {
            warn!(area = %tree.area(device).name(), command = %raw_name, error = %err, "aggregator command failed");
            CommandResponse {
                command: if raw_name == "delete_bid" {
                    "bid_delete".to_string()
                } else {
                    raw_name
                },
                status: ResponseStatus::Error,
                area_uuid,
                transaction_id,
                outcome: CommandOutcome::Error {
                    error_message: err.to_string(),
                },
            }
        }
    }
}

fn execute(
    tree: &mut AreaTree,
    device: AreaId,
    command: &LoadCommand,
    raw: &Value,
) -> Result<CommandOutcome, CommandError> {
    let name = tree.area(device).name().to_string();
    let load = tree
        .area(device)
        .strategy()
        .and_then(|s| s.as_load())
        .ok_or_else(|| CommandError::UnsupportedDevice(name.clone()))?;
    let parent = tree
        .area(device)
        .parent()
        .ok_or_else(|| CommandError::UnsupportedDevice(name.clone()))?;
    let parent_name = tree.area(parent).name().to_string();
    let market = tree
        .area(parent)
        .market()
        .ok_or_else(|| MarketError::NoOpenMarket(parent_name.clone()))?;
    let slot = market.time_slot();
    let requirement_kwh = load.energy_requirement_wh(slot) / 1000.0;
    let own_bids: Vec<Bid> = market
        .get_bids()
        .iter()
        .filter(|b| b.buyer == name)
        .cloned()
        .collect();
    let posted_kwh: f64 = own_bids.iter().map(|b| b.energy).sum();
    let can_post = |energy: f64| load.can_bid_be_posted(energy, posted_kwh, slot);

    match command {
        LoadCommand::Bid { price, energy } => {
            if !can_post(*energy) {
                return Err(CommandError::BidCreate {
                    area: name,
                    args: raw.to_string(),
                });
            }
            let market = open_market_mut(tree, parent, &parent_name)?;
            let bid = market.post_bid(*price, *energy, &name, &name)?;
            Ok(CommandOutcome::Bid {
                bid: BidView::from(&bid),
            })
        }
        LoadCommand::DeleteBid { bid } => {
            let targets: Vec<String> = match bid {
                Some(id) if own_bids.iter().any(|b| &b.id == id) => vec![id.clone()],
                Some(_) => {
                    return Err(CommandError::BidDelete {
                        area: name,
                        args: raw.to_string(),
                    });
                }
                None => own_bids.iter().map(|b| b.id.clone()).collect(),
            };
            let market = open_market_mut(tree, parent, &parent_name)?;
            for id in &targets {
                market.delete_bid(id)?;
            }
            Ok(CommandOutcome::DeletedBids {
                deleted_bids: targets,
            })
        }
        LoadCommand::ListBids => Ok(CommandOutcome::BidList {
            bid_list: own_bids.iter().map(BidView::from).collect(),
        }),
        LoadCommand::UpdateBid { price, energy } => {
            if own_bids.is_empty() {
                return Err(CommandError::NoBidToUpdate);
            }
            if *energy <= 0.0 {
                return Err(MarketError::InvalidEnergy(*energy).into());
            }
            let rate = price / energy;
            let total_energy = posted_kwh;
            let market = open_market_mut(tree, parent, &parent_name)?;
            for bid in &own_bids {
                market.delete_bid(&bid.id)?;
            }
            let bid = market.post_bid(rate * total_energy, total_energy, &name, &name)?;
            Ok(CommandOutcome::Bid {
                bid: BidView::from(&bid),
            })
        }
        LoadCommand::DeviceInfo => Ok(CommandOutcome::DeviceInfo {
            device_info: DeviceInfo {
                energy_requirement_kwh: requirement_kwh,
            },
        }),
    }
}

fn open_market_mut<'a>(
    tree: &'a mut AreaTree,
    parent: AreaId,
    parent_name: &str,
) -> Result<&'a mut crate::market::Market, MarketError> {
    tree.area_mut(parent)
        .market_mut()
        .ok_or_else(|| MarketError::NoOpenMarket(parent_name.to_string()))
}
