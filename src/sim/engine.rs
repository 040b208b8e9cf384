//! Simulation engine that drives the area tree through market slots.

use chrono::NaiveDateTime;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::aggregator::{AggregatorEventBatcher, AggregatorHandle, EventSink, handle_load_command};
use crate::area::{AreaId, AreaTree};
use crate::devices::{OrderRequest, SlotContext, TradeSide};
use crate::error::SimError;
use crate::market::{MarketError, Trade, clear_markets};
use crate::stats::unmatched_loads::unmatched_load_devices;
use crate::stats::{DeviceStatistics, Kpi, MarketUnmatchedLoads};

use super::clock::SlotClock;
use super::types::{SimConfig, SlotSummary};

/// Simulation engine owning the area tree, the analytics, and the
/// aggregator connection.
///
/// Generic over `S: EventSink` for static dispatch of published messages.
/// Each slot runs in two halves so callers can interleave aggregator traffic:
/// [`begin_slot`](Engine::begin_slot) opens markets and posts device orders,
/// [`finish_slot`](Engine::finish_slot) applies aggregator commands, clears,
/// archives the markets, and updates the statistics.
pub struct Engine<S: EventSink> {
    config: SimConfig,
    tree: AreaTree,
    aggregator: AggregatorEventBatcher,
    sink: S,
    device_statistics: DeviceStatistics,
    kpi: Kpi,
    unmatched_loads: MarketUnmatchedLoads,
    open_slot: Option<SlotContext>,
    summaries: Vec<SlotSummary>,
}

impl<S: EventSink> Engine<S> {
    /// Creates a new simulation engine.
    ///
    /// # Arguments
    ///
    /// * `config` - Slot timing, retention, and aggregator settings
    /// * `tree` - Area hierarchy with device strategies on its leaves
    /// * `sink` - Destination of aggregator events and responses
    pub fn new(config: SimConfig, mut tree: AreaTree, sink: S) -> Self {
        tree.set_keep_past_markets(config.keep_past_markets);
        let unmatched_loads = MarketUnmatchedLoads::new(&tree, &config);
        let aggregator =
            AggregatorEventBatcher::new(&config.collaboration_id, config.event_queue_capacity);
        Self {
            config,
            tree,
            aggregator,
            sink,
            device_statistics: DeviceStatistics::new(),
            kpi: Kpi::new(),
            unmatched_loads,
            open_slot: None,
            summaries: Vec::new(),
        }
    }

    /// Thread-safe handle for registry messages and batch commands.
    pub fn aggregator(&self) -> AggregatorHandle {
        self.aggregator.handle()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn tree(&self) -> &AreaTree {
        &self.tree
    }

    pub fn kpi(&self) -> &Kpi {
        &self.kpi
    }

    pub fn unmatched_loads(&self) -> &MarketUnmatchedLoads {
        &self.unmatched_loads
    }

    pub fn device_statistics(&self) -> &DeviceStatistics {
        &self.device_statistics
    }

    /// Summaries of every settled slot so far.
    pub fn summaries(&self) -> &[SlotSummary] {
        &self.summaries
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Opens markets for `time_slot`, cycles every device, and posts the
    /// orders of devices not under aggregator control.
    ///
    /// Market events for aggregator-controlled devices are published before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SlotAlreadyOpen`] if the previous slot was not
    /// finished, or a [`MarketError`] if an order is rejected.
    pub fn begin_slot(&mut self, time_slot: NaiveDateTime) -> Result<(), SimError> {
        if let Some(open) = &self.open_slot {
            return Err(SimError::SlotAlreadyOpen(open.time_slot));
        }
        let ctx = SlotContext::new(time_slot, self.config.slot_hours());
        self.tree.open_markets(time_slot);

        for id in self.tree.devices() {
            let uuid = self.tree.area(id).uuid().to_string();
            let controlled = self.aggregator.is_controlling_device(&uuid);
            let Some(strategy) = self.tree.area_mut(id).strategy_mut() else {
                continue;
            };
            strategy.device_mut().market_cycle(&ctx);
            let orders = if controlled && strategy.as_load().is_some() {
                Vec::new()
            } else {
                strategy.device().orders(&ctx)
            };
            self.post_orders(id, &orders)?;
            if controlled {
                let event = device_event(&self.tree, id, &ctx);
                self.aggregator.add_batch_market_event(&uuid, event);
            }
        }
        self.aggregator.publish_all_events(&mut self.sink);
        self.open_slot = Some(ctx);
        Ok(())
    }

    fn post_orders(&mut self, device: AreaId, orders: &[OrderRequest]) -> Result<(), MarketError> {
        if orders.is_empty() {
            return Ok(());
        }
        let name = self.tree.area(device).name().to_string();
        let Some(parent) = self.tree.area(device).parent() else {
            return Ok(());
        };
        let parent_name = self.tree.area(parent).name().to_string();
        let market = self
            .tree
            .area_mut(parent)
            .market_mut()
            .ok_or(MarketError::NoOpenMarket(parent_name))?;
        for order in orders {
            match *order {
                OrderRequest::Offer { energy_kwh, rate } => {
                    market.post_offer(rate * energy_kwh, energy_kwh, &name, &name)?;
                }
                OrderRequest::Bid { energy_kwh, rate } => {
                    market.post_bid(rate * energy_kwh, energy_kwh, &name, &name)?;
                }
            }
        }
        Ok(())
    }

    /// Settles the open slot and returns its summary.
    ///
    /// Approved aggregator commands run first, then every market is cleared,
    /// devices are told about their trades, markets are archived, and the
    /// statistics are refreshed. Pending events and command responses are
    /// published last.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::NoOpenSlot`] without a preceding
    /// [`begin_slot`](Engine::begin_slot), or a [`MarketError`] from clearing.
    pub fn finish_slot(&mut self) -> Result<SlotSummary, SimError> {
        let ctx = self.open_slot.take().ok_or(SimError::NoOpenSlot)?;

        self.apply_aggregator_commands(&ctx);
        let trades = clear_markets(&mut self.tree)?;
        self.notify_trades(&ctx);

        self.tree.close_markets();
        for id in self.tree.devices() {
            if let Some(strategy) = self.tree.area_mut(id).strategy_mut() {
                strategy.device_mut().market_closed(&ctx);
            }
        }

        self.device_statistics.update(&self.tree);
        self.kpi.update_kpis_from_area(&self.tree, self.tree.root());
        self.unmatched_loads.update_unmatched_loads(&self.tree);

        self.aggregator.publish_all_events(&mut self.sink);
        self.aggregator.publish_all_commands_responses(&mut self.sink);

        let summary = self.summarize(ctx.time_slot, &trades);
        info!(
            slot = %ctx.time_slot.format("%Y-%m-%d %H:%M"),
            trades = summary.trade_count,
            energy_kwh = summary.traded_energy_kwh,
            unmatched = summary.unmatched_loads,
            "slot settled"
        );
        self.summaries.push(summary.clone());
        Ok(summary)
    }

    fn apply_aggregator_commands(&mut self, ctx: &SlotContext) {
        self.aggregator.approve_batch_commands();
        let tree = &mut self.tree;
        for uuid in self.aggregator.pending_devices() {
            match tree.find_by_uuid(&uuid) {
                Some(id) => {
                    self.aggregator
                        .consume_all_area_commands(&uuid, |command| handle_load_command(tree, id, command));
                }
                None => warn!(device_uuid = %uuid, "batch commands for unknown device dropped"),
            }
        }
        for id in tree.devices() {
            let uuid = tree.area(id).uuid();
            if self.aggregator.is_controlling_device(uuid) {
                self.aggregator
                    .add_batch_tick_event(uuid, device_event(tree, id, ctx));
            }
        }
    }

    /// Feeds each device the trades it was a direct party to.
    fn notify_trades(&mut self, ctx: &SlotContext) {
        for id in self.tree.devices() {
            let name = self.tree.area(id).name().to_string();
            let uuid = self.tree.area(id).uuid().to_string();
            let own: Vec<Trade> = self
                .tree
                .parent(id)
                .and_then(|p| p.market())
                .map(|m| m.trades().iter().filter(|t| t.involves(&name)).cloned().collect())
                .unwrap_or_default();
            if own.is_empty() {
                continue;
            }
            let controlled = self.aggregator.is_controlling_device(&uuid);
            for trade in &own {
                let side = if trade.seller == name {
                    TradeSide::Sold
                } else {
                    TradeSide::Bought
                };
                if let Some(strategy) = self.tree.area_mut(id).strategy_mut() {
                    strategy.device_mut().on_trade(ctx, side, trade.offer.energy);
                }
                if controlled {
                    self.aggregator.add_batch_trade_event(&uuid, trade_event(trade, &uuid));
                }
            }
            debug!(device = %name, trades = own.len(), "device trades applied");
        }
    }

    fn summarize(&self, time_slot: NaiveDateTime, trades: &[Trade]) -> SlotSummary {
        let origin_trades: Vec<&Trade> = trades.iter().filter(|t| t.seller == t.seller_origin).collect();
        let traded_energy_kwh: f64 = origin_trades.iter().map(|t| t.offer.energy).sum();
        let average_rate = if origin_trades.is_empty() {
            None
        } else {
            let total: f64 = origin_trades.iter().map(|t| t.energy_rate()).sum();
            Some(total / origin_trades.len() as f64)
        };
        let root = self.tree.area(self.tree.root()).name();
        let kpi = self
            .kpi
            .performance_indices()
            .get(root)
            .map(|r| r.to_percentages());
        SlotSummary {
            time_slot,
            trade_count: trades.len(),
            traded_energy_kwh,
            average_rate,
            unmatched_loads: unmatched_load_devices(&self.tree),
            self_sufficiency_pct: kpi.as_ref().map_or(0.0, |k| k.self_sufficiency),
            self_consumption_pct: kpi.as_ref().map_or(0.0, |k| k.self_consumption),
        }
    }

    /// Runs one full slot.
    ///
    /// # Errors
    ///
    /// See [`begin_slot`](Engine::begin_slot) and [`finish_slot`](Engine::finish_slot).
    pub fn step(&mut self, time_slot: NaiveDateTime) -> Result<SlotSummary, SimError> {
        self.begin_slot(time_slot)?;
        self.finish_slot()
    }

    /// Executes every slot of the configured period and returns their summaries.
    ///
    /// Aggregator-controlled devices receive a `finish` event at the end.
    ///
    /// # Errors
    ///
    /// Stops at the first slot that fails.
    pub fn run(&mut self) -> Result<Vec<SlotSummary>, SimError> {
        let mut clock = SlotClock::new(&self.config);
        let mut results = Vec::with_capacity(clock.remaining());
        while let Some((_, slot)) = clock.tick() {
            results.push(self.step(slot)?);
        }
        self.finish();
        Ok(results)
    }

    /// Publishes `finish` events to every aggregator-controlled device.
    pub fn finish(&mut self) {
        for id in self.tree.devices() {
            let uuid = self.tree.area(id).uuid();
            if self.aggregator.is_controlling_device(uuid) {
                self.aggregator
                    .add_batch_finished_event(uuid, json!({"area_uuid": uuid}));
            }
        }
        self.aggregator.publish_all_events(&mut self.sink);
    }
}

fn device_event(tree: &AreaTree, id: AreaId, ctx: &SlotContext) -> Value {
    let area = tree.area(id);
    let mut event = json!({
        "area_uuid": area.uuid(),
        "device_name": area.name(),
        "device_type": area.display_type(),
        "start_time": ctx.time_slot.format("%Y-%m-%dT%H:%M").to_string(),
    });
    if let Some(load) = area.strategy().and_then(|s| s.as_load()) {
        event["device_info"] = json!({
            "energy_requirement_kWh": load.energy_requirement_wh(ctx.time_slot) / 1000.0,
        });
    }
    event
}

fn trade_event(trade: &Trade, area_uuid: &str) -> Value {
    json!({
        "area_uuid": area_uuid,
        "trade_id": trade.id,
        "seller": trade.seller,
        "buyer": trade.buyer,
        "energy": trade.offer.energy,
        "price": trade.offer.price,
        "rate": trade.energy_rate(),
        "time_slot": trade.time_slot.format("%Y-%m-%dT%H:%M").to_string(),
    })
}
