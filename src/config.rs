//! TOML-based scenario configuration and preset definitions.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

use crate::area::{AreaId, AreaTree};
use crate::devices::{
    CommercialProducerStrategy, FinitePowerPlantStrategy, InfiniteBusStrategy, LoadHoursStrategy,
    LoadProfile, PvStrategy, Strategy, StorageStrategy,
};
use crate::error::SimError;
use crate::sim::types::SimConfig;

/// Top-level scenario configuration parsed from TOML.
///
/// Missing sections fall back to the `default` preset. Load from TOML with
/// [`ScenarioConfig::from_toml_file`] or pick a built-in with
/// [`ScenarioConfig::from_preset`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation timing and global parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Root of the area hierarchy.
    #[serde(default = "default_grid")]
    pub area: AreaConfig,
    /// Aggregators registered before the run starts.
    #[serde(default)]
    pub aggregators: Vec<AggregatorConfig>,
}

/// Simulation timing and global parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// First simulated day.
    pub start_date: NaiveDate,
    /// Market slot length in minutes (must divide a day).
    pub slot_length_minutes: u32,
    /// Number of days to simulate (must be > 0).
    pub days: u32,
    /// Master random seed.
    pub seed: u64,
    /// Keep every past market instead of only the latest.
    pub keep_past_markets: bool,
    /// Collaboration id used in aggregator channel names.
    pub collaboration_id: String,
    /// Capacity of each aggregator event and command queue.
    pub event_queue_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            slot_length_minutes: 60,
            days: 1,
            seed: 42,
            keep_past_markets: true,
            collaboration_id: "local".to_string(),
            event_queue_capacity: 4096,
        }
    }
}

/// One node of the area hierarchy: either an area with children or a device
/// with a strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AreaConfig {
    pub name: String,
    /// Stable uuid; generated when omitted.
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub children: Vec<AreaConfig>,
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,
}

impl AreaConfig {
    fn area(name: &str, children: Vec<AreaConfig>) -> Self {
        Self {
            name: name.to_string(),
            uuid: None,
            children,
            strategy: None,
        }
    }

    fn device(name: &str, strategy: StrategyConfig) -> Self {
        Self {
            name: name.to_string(),
            uuid: None,
            children: Vec::new(),
            strategy: Some(strategy),
        }
    }
}

fn default_load_rate() -> f64 {
    35.0
}

fn default_sunrise() -> f64 {
    6.0
}

fn default_sunset() -> f64 {
    18.0
}

fn default_pv_rate() -> f64 {
    15.0
}

fn default_min_soc() -> f64 {
    0.1
}

/// Device strategy parameters, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum StrategyConfig {
    Load {
        profile: LoadProfile,
        #[serde(default = "default_load_rate")]
        final_buying_rate: f64,
    },
    Pv {
        kw_peak: f64,
        #[serde(default = "default_sunrise")]
        sunrise_hour: f64,
        #[serde(default = "default_sunset")]
        sunset_hour: f64,
        #[serde(default)]
        noise_std: f64,
        #[serde(default = "default_pv_rate")]
        final_selling_rate: f64,
    },
    Storage {
        capacity_kwh: f64,
        initial_soc: f64,
        #[serde(default = "default_min_soc")]
        min_allowed_soc: f64,
        max_abs_power_kw: f64,
        break_even_buy: f64,
        break_even_sell: f64,
    },
    FinitePowerPlant {
        max_available_power_kw: f64,
        energy_rate: f64,
    },
    CommercialProducer {
        energy_rate: f64,
    },
    InfiniteBus {
        energy_sell_rate: f64,
        energy_buy_rate: f64,
    },
}

/// Aggregator created at startup, controlling the named devices.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    pub uuid: String,
    #[serde(default)]
    pub devices: Vec<String>,
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.days"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn hours_load(avg_power_w: f64, hours: std::ops::Range<u32>) -> StrategyConfig {
    StrategyConfig::Load {
        profile: LoadProfile::Hours {
            avg_power_w,
            hours_of_day: hours.collect(),
        },
        final_buying_rate: default_load_rate(),
    }
}

fn home_storage() -> StrategyConfig {
    StrategyConfig::Storage {
        capacity_kwh: 20.0,
        initial_soc: 1.0,
        min_allowed_soc: default_min_soc(),
        max_abs_power_kw: 5.0,
        break_even_buy: 24.0,
        break_even_sell: 25.0,
    }
}

fn default_grid() -> AreaConfig {
    AreaConfig::area(
        "Grid",
        vec![
            AreaConfig::area(
                "House 1",
                vec![
                    AreaConfig::device("H1 General Load", hours_load(200.0, 12..18)),
                    AreaConfig::device("H1 Storage1", home_storage()),
                    AreaConfig::device("H1 Storage2", home_storage()),
                ],
            ),
            AreaConfig::area(
                "House 2",
                vec![
                    AreaConfig::device("H2 General Load", hours_load(200.0, 0..24)),
                    AreaConfig::device(
                        "H2 PV",
                        StrategyConfig::Pv {
                            kw_peak: 1.0,
                            sunrise_hour: default_sunrise(),
                            sunset_hour: default_sunset(),
                            noise_std: 0.0,
                            final_selling_rate: default_pv_rate(),
                        },
                    ),
                ],
            ),
            AreaConfig::device("Cell Tower", hours_load(100.0, 0..24)),
            AreaConfig::device(
                "Market Maker",
                StrategyConfig::InfiniteBus {
                    energy_sell_rate: 30.0,
                    energy_buy_rate: 10.0,
                },
            ),
        ],
    )
}

fn community() -> AreaConfig {
    let house = |n: u32| {
        AreaConfig::area(
            &format!("House {n}"),
            vec![
                AreaConfig::device(
                    &format!("H{n} Load"),
                    StrategyConfig::Load {
                        profile: LoadProfile::Sinusoidal {
                            base_kw: 0.8,
                            amp_kw: 0.5,
                            phase_rad: 1.2,
                            noise_std: 0.05,
                        },
                        final_buying_rate: 32.0,
                    },
                ),
                AreaConfig::device(
                    &format!("H{n} PV"),
                    StrategyConfig::Pv {
                        kw_peak: 2.0 + f64::from(n),
                        sunrise_hour: 6.0,
                        sunset_hour: 19.0,
                        noise_std: 0.1,
                        final_selling_rate: 12.0,
                    },
                ),
            ],
        )
    };
    let mut children: Vec<AreaConfig> = (1..=3).map(house).collect();
    children.push(AreaConfig::device(
        "Power Plant",
        StrategyConfig::FinitePowerPlant {
            max_available_power_kw: 2.0,
            energy_rate: 22.0,
        },
    ));
    children.push(AreaConfig::device(
        "Infinite Bus",
        StrategyConfig::InfiniteBus {
            energy_sell_rate: 30.0,
            energy_buy_rate: 8.0,
        },
    ));
    AreaConfig::area("Community", children)
}

impl ScenarioConfig {
    /// Grid with two houses, a cell tower, and a market maker.
    pub fn default_preset() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            area: default_grid(),
            aggregators: Vec::new(),
        }
    }

    /// Three PV households with a power plant and an infinite bus, two days.
    pub fn community() -> Self {
        Self {
            simulation: SimulationConfig {
                days: 2,
                ..SimulationConfig::default()
            },
            area: community(),
            aggregators: Vec::new(),
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["default", "community"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "default" => Ok(Self::default_preset()),
            "community" => Ok(Self::community()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = &self.simulation;

        if s.slot_length_minutes == 0 || (24 * 60) % s.slot_length_minutes != 0 {
            errors.push(ConfigError::new(
                "simulation.slot_length_minutes",
                "must be > 0 and divide 1440",
            ));
        }
        if s.days == 0 {
            errors.push(ConfigError::new("simulation.days", "must be > 0"));
        }
        if s.event_queue_capacity == 0 {
            errors.push(ConfigError::new("simulation.event_queue_capacity", "must be > 0"));
        }

        let mut names = HashSet::new();
        validate_area(&self.area, "area", &mut names, &mut errors);
        if self.area.strategy.is_some() {
            errors.push(ConfigError::new("area", "the root area cannot be a device"));
        }

        let mut claimed = HashSet::new();
        for (i, aggregator) in self.aggregators.iter().enumerate() {
            for device in &aggregator.devices {
                let field = format!("aggregators[{i}].devices");
                if !self.device_names().contains(device.as_str()) {
                    errors.push(ConfigError::new(field, format!("no device named \"{device}\"")));
                } else if !claimed.insert(device.as_str()) {
                    errors.push(ConfigError::new(
                        field,
                        format!("device \"{device}\" is already controlled by another aggregator"),
                    ));
                }
            }
        }

        errors
    }

    fn device_names(&self) -> HashSet<&str> {
        let mut names = HashSet::new();
        let mut stack = vec![&self.area];
        while let Some(area) = stack.pop() {
            if area.strategy.is_some() {
                names.insert(area.name.as_str());
            }
            stack.extend(area.children.iter());
        }
        names
    }

    /// Slot timing and retention settings.
    ///
    /// Call [`validate`](Self::validate) first; invalid timing panics.
    pub fn sim_config(&self) -> SimConfig {
        let s = &self.simulation;
        let mut config = SimConfig::new(s.start_date, s.slot_length_minutes, s.days, s.seed)
            .with_keep_past_markets(s.keep_past_markets);
        config.collaboration_id = s.collaboration_id.clone();
        config.event_queue_capacity = s.event_queue_capacity;
        config
    }

    /// Validates the scenario and builds its configuration and area tree.
    ///
    /// Device seeds derive from the master seed and the device's position in
    /// the tree, so identical scenarios produce identical runs.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidScenario`] listing every violation.
    pub fn build(&self) -> Result<(SimConfig, AreaTree), SimError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(SimError::InvalidScenario(errors));
        }
        let config = self.sim_config();
        let mut tree = AreaTree::new(&self.area.name, self.area.uuid.as_deref());
        tree.set_keep_past_markets(config.keep_past_markets);
        let root = tree.root();
        let mut device_index = 0;
        for child in &self.area.children {
            add_subtree(&mut tree, root, child, config.seed, &mut device_index);
        }
        Ok((config, tree))
    }

    /// Aggregator uuid to controlled device uuids, resolved against `tree`.
    pub fn aggregator_mapping(&self, tree: &AreaTree) -> BTreeMap<String, Vec<String>> {
        self.aggregators
            .iter()
            .map(|a| {
                let devices = a
                    .devices
                    .iter()
                    .filter_map(|name| tree.find_by_name(name))
                    .map(|id| tree.area(id).uuid().to_string())
                    .collect();
                (a.uuid.clone(), devices)
            })
            .collect()
    }
}

fn validate_area(
    area: &AreaConfig,
    path: &str,
    names: &mut HashSet<String>,
    errors: &mut Vec<ConfigError>,
) {
    if area.name.trim().is_empty() {
        errors.push(ConfigError::new(path, "name must not be empty"));
    }
    if !names.insert(area.name.clone()) {
        errors.push(ConfigError::new(
            path,
            format!("duplicate area name \"{}\"", area.name),
        ));
    }
    match &area.strategy {
        Some(strategy) => {
            if !area.children.is_empty() {
                errors.push(ConfigError::new(path, "a device cannot have children"));
            }
            validate_strategy(strategy, &format!("{path}.strategy"), errors);
        }
        None if area.children.is_empty() => {
            errors.push(ConfigError::new(path, "an area needs children or a strategy"));
        }
        None => {}
    }
    for child in &area.children {
        validate_area(child, &format!("{path}.{}", child.name), names, errors);
    }
}

fn validate_strategy(strategy: &StrategyConfig, path: &str, errors: &mut Vec<ConfigError>) {
    let mut check = |ok: bool, field: &str, message: &str| {
        if !ok {
            errors.push(ConfigError::new(format!("{path}.{field}"), message));
        }
    };
    match strategy {
        StrategyConfig::Load {
            profile,
            final_buying_rate,
        } => {
            check(*final_buying_rate >= 0.0, "final_buying_rate", "must be >= 0");
            match profile {
                LoadProfile::Hours {
                    avg_power_w,
                    hours_of_day,
                } => {
                    check(*avg_power_w >= 0.0, "profile.avg_power_w", "must be >= 0");
                    check(
                        hours_of_day.iter().all(|h| *h < 24),
                        "profile.hours_of_day",
                        "hours must be in 0..24",
                    );
                }
                LoadProfile::Sinusoidal {
                    base_kw, noise_std, ..
                } => {
                    check(*base_kw >= 0.0, "profile.base_kw", "must be >= 0");
                    check(*noise_std >= 0.0, "profile.noise_std", "must be >= 0");
                }
            }
        }
        StrategyConfig::Pv {
            kw_peak,
            sunrise_hour,
            sunset_hour,
            noise_std,
            final_selling_rate,
        } => {
            check(*kw_peak >= 0.0, "kw_peak", "must be >= 0");
            check(
                *sunrise_hour >= 0.0 && sunrise_hour < sunset_hour && *sunset_hour <= 24.0,
                "sunrise_hour",
                "must satisfy 0 <= sunrise_hour < sunset_hour <= 24",
            );
            check(*noise_std >= 0.0, "noise_std", "must be >= 0");
            check(*final_selling_rate >= 0.0, "final_selling_rate", "must be >= 0");
        }
        StrategyConfig::Storage {
            capacity_kwh,
            initial_soc,
            min_allowed_soc,
            max_abs_power_kw,
            break_even_buy,
            break_even_sell,
        } => {
            check(*capacity_kwh > 0.0, "capacity_kwh", "must be > 0");
            check(*max_abs_power_kw > 0.0, "max_abs_power_kw", "must be > 0");
            check(
                (0.0..=1.0).contains(min_allowed_soc),
                "min_allowed_soc",
                "must be in [0.0, 1.0]",
            );
            check(
                (*min_allowed_soc..=1.0).contains(initial_soc),
                "initial_soc",
                "must be in [min_allowed_soc, 1.0]",
            );
            check(
                *break_even_buy >= 0.0 && break_even_buy <= break_even_sell,
                "break_even_buy",
                "must satisfy 0 <= break_even_buy <= break_even_sell",
            );
        }
        StrategyConfig::FinitePowerPlant {
            max_available_power_kw,
            energy_rate,
        } => {
            check(*max_available_power_kw >= 0.0, "max_available_power_kw", "must be >= 0");
            check(*energy_rate >= 0.0, "energy_rate", "must be >= 0");
        }
        StrategyConfig::CommercialProducer { energy_rate } => {
            check(*energy_rate >= 0.0, "energy_rate", "must be >= 0");
        }
        StrategyConfig::InfiniteBus {
            energy_sell_rate,
            energy_buy_rate,
        } => {
            check(
                *energy_buy_rate >= 0.0 && energy_buy_rate <= energy_sell_rate,
                "energy_buy_rate",
                "must satisfy 0 <= energy_buy_rate <= energy_sell_rate",
            );
        }
    }
}

fn add_subtree(
    tree: &mut AreaTree,
    parent: AreaId,
    config: &AreaConfig,
    seed: u64,
    device_index: &mut u64,
) {
    match &config.strategy {
        Some(strategy) => {
            let device_seed = seed.wrapping_add(*device_index);
            *device_index += 1;
            tree.add_device(
                parent,
                &config.name,
                config.uuid.as_deref(),
                build_strategy(strategy, device_seed),
            );
        }
        None => {
            let id = tree.add_area(parent, &config.name, config.uuid.as_deref());
            for child in &config.children {
                add_subtree(tree, id, child, seed, device_index);
            }
        }
    }
}

fn build_strategy(config: &StrategyConfig, seed: u64) -> Strategy {
    match config {
        StrategyConfig::Load {
            profile,
            final_buying_rate,
        } => Strategy::Load(LoadHoursStrategy::new(profile.clone(), *final_buying_rate, seed)),
        StrategyConfig::Pv {
            kw_peak,
            sunrise_hour,
            sunset_hour,
            noise_std,
            final_selling_rate,
        } => Strategy::Pv(PvStrategy::new(
            *kw_peak,
            *sunrise_hour,
            *sunset_hour,
            *noise_std,
            *final_selling_rate,
            seed,
        )),
        StrategyConfig::Storage {
            capacity_kwh,
            initial_soc,
            min_allowed_soc,
            max_abs_power_kw,
            break_even_buy,
            break_even_sell,
        } => Strategy::Storage(StorageStrategy::new(
            *capacity_kwh,
            *initial_soc,
            *min_allowed_soc,
            *max_abs_power_kw,
            (*break_even_buy, *break_even_sell),
        )),
        StrategyConfig::FinitePowerPlant {
            max_available_power_kw,
            energy_rate,
        } => Strategy::FinitePowerPlant(FinitePowerPlantStrategy::new(
            *max_available_power_kw,
            *energy_rate,
        )),
        StrategyConfig::CommercialProducer { energy_rate } => {
            Strategy::CommercialProducer(CommercialProducerStrategy::new(*energy_rate))
        }
        StrategyConfig::InfiniteBus {
            energy_sell_rate,
            energy_buy_rate,
        } => Strategy::InfiniteBus(InfiniteBusStrategy::new(*energy_sell_rate, *energy_buy_rate)),
    }
}
