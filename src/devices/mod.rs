//! Device strategies attached to the leaves of the area tree.

/// Unlimited grid connections (commercial producer, infinite bus).
pub mod grid;
/// Load with hours-of-day or sinusoidal demand.
pub mod load;
/// Dispatchable fixed-output generator.
pub mod power_plant;
/// Solar photovoltaic generation.
pub mod pv;
/// Stationary battery storage.
pub mod storage;
pub mod types;

pub use grid::{CommercialProducerStrategy, InfiniteBusStrategy};
pub use load::{LoadHoursStrategy, LoadProfile};
pub use power_plant::FinitePowerPlantStrategy;
pub use pv::PvStrategy;
pub use storage::StorageStrategy;
pub use types::{Device, DeviceRole, OrderRequest, SlotContext, TradeSide};

/// Closed set of device strategies a leaf area can carry.
#[derive(Debug, Clone)]
pub enum Strategy {
    Load(LoadHoursStrategy),
    Pv(PvStrategy),
    Storage(StorageStrategy),
    FinitePowerPlant(FinitePowerPlantStrategy),
    CommercialProducer(CommercialProducerStrategy),
    InfiniteBus(InfiniteBusStrategy),
}

impl Strategy {
    /// Dynamic view for the shared lifecycle calls.
    pub fn device(&self) -> &dyn Device {
        match self {
            Self::Load(s) => s,
            Self::Pv(s) => s,
            Self::Storage(s) => s,
            Self::FinitePowerPlant(s) => s,
            Self::CommercialProducer(s) => s,
            Self::InfiniteBus(s) => s,
        }
    }

    pub fn device_mut(&mut self) -> &mut dyn Device {
        match self {
            Self::Load(s) => s,
            Self::Pv(s) => s,
            Self::Storage(s) => s,
            Self::FinitePowerPlant(s) => s,
            Self::CommercialProducer(s) => s,
            Self::InfiniteBus(s) => s,
        }
    }

    pub fn role(&self) -> DeviceRole {
        self.device().role()
    }

    pub fn display_type(&self) -> &'static str {
        self.device().device_type()
    }

    pub fn as_load(&self) -> Option<&LoadHoursStrategy> {
        match self {
            Self::Load(s) => Some(s),
            _ => None,
        }
    }
}
