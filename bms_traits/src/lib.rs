pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// One acquisition of a module's brick voltages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleVoltageFrame {
    /// Brick voltages in volts, index-addressed.
    pub brick_v: Vec<f32>,
    /// Independently measured module total, when the monitor reports one.
    pub block_v: Option<f32>,
}

/// One acquisition of a module's temperature sense channels, in volts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleTemperatureFrame {
    pub brick_sense_v: Vec<f32>,
    pub board_sense_v: Vec<f32>,
}

pub trait CellMonitor {
    fn acquire_module_voltages(
        &mut self,
        module_count: usize,
    ) -> Result<Vec<ModuleVoltageFrame>, Box<dyn std::error::Error + Send + Sync>>;
    fn acquire_module_temperatures(
        &mut self,
        module_count: usize,
    ) -> Result<Vec<ModuleTemperatureFrame>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Bus current in amps; positive means the pack is discharging.
pub trait CurrentSensor {
    fn read_bus_current(&mut self) -> Result<f32, Box<dyn std::error::Error + Send + Sync>>;
}

pub trait BleedDriver {
    fn set_bleed_output(
        &mut self,
        module: usize,
        brick: usize,
        enabled: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<T: CellMonitor + ?Sized> CellMonitor for Box<T> {
    fn acquire_module_voltages(
        &mut self,
        module_count: usize,
    ) -> Result<Vec<ModuleVoltageFrame>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).acquire_module_voltages(module_count)
    }
    fn acquire_module_temperatures(
        &mut self,
        module_count: usize,
    ) -> Result<Vec<ModuleTemperatureFrame>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).acquire_module_temperatures(module_count)
    }
}

impl<T: CurrentSensor + ?Sized> CurrentSensor for Box<T> {
    fn read_bus_current(&mut self) -> Result<f32, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read_bus_current()
    }
}

impl<T: BleedDriver + ?Sized> BleedDriver for Box<T> {
    fn set_bleed_output(
        &mut self,
        module: usize,
        brick: usize,
        enabled: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_bleed_output(module, brick, enabled)
    }
}
