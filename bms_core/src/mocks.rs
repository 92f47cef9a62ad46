//! Test and helper mocks for bms_core

use bms_traits::{ModuleTemperatureFrame, ModuleVoltageFrame};

type HwResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A current sensor that always errors; stands in when current is sampled
/// on a separate thread and fed through `step_with_current`.
pub struct NoopCurrentSensor;

impl bms_traits::CurrentSensor for NoopCurrentSensor {
    fn read_bus_current(&mut self) -> HwResult<f32> {
        Err(Box::new(std::io::Error::other("noop current sensor")))
    }
}

/// A monitor with nothing attached; every acquisition fails.
pub struct NoopMonitor;

impl bms_traits::CellMonitor for NoopMonitor {
    fn acquire_module_voltages(&mut self, _module_count: usize) -> HwResult<Vec<ModuleVoltageFrame>> {
        Err(Box::new(std::io::Error::other("noop monitor")))
    }

    fn acquire_module_temperatures(
        &mut self,
        _module_count: usize,
    ) -> HwResult<Vec<ModuleTemperatureFrame>> {
        Err(Box::new(std::io::Error::other("noop monitor")))
    }
}

/// Accepts and discards every bleed command.
pub struct NoopBleedDriver;

impl bms_traits::BleedDriver for NoopBleedDriver {
    fn set_bleed_output(&mut self, _module: usize, _brick: usize, _enabled: bool) -> HwResult<()> {
        Ok(())
    }
}
