//! Per-cycle report returned from each orchestrator step.

use std::time::Duration;

use crate::balancing::{BalanceOutcome, BleedMask};
use crate::pack::PackAggregates;
use crate::soc::ChargeEstimate;

/// Latch state and fill level of every acquisition channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcquisitionHealth {
    pub voltage_degraded: bool,
    pub temperature_degraded: bool,
    pub current_degraded: bool,
    pub voltage_fill: u32,
    pub temperature_fill: u32,
    pub current_fill: u32,
}

impl AcquisitionHealth {
    pub fn any_degraded(&self) -> bool {
        self.voltage_degraded || self.temperature_degraded || self.current_degraded
    }
}

/// What happened in one acquire → aggregate → balance → estimate cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub dt: Duration,
    /// This cycle's acquisitions succeeded; stale data was held otherwise.
    pub voltages_fresh: bool,
    pub temperatures_fresh: bool,
    pub current_fresh: bool,
    /// Bus current used this cycle, amps, positive = discharge.
    pub current_a: f32,
    pub health: AcquisitionHealth,
    pub pack: PackAggregates,
    pub balance: BalanceOutcome,
    pub bleeding: BleedMask,
    pub bleed_errors: usize,
    pub estimate: ChargeEstimate,
}
