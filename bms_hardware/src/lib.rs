//! Hardware adapters for the BMS core.
//!
//! Only the simulated pack ships today; it implements every acquisition and
//! actuation trait from `bms_traits` against a shared in-memory model.

pub mod error;
pub mod sim;

pub use sim::{SimBleedDriver, SimCurrentSensor, SimMonitor, SimParams, SimulatedPack};
