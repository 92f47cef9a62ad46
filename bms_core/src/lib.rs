#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Battery-pack estimation and protection core (hardware-agnostic).
//!
//! All hardware interactions go through the `bms_traits::CellMonitor`,
//! `bms_traits::CurrentSensor` and `bms_traits::BleedDriver` traits.
//!
//! ## Architecture
//!
//! - **Lookup**: monotone-table interpolation with clamping (`lookup`, `tables`)
//! - **Fault integration**: per-channel leaky buckets (`leaky_bucket`)
//! - **Pack model**: brick ranking and min/max/avg aggregation (`ranking`, `pack`)
//! - **Balancing**: bleed plan from ranked voltages (`balancing`)
//! - **Estimation**: OCV and coulomb-counting SOC/SOE (`soc`, `persist`)
//! - **Cycle**: acquire → aggregate → balance → estimate (`BmsCore`)
//!
//! ## Fixed-Point Arithmetic
//!
//! The coulomb counter accumulates in **microcoulombs** (`i64`) so long runs
//! integrate without drift; see `fixed_point::charge_uc`.

pub mod balancing;
pub mod builder;
pub mod config;
pub mod conversions;
pub mod cycle;
pub mod error;
pub mod fixed_point;
pub mod handle;
pub mod hw_error;
pub mod leaky_bucket;
pub mod lookup;
pub mod mocks;
pub mod pack;
pub mod persist;
pub mod ranking;
pub mod runner;
pub mod sampler;
pub mod soc;
pub mod status;
pub mod tables;
pub mod thermistor;
pub mod util;

pub use balancing::{BalanceMode, BalanceOutcome, BleedMask, InhibitReason, Interlocks};
pub use builder::{Bms, BmsBuilder, BmsG, BmsSettings, Missing, Set, build_bms};
pub use config::{
    AcquisitionCfg, AggregationCfg, BalancingCfg, EstimatorCfg, LeakyBucketCfg, PackLayout,
    PersistenceCfg,
};
pub use cycle::BmsCore;
pub use error::{BmsError, BuildError, Result};
pub use handle::BmsHandle;
pub use leaky_bucket::{LeakyBucket, SharedLeakyBucket};
pub use lookup::{LookupTable, lookup};
pub use pack::{Pack, PackAggregates, Stats};
pub use persist::CoulombSnapshot;
pub use runner::{RunOptions, RunSummary, SamplingMode};
pub use soc::{ChargeEstimate, SeedSource};
pub use status::{AcquisitionHealth, CycleReport};
pub use thermistor::{SenseKind, Thermistors};
