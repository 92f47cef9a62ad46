//! Runtime configuration types for the BMS core.
//!
//! These are the validated structs `BmsCore` runs on. They are separate from
//! the TOML-deserialized config in `bms_config`; see `conversions` for the
//! bridge.

use std::time::Duration;

use crate::thermistor::SenseKind;

/// Fixed pack layout, set once at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackLayout {
    pub modules: usize,
    pub bricks_per_module: usize,
    pub board_temps_per_module: usize,
}

impl Default for PackLayout {
    fn default() -> Self {
        Self {
            modules: 1,
            bricks_per_module: 12,
            board_temps_per_module: 4,
        }
    }
}

/// Thresholds and increments of one leaky bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakyBucketCfg {
    pub fill_threshold: u32,
    pub clear_threshold: u32,
    pub failure_fill_count: u32,
    pub success_drain_count: u32,
}

impl Default for LeakyBucketCfg {
    fn default() -> Self {
        Self {
            fill_threshold: 200,
            clear_threshold: 100,
            failure_fill_count: 10,
            success_drain_count: 1,
        }
    }
}

/// One bucket per acquisition channel plus the temperature front ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquisitionCfg {
    pub voltage: LeakyBucketCfg,
    pub temperature: LeakyBucketCfg,
    pub current: LeakyBucketCfg,
    pub brick_sensor: SenseKind,
    pub board_sensor: SenseKind,
}

/// Plausibility windows for raw readings.
#[derive(Debug, Clone, Copy)]
pub struct AggregationCfg {
    pub min_valid_brick_v: f32,
    pub max_valid_brick_v: f32,
    pub min_valid_temp_c: f32,
    pub max_valid_temp_c: f32,
    /// Stack (sum of bricks) vs. block (measured) divergence that flags a module.
    pub stack_block_tolerance_v: f32,
}

impl Default for AggregationCfg {
    fn default() -> Self {
        Self {
            min_valid_brick_v: 0.5,
            max_valid_brick_v: 5.0,
            min_valid_temp_c: -40.0,
            max_valid_temp_c: 120.0,
            stack_block_tolerance_v: 0.5,
        }
    }
}

impl AggregationCfg {
    #[inline]
    pub fn brick_valid(&self, v: f32) -> bool {
        v.is_finite() && v >= self.min_valid_brick_v && v <= self.max_valid_brick_v
    }

    #[inline]
    pub fn temp_valid(&self, c: f32) -> bool {
        c.is_finite() && c >= self.min_valid_temp_c && c <= self.max_valid_temp_c
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BalancingCfg {
    /// Relative-mode margin above the pack minimum, volts.
    pub threshold_v: f32,
    /// No bleeding while any cell is hotter than this.
    pub max_bleed_temp_c: f32,
}

impl Default for BalancingCfg {
    fn default() -> Self {
        Self {
            threshold_v: 0.002,
            max_bleed_temp_c: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EstimatorCfg {
    /// Below this current magnitude the pack counts as resting.
    pub rest_current_a: f32,
    /// Rest time before the OCV estimate is trusted.
    pub qualification: Duration,
    /// Re-seed the coulomb counter when the OCV estimate becomes trusted.
    pub reseed_on_ocv_good: bool,
    /// Rated pack charge.
    pub capacity_mc: f64,
}

impl Default for EstimatorCfg {
    fn default() -> Self {
        Self {
            rest_current_a: 0.5,
            qualification: Duration::from_secs(300),
            reseed_on_ocv_good: false,
            capacity_mc: crate::fixed_point::capacity_mc(3000.0, 1),
        }
    }
}

/// Seed persistence. `state_file = None` disables it.
#[derive(Debug, Clone, Default)]
pub struct PersistenceCfg {
    pub state_file: Option<std::path::PathBuf>,
    pub max_seed_age: Duration,
    pub save_every_cycles: u64,
}
