//! `From` implementations bridging `bms_config` types to `bms_core` types.

use std::time::Duration;

use crate::config::{
    AcquisitionCfg, AggregationCfg, BalancingCfg, EstimatorCfg, LeakyBucketCfg, PackLayout,
    PersistenceCfg,
};
use crate::fixed_point::capacity_mc;
use crate::runner::SamplingMode;
use crate::thermistor::SenseKind;

// ── PackLayout ───────────────────────────────────────────────────────────────

impl From<&bms_config::PackCfg> for PackLayout {
    fn from(c: &bms_config::PackCfg) -> Self {
        Self {
            modules: c.modules,
            bricks_per_module: c.bricks_per_module,
            board_temps_per_module: c.board_temps_per_module,
        }
    }
}

// ── Acquisition ──────────────────────────────────────────────────────────────

impl From<&bms_config::BucketCfg> for LeakyBucketCfg {
    fn from(c: &bms_config::BucketCfg) -> Self {
        Self {
            fill_threshold: c.fill_threshold,
            clear_threshold: c.clear_threshold,
            failure_fill_count: c.failure_fill_count,
            success_drain_count: c.success_drain_count,
        }
    }
}

impl From<bms_config::SenseKind> for SenseKind {
    fn from(k: bms_config::SenseKind) -> Self {
        match k {
            bms_config::SenseKind::Ntc => Self::Ntc,
            bms_config::SenseKind::Zener => Self::Zener,
        }
    }
}

impl From<&bms_config::AcquisitionCfg> for AcquisitionCfg {
    fn from(c: &bms_config::AcquisitionCfg) -> Self {
        Self {
            voltage: (&c.voltage).into(),
            temperature: (&c.temperature).into(),
            current: (&c.current).into(),
            brick_sensor: c.brick_sensor.into(),
            board_sensor: c.board_sensor.into(),
        }
    }
}

// ── Aggregation / balancing ──────────────────────────────────────────────────

impl From<&bms_config::AggregationCfg> for AggregationCfg {
    fn from(c: &bms_config::AggregationCfg) -> Self {
        Self {
            min_valid_brick_v: c.min_valid_brick_v,
            max_valid_brick_v: c.max_valid_brick_v,
            min_valid_temp_c: c.min_valid_temp_c,
            max_valid_temp_c: c.max_valid_temp_c,
            stack_block_tolerance_v: c.stack_block_tolerance_v,
        }
    }
}

impl From<&bms_config::BalancingCfg> for BalancingCfg {
    fn from(c: &bms_config::BalancingCfg) -> Self {
        Self {
            threshold_v: c.threshold_v,
            max_bleed_temp_c: c.max_bleed_temp_c,
        }
    }
}

// ── Estimator ────────────────────────────────────────────────────────────────

/// Needs the whole config: rated capacity lives under `[pack]`.
impl From<&bms_config::Config> for EstimatorCfg {
    fn from(c: &bms_config::Config) -> Self {
        Self {
            rest_current_a: c.estimator.rest_current_a,
            qualification: Duration::from_secs(c.estimator.qualification_s),
            reseed_on_ocv_good: c.estimator.reseed_on_ocv_good,
            capacity_mc: capacity_mc(c.pack.cell_capacity_mah, c.pack.parallel_cells),
        }
    }
}

// ── Persistence / runner ─────────────────────────────────────────────────────

impl From<&bms_config::PersistenceCfg> for PersistenceCfg {
    fn from(c: &bms_config::PersistenceCfg) -> Self {
        Self {
            state_file: c.state_file.as_ref().map(std::path::PathBuf::from),
            max_seed_age: Duration::from_secs(c.max_seed_age_s),
            save_every_cycles: c.save_every_cycles,
        }
    }
}

impl From<&bms_config::RunnerCfg> for SamplingMode {
    fn from(c: &bms_config::RunnerCfg) -> Self {
        match c.mode {
            bms_config::RunMode::Direct => Self::Direct,
            bms_config::RunMode::Sampler => Self::Paced(c.current_sample_hz),
        }
    }
}
