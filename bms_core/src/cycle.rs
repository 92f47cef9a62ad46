//! The unified acquisition and estimation cycle (`BmsCore`).
//!
//! Every cycle runs acquire → aggregate → balance → estimate, in that order,
//! against one consistent snapshot of the pack. Acquisition failures feed the
//! per-channel leaky buckets and hold the previous samples; a latched bucket
//! marks the pack degraded, which inhibits balancing and stops the OCV track
//! from qualifying. A latched current channel also freezes the coulomb
//! counter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bms_traits::{
    BleedDriver, CellMonitor, Clock, CurrentSensor, ModuleTemperatureFrame, ModuleVoltageFrame,
};
use eyre::WrapErr;

use crate::balancing::{
    BalanceDecision, BalanceMode, BalanceOutcome, BleedMask, Interlocks, plan_balancing,
};
use crate::config::{AcquisitionCfg, AggregationCfg, BalancingCfg};
use crate::error::Result;
use crate::hw_error::map_hw_error;
use crate::leaky_bucket::{LeakyBucket, SharedLeakyBucket};
use crate::pack::{FrameError, Pack, PackAggregates};
use crate::persist::CoulombSnapshot;
use crate::soc::{ChargeEstimate, ChargeEstimator, EstimatorInput, initial_seed};
use crate::status::{AcquisitionHealth, CycleReport};
use crate::thermistor::Thermistors;

/// Startup seed waiting for the first acquisition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingSeed {
    pub(crate) persisted: Option<CoulombSnapshot>,
    pub(crate) max_age: Duration,
    pub(crate) now_unix_s: u64,
}

/// Unified core for both dynamic (boxed) and generic (static dispatch) variants.
pub struct BmsCore<M: CellMonitor, C: CurrentSensor, B: BleedDriver> {
    pub(crate) monitor: M,
    pub(crate) current: C,
    pub(crate) bleed: B,
    pub(crate) acquisition: AcquisitionCfg,
    pub(crate) aggregation: AggregationCfg,
    pub(crate) balancing: BalancingCfg,
    pub(crate) pack: Pack,
    pub(crate) thermistors: Thermistors,
    pub(crate) estimator: ChargeEstimator,
    pub(crate) voltage_bucket: LeakyBucket,
    pub(crate) temperature_bucket: LeakyBucket,
    pub(crate) current_bucket: SharedLeakyBucket,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) last_step: Instant,

    /// Zero-order hold of the last good current reading.
    pub(crate) last_current_a: f32,
    pub(crate) interlocks: Interlocks,
    pub(crate) balance_mode: BalanceMode,
    pub(crate) last_balance: BalanceOutcome,
    /// What the bleed outputs were last successfully driven to.
    pub(crate) applied: BleedMask,
    pub(crate) bleed_synced: bool,
    pub(crate) pending_seed: Option<PendingSeed>,
    pub(crate) cycle: u64,
    pub(crate) mismatch_reported: bool,
}

impl<M: CellMonitor, C: CurrentSensor, B: BleedDriver> core::fmt::Debug for BmsCore<M, C, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BmsCore")
            .field("layout", &self.pack.layout())
            .field("cycle", &self.cycle)
            .field("balance_mode", &self.balance_mode)
            .field("degraded", &self.is_acquisition_degraded())
            .field("soc_by_cc", &self.estimator.estimate().soc_by_cc)
            .finish()
    }
}

impl<M: CellMonitor, C: CurrentSensor, B: BleedDriver> BmsCore<M, C, B> {
    pub fn pack(&self) -> &Pack {
        &self.pack
    }

    /// Aggregates computed by the most recent cycle.
    pub fn pack_aggregates(&self) -> PackAggregates {
        *self.pack.aggregates()
    }

    pub fn charge_estimate(&self) -> ChargeEstimate {
        self.estimator.estimate()
    }

    pub fn estimator(&self) -> &ChargeEstimator {
        &self.estimator
    }

    /// True while any acquisition channel's bucket is latched.
    pub fn is_acquisition_degraded(&self) -> bool {
        self.health().any_degraded()
    }

    pub fn health(&self) -> AcquisitionHealth {
        AcquisitionHealth {
            voltage_degraded: self.voltage_bucket.is_filled(),
            temperature_degraded: self.temperature_bucket.is_filled(),
            current_degraded: self.current_bucket.is_filled(),
            voltage_fill: self.voltage_bucket.fill_level(),
            temperature_fill: self.temperature_bucket.fill_level(),
            current_fill: self.current_bucket.fill_level(),
        }
    }

    pub fn balance_mode(&self) -> BalanceMode {
        self.balance_mode
    }

    /// Mode applied by subsequent cycles.
    pub fn set_balance_mode(&mut self, mode: BalanceMode) {
        if mode != self.balance_mode {
            tracing::info!(?mode, "balance mode changed");
        }
        self.balance_mode = mode;
    }

    pub fn set_charging_disabled(&mut self, disabled: bool) {
        self.interlocks.charging_disabled = disabled;
    }

    pub fn set_fault_active(&mut self, active: bool) {
        self.interlocks.fault_active = active;
    }

    pub fn last_balance(&self) -> BalanceOutcome {
        self.last_balance
    }

    /// Bleed outputs as last driven.
    pub fn bleeding(&self) -> BleedMask {
        self.applied
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle
    }

    pub fn snapshot(&self, now_unix_s: u64) -> CoulombSnapshot {
        self.estimator.snapshot(now_unix_s)
    }

    pub fn clock(&self) -> Arc<dyn Clock + Send + Sync> {
        self.clock.clone()
    }

    /// Bucket the current sampler reports into; clones share state.
    pub fn current_bucket(&self) -> SharedLeakyBucket {
        self.current_bucket.clone()
    }

    /// One cycle, reading the current sensor inline.
    pub fn step(&mut self) -> Result<CycleReport> {
        let current = match self.current.read_bus_current() {
            Ok(a) if a.is_finite() => {
                self.current_bucket.on_success();
                Some(a)
            }
            Ok(a) => {
                self.current_bucket.on_failure();
                tracing::debug!(current_a = a, "non-finite current reading, holding last");
                None
            }
            Err(e) => {
                self.current_bucket.on_failure();
                let err = map_hw_error(&*e);
                tracing::debug!(error = %err, "current read failed, holding last");
                None
            }
        };
        self.step_with_current(current)
    }

    /// One cycle with a current reading sampled elsewhere. `None` holds the
    /// previous reading.
    pub fn step_with_current(&mut self, current_a: Option<f32>) -> Result<CycleReport> {
        let now = self.clock.now();
        let dt = now.saturating_duration_since(self.last_step);
        self.last_step = now;

        let current_fresh = current_a.is_some_and(f32::is_finite);
        if let Some(a) = current_a.filter(|a| a.is_finite()) {
            self.last_current_a = a;
        }

        let voltages_fresh = self.acquire_voltages();
        let temperatures_fresh = self.acquire_temperatures();

        let agg = *self.pack.aggregate(&self.aggregation);
        self.report_mismatch(&agg);

        if let Some(pending) = self.pending_seed.take() {
            self.resolve_seed(pending, &agg, current_fresh && voltages_fresh);
        }

        let (decision, bleed_errors, disable_failed) = self.balance_and_apply(self.balance_mode);

        let estimate = self.estimator.update(EstimatorInput {
            current_a: self.last_current_a,
            dt,
            min_brick_v: agg.brick_v.map(|s| s.min),
            current_fresh,
            current_trusted: !self.current_bucket.is_filled(),
            acquisition_trusted: !self.is_acquisition_degraded(),
        });
        self.cycle += 1;

        if let Some(e) = disable_failed {
            return Err(e);
        }

        Ok(CycleReport {
            cycle: self.cycle,
            dt,
            voltages_fresh,
            temperatures_fresh,
            current_fresh,
            current_a: self.last_current_a,
            health: self.health(),
            pack: agg,
            balance: decision.outcome,
            bleeding: self.applied,
            bleed_errors,
            estimate,
        })
    }

    /// Plan and apply balancing against the current aggregates without
    /// acquiring. The mode sticks for later cycles.
    pub fn run_balancing_cycle(&mut self, mode: BalanceMode) -> Result<BalanceOutcome> {
        self.set_balance_mode(mode);
        let (decision, _, disable_failed) = self.balance_and_apply(mode);
        match disable_failed {
            Some(e) => Err(e),
            None => Ok(decision.outcome),
        }
    }

    /// Drive every bleed output off.
    pub fn disable_bleeding(&mut self) -> Result<()> {
        self.bleed_synced = false;
        let (errors, first) = self.apply_mask(BleedMask::default());
        match first {
            Some(e) => Err(e).wrap_err(format!("{errors} bleed outputs failed to turn off")),
            None => Ok(()),
        }
    }

    // ── Acquisition ──────────────────────────────────────────────────────────

    fn acquire_voltages(&mut self) -> bool {
        let modules = self.pack.layout().modules;
        let outcome = self
            .monitor
            .acquire_module_voltages(modules)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("acquire module voltages")
            .and_then(|frames| {
                self.store_voltages(&frames)
                    .map_err(eyre::Report::new)
                    .wrap_err("malformed voltage frames")
            });
        match outcome {
            Ok(()) => {
                self.voltage_bucket.on_success();
                true
            }
            Err(e) => {
                self.voltage_bucket.on_failure();
                tracing::debug!(error = %format!("{e:#}"), "voltage acquisition failed");
                false
            }
        }
    }

    fn store_voltages(&mut self, frames: &[ModuleVoltageFrame]) -> std::result::Result<(), FrameError> {
        let layout = self.pack.layout();
        check_frame_count(layout.modules, frames.len())?;
        for (m, frame) in frames.iter().enumerate() {
            check_channels(m, "brick voltage", layout.bricks_per_module, frame.brick_v.len())?;
        }
        for (m, frame) in frames.iter().enumerate() {
            self.pack.set_module_voltages(m, &frame.brick_v, frame.block_v)?;
        }
        Ok(())
    }

    fn acquire_temperatures(&mut self) -> bool {
        let modules = self.pack.layout().modules;
        let outcome = self
            .monitor
            .acquire_module_temperatures(modules)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("acquire module temperatures")
            .and_then(|frames| {
                self.store_temperatures(&frames)
                    .map_err(eyre::Report::new)
                    .wrap_err("malformed temperature frames")
            });
        match outcome {
            Ok(()) => {
                self.temperature_bucket.on_success();
                true
            }
            Err(e) => {
                self.temperature_bucket.on_failure();
                tracing::debug!(error = %format!("{e:#}"), "temperature acquisition failed");
                false
            }
        }
    }

    fn store_temperatures(
        &mut self,
        frames: &[ModuleTemperatureFrame],
    ) -> std::result::Result<(), FrameError> {
        let layout = self.pack.layout();
        check_frame_count(layout.modules, frames.len())?;
        for (m, frame) in frames.iter().enumerate() {
            check_channels(m, "brick temperature", layout.bricks_per_module, frame.brick_sense_v.len())?;
            check_channels(
                m,
                "board temperature",
                layout.board_temps_per_module,
                frame.board_sense_v.len(),
            )?;
        }
        let (brick_kind, board_kind) = (self.acquisition.brick_sensor, self.acquisition.board_sensor);
        for (m, frame) in frames.iter().enumerate() {
            let brick_c: Vec<Option<f32>> = frame
                .brick_sense_v
                .iter()
                .map(|v| self.thermistors.to_celsius(brick_kind, *v))
                .collect();
            let board_c: Vec<Option<f32>> = frame
                .board_sense_v
                .iter()
                .map(|v| self.thermistors.to_celsius(board_kind, *v))
                .collect();
            self.pack.set_module_temperatures(m, &brick_c, &board_c)?;
        }
        Ok(())
    }

    fn report_mismatch(&mut self, agg: &PackAggregates) {
        let mismatched = agg.mismatched_modules > 0;
        if mismatched && !self.mismatch_reported {
            tracing::warn!(
                modules = agg.mismatched_modules,
                "stack voltage disagrees with measured block voltage"
            );
        }
        self.mismatch_reported = mismatched;
    }

    fn resolve_seed(&mut self, pending: PendingSeed, agg: &PackAggregates, readings_fresh: bool) {
        let rest_a = self.estimator.cfg().rest_current_a;
        let resting = readings_fresh && self.last_current_a.abs() < rest_a;
        let resting_min_v = if resting {
            agg.brick_v.map(|s| s.min)
        } else {
            None
        };
        let (charge_mc, source) = initial_seed(
            pending.persisted.as_ref(),
            pending.now_unix_s,
            pending.max_age,
            resting_min_v,
            self.estimator.soc_by_ocv_table(),
            self.estimator.cfg().capacity_mc,
        );
        self.estimator.reseed(charge_mc, source);
    }

    // ── Balancing ────────────────────────────────────────────────────────────

    /// Returns the decision, the number of failed bleed writes, and an error
    /// when outputs that had to turn off could not be.
    fn balance_and_apply(
        &mut self,
        mode: BalanceMode,
    ) -> (BalanceDecision, usize, Option<eyre::Report>) {
        let interlocks = Interlocks {
            acquisition_degraded: self.voltage_bucket.is_filled()
                || self.temperature_bucket.is_filled(),
            ..self.interlocks
        };
        let decision = plan_balancing(
            &self.pack,
            mode,
            interlocks,
            &self.balancing,
            &self.aggregation,
        );
        self.log_outcome_change(decision.outcome);

        let (errors, first) = self.apply_mask(decision.mask);
        let mut disable_failed = None;
        if let Some(e) = first {
            if decision.mask.is_empty() {
                disable_failed = Some(e.wrap_err(format!(
                    "{errors} bleed outputs failed to turn off while balancing is inhibited"
                )));
            } else {
                tracing::warn!(errors, error = %format!("{e:#}"), "bleed output writes failed");
            }
        }
        (decision, errors, disable_failed)
    }

    /// Drive outputs that differ from what was last applied; every output
    /// while out of sync.
    fn apply_mask(&mut self, mask: BleedMask) -> (usize, Option<eyre::Report>) {
        let layout = self.pack.layout();
        let mut errors = 0;
        let mut first = None;
        for m in 0..layout.modules {
            for b in 0..layout.bricks_per_module {
                let want = mask.is_set(m, b);
                if self.bleed_synced && self.applied.is_set(m, b) == want {
                    continue;
                }
                match self.bleed.set_bleed_output(m, b, want) {
                    Ok(()) => self.applied.assign(m, b, want),
                    Err(e) => {
                        errors += 1;
                        if first.is_none() {
                            first = Some(
                                eyre::Report::new(map_hw_error(&*e))
                                    .wrap_err(format!("set bleed module {m} brick {b} to {want}")),
                            );
                        }
                    }
                }
            }
        }
        self.bleed_synced = errors == 0;
        (errors, first)
    }

    fn log_outcome_change(&mut self, outcome: BalanceOutcome) {
        let changed =
            std::mem::discriminant(&outcome) != std::mem::discriminant(&self.last_balance)
                || matches!(
                    (outcome, self.last_balance),
                    (BalanceOutcome::Inhibited(a), BalanceOutcome::Inhibited(b))
                        if std::mem::discriminant(&a) != std::mem::discriminant(&b)
                );
        if changed {
            match outcome {
                BalanceOutcome::Inhibited(reason) => {
                    tracing::warn!(%reason, "balancing inhibited");
                }
                BalanceOutcome::Applied { threshold_v, .. } => {
                    tracing::info!(threshold_v, "balancing active");
                }
                BalanceOutcome::Off => tracing::info!("balancing off"),
            }
        }
        self.last_balance = outcome;
    }
}

fn check_frame_count(expected: usize, got: usize) -> std::result::Result<(), FrameError> {
    if expected == got {
        Ok(())
    } else {
        Err(FrameError::ModuleCount { expected, got })
    }
}

fn check_channels(
    module: usize,
    what: &'static str,
    expected: usize,
    got: usize,
) -> std::result::Result<(), FrameError> {
    if expected == got {
        Ok(())
    } else {
        Err(FrameError::ChannelCount {
            module,
            what,
            expected,
            got,
        })
    }
}
