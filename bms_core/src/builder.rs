//! Type-state builder for `Bms` and generic `build_bms` constructor.
//!
//! The builder enforces at compile time that a cell monitor, a current sensor
//! and a bleed driver are provided before `build()` is available. `try_build()`
//! is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use bms_traits::clock::{Clock, MonotonicClock};
use bms_traits::{BleedDriver, CellMonitor, CurrentSensor};

use crate::balancing::{BalanceMode, BalanceOutcome, BleedMask, Interlocks};
use crate::config::*;
use crate::cycle::{BmsCore, PendingSeed};
use crate::error::{BuildError, Result};
use crate::leaky_bucket::{LeakyBucket, SharedLeakyBucket};
use crate::lookup::LookupTable;
use crate::pack::{Pack, PackAggregates};
use crate::persist::{CoulombSnapshot, unix_now_s};
use crate::soc::{ChargeEstimate, ChargeEstimator, SeedSource};
use crate::status::{AcquisitionHealth, CycleReport};
use crate::tables;
use crate::thermistor::Thermistors;

pub type DynMonitor = Box<dyn CellMonitor + Send>;
pub type DynCurrentSensor = Box<dyn CurrentSensor + Send>;
pub type DynBleedDriver = Box<dyn BleedDriver + Send>;

// ── Public dynamic-dispatch wrapper ──────────────────────────────────────────

/// Boxed BMS over trait-object hardware.
pub struct Bms {
    pub(crate) inner: BmsCore<DynMonitor, DynCurrentSensor, DynBleedDriver>,
}

impl core::fmt::Debug for Bms {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bms")
            .field("layout", &self.inner.pack.layout())
            .field("cycle", &self.inner.cycle)
            .field("seed", &self.inner.estimator.seed())
            .finish()
    }
}

impl Bms {
    /// Start building a Bms.
    pub fn builder() -> BmsBuilder<Missing, Missing, Missing> {
        BmsBuilder::default()
    }

    /// One acquire → aggregate → balance → estimate cycle.
    pub fn step(&mut self) -> Result<CycleReport> {
        self.inner.step()
    }

    /// Same as `step`, with current sampled on another thread.
    pub fn step_with_current(&mut self, current_a: Option<f32>) -> Result<CycleReport> {
        self.inner.step_with_current(current_a)
    }

    pub fn run_balancing_cycle(&mut self, mode: BalanceMode) -> Result<BalanceOutcome> {
        self.inner.run_balancing_cycle(mode)
    }

    pub fn set_balance_mode(&mut self, mode: BalanceMode) {
        self.inner.set_balance_mode(mode);
    }

    pub fn balance_mode(&self) -> BalanceMode {
        self.inner.balance_mode()
    }

    pub fn set_charging_disabled(&mut self, disabled: bool) {
        self.inner.set_charging_disabled(disabled);
    }

    pub fn set_fault_active(&mut self, active: bool) {
        self.inner.set_fault_active(active);
    }

    /// Turn every bleed output off.
    pub fn disable_bleeding(&mut self) -> Result<()> {
        self.inner.disable_bleeding()
    }

    pub fn pack(&self) -> &Pack {
        self.inner.pack()
    }

    pub fn pack_aggregates(&self) -> PackAggregates {
        self.inner.pack_aggregates()
    }

    pub fn charge_estimate(&self) -> ChargeEstimate {
        self.inner.charge_estimate()
    }

    pub fn is_acquisition_degraded(&self) -> bool {
        self.inner.is_acquisition_degraded()
    }

    pub fn health(&self) -> AcquisitionHealth {
        self.inner.health()
    }

    pub fn bleeding(&self) -> BleedMask {
        self.inner.bleeding()
    }

    pub fn last_balance(&self) -> BalanceOutcome {
        self.inner.last_balance()
    }

    pub fn cycle_count(&self) -> u64 {
        self.inner.cycle_count()
    }

    pub fn snapshot(&self, now_unix_s: u64) -> CoulombSnapshot {
        self.inner.snapshot(now_unix_s)
    }

    pub fn current_bucket(&self) -> SharedLeakyBucket {
        self.inner.current_bucket()
    }

    /// Clock the cycle measures `dt` with.
    pub fn clock(&self) -> Arc<dyn Clock + Send + Sync> {
        self.inner.clock()
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Everything but the hardware. Shared by the builder and `build_bms`.
pub struct BmsSettings {
    pub layout: PackLayout,
    pub acquisition: AcquisitionCfg,
    pub aggregation: AggregationCfg,
    pub balancing: BalancingCfg,
    pub estimator: EstimatorCfg,
    pub balance_mode: BalanceMode,
    /// OCV → SOC and SOC → SOE; built-in cell tables when None.
    pub tables: Option<(Arc<LookupTable>, Arc<LookupTable>)>,
    pub thermistors: Option<Thermistors>,
    pub clock: Option<Box<dyn Clock + Send + Sync>>,
    /// Externally owned current bucket, e.g. one a sampler thread reports into.
    pub current_bucket: Option<SharedLeakyBucket>,
    pub persisted: Option<CoulombSnapshot>,
    pub max_seed_age: Duration,
    /// Wall-clock seconds used to age the persisted snapshot.
    pub now_unix_s: Option<u64>,
}

impl Default for BmsSettings {
    fn default() -> Self {
        Self {
            layout: PackLayout::default(),
            acquisition: AcquisitionCfg::default(),
            aggregation: AggregationCfg::default(),
            balancing: BalancingCfg::default(),
            estimator: EstimatorCfg::default(),
            balance_mode: BalanceMode::Off,
            tables: None,
            thermistors: None,
            clock: None,
            current_bucket: None,
            persisted: None,
            max_seed_age: Duration::from_secs(24 * 3600),
            now_unix_s: None,
        }
    }
}

/// Builder for `Bms`. All fields are validated on `build()`.
pub struct BmsBuilder<M, C, B> {
    monitor: Option<DynMonitor>,
    current: Option<DynCurrentSensor>,
    bleed: Option<DynBleedDriver>,
    settings: BmsSettings,
    _m: PhantomData<M>,
    _c: PhantomData<C>,
    _b: PhantomData<B>,
}

impl Default for BmsBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            monitor: None,
            current: None,
            bleed: None,
            settings: BmsSettings::default(),
            _m: PhantomData,
            _c: PhantomData,
            _b: PhantomData,
        }
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Validate configuration and construct a `BmsCore`.
///
/// This is the single source of truth for validation and construction,
/// used by both `BmsBuilder::try_build()` and `build_bms()`.
fn validate_and_build<M: CellMonitor, C: CurrentSensor, B: BleedDriver>(
    monitor: M,
    current: C,
    bleed: B,
    settings: BmsSettings,
) -> Result<BmsCore<M, C, B>> {
    // ── Validation ───────────────────────────────────────────────────────────
    let BmsSettings {
        layout,
        acquisition,
        aggregation,
        balancing,
        estimator,
        balance_mode,
        tables: chemistry,
        thermistors,
        clock,
        current_bucket,
        persisted,
        max_seed_age,
        now_unix_s,
    } = settings;

    let pack = Pack::new(layout).map_err(eyre::Report::new)?;
    if !(aggregation.min_valid_brick_v < aggregation.max_valid_brick_v) {
        return Err(invalid("brick voltage window is empty"));
    }
    if !(aggregation.min_valid_temp_c < aggregation.max_valid_temp_c) {
        return Err(invalid("temperature window is empty"));
    }
    if !(aggregation.stack_block_tolerance_v >= 0.0) {
        return Err(invalid("stack_block_tolerance_v must be >= 0"));
    }
    if !(balancing.threshold_v >= 0.0) {
        return Err(invalid("balancing threshold_v must be >= 0"));
    }
    if !balancing.max_bleed_temp_c.is_finite() {
        return Err(invalid("max_bleed_temp_c must be finite"));
    }
    if !(estimator.rest_current_a > 0.0) {
        return Err(invalid("rest_current_a must be > 0"));
    }
    if !(estimator.capacity_mc.is_finite() && estimator.capacity_mc > 0.0) {
        return Err(invalid("capacity must be > 0"));
    }

    let voltage_bucket =
        LeakyBucket::new("voltage", acquisition.voltage).map_err(eyre::Report::new)?;
    let temperature_bucket =
        LeakyBucket::new("temperature", acquisition.temperature).map_err(eyre::Report::new)?;
    let current_bucket = match current_bucket {
        Some(b) => b,
        None => SharedLeakyBucket::new(
            LeakyBucket::new("current", acquisition.current).map_err(eyre::Report::new)?,
        ),
    };

    // ── Tables ───────────────────────────────────────────────────────────────
    let (soc_by_ocv, soe_from_soc) = match chemistry {
        Some(t) => t,
        None => (
            Arc::new(tables::vtc6_soc_by_ocv().map_err(eyre::Report::new)?),
            Arc::new(tables::vtc6_soe_from_soc().map_err(eyre::Report::new)?),
        ),
    };
    let thermistors = match thermistors {
        Some(t) => t,
        None => Thermistors::builtin().map_err(eyre::Report::new)?,
    };

    // Placeholder seed until the first acquisition resolves the real one.
    let estimator = ChargeEstimator::new(
        estimator,
        soc_by_ocv,
        soe_from_soc,
        0.5 * estimator.capacity_mc,
        SeedSource::Unknown,
    );

    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(b) => Arc::from(b),
        None => Arc::new(MonotonicClock::new()),
    };
    let last_step = clock.now();

    Ok(BmsCore {
        monitor,
        current,
        bleed,
        acquisition,
        aggregation,
        balancing,
        pack,
        thermistors,
        estimator,
        voltage_bucket,
        temperature_bucket,
        current_bucket,
        clock,
        last_step,
        last_current_a: 0.0,
        interlocks: Interlocks::default(),
        balance_mode,
        last_balance: BalanceOutcome::Off,
        applied: BleedMask::default(),
        bleed_synced: false,
        pending_seed: Some(PendingSeed {
            persisted,
            max_age: max_seed_age,
            now_unix_s: now_unix_s.unwrap_or_else(unix_now_s),
        }),
        cycle: 0,
        mismatch_reported: false,
    })
}

impl<M, C, B> BmsBuilder<M, C, B> {
    pub(crate) fn acquisition(&self) -> AcquisitionCfg {
        self.settings.acquisition
    }

    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<Bms> {
        let monitor = self
            .monitor
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMonitor))?;
        let current = self
            .current
            .ok_or_else(|| eyre::Report::new(BuildError::MissingCurrentSensor))?;
        let bleed = self
            .bleed
            .ok_or_else(|| eyre::Report::new(BuildError::MissingBleedDriver))?;

        let inner = validate_and_build(monitor, current, bleed, self.settings)?;
        Ok(Bms { inner })
    }
}

/// Chainable setters that do not affect type-state.
impl<M, C, B> BmsBuilder<M, C, B> {
    pub fn with_layout(mut self, layout: PackLayout) -> Self {
        self.settings.layout = layout;
        self
    }
    pub fn with_acquisition(mut self, acquisition: AcquisitionCfg) -> Self {
        self.settings.acquisition = acquisition;
        self
    }
    pub fn with_aggregation(mut self, aggregation: AggregationCfg) -> Self {
        self.settings.aggregation = aggregation;
        self
    }
    pub fn with_balancing(mut self, balancing: BalancingCfg) -> Self {
        self.settings.balancing = balancing;
        self
    }
    pub fn with_estimator(mut self, estimator: EstimatorCfg) -> Self {
        self.settings.estimator = estimator;
        self
    }
    pub fn with_balance_mode(mut self, mode: BalanceMode) -> Self {
        self.settings.balance_mode = mode;
        self
    }
    /// Replace the built-in OCV → SOC and SOC → SOE tables.
    pub fn with_tables(mut self, soc_by_ocv: Arc<LookupTable>, soe_from_soc: Arc<LookupTable>) -> Self {
        self.settings.tables = Some((soc_by_ocv, soe_from_soc));
        self
    }
    pub fn with_thermistors(mut self, thermistors: Thermistors) -> Self {
        self.settings.thermistors = Some(thermistors);
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.settings.clock = Some(clock);
        self
    }
    pub fn with_current_bucket(mut self, bucket: SharedLeakyBucket) -> Self {
        self.settings.current_bucket = Some(bucket);
        self
    }
    /// Seed candidate from the previous run; applied on the first cycle if
    /// younger than `max_age`.
    pub fn with_persisted_seed(mut self, snapshot: Option<CoulombSnapshot>, max_age: Duration) -> Self {
        self.settings.persisted = snapshot;
        self.settings.max_seed_age = max_age;
        self
    }
    /// Override wall-clock time used to age the persisted seed.
    pub fn with_wall_time(mut self, now_unix_s: u64) -> Self {
        self.settings.now_unix_s = Some(now_unix_s);
        self
    }
}

// Setters that advance type-state
impl<C, B> BmsBuilder<Missing, C, B> {
    pub fn with_monitor(self, monitor: impl CellMonitor + Send + 'static) -> BmsBuilder<Set, C, B> {
        BmsBuilder {
            monitor: Some(Box::new(monitor)),
            current: self.current,
            bleed: self.bleed,
            settings: self.settings,
            _m: PhantomData,
            _c: PhantomData,
            _b: PhantomData,
        }
    }
}

impl<M, B> BmsBuilder<M, Missing, B> {
    pub fn with_current_sensor(
        self,
        current: impl CurrentSensor + Send + 'static,
    ) -> BmsBuilder<M, Set, B> {
        BmsBuilder {
            monitor: self.monitor,
            current: Some(Box::new(current)),
            bleed: self.bleed,
            settings: self.settings,
            _m: PhantomData,
            _c: PhantomData,
            _b: PhantomData,
        }
    }
}

impl<M, C> BmsBuilder<M, C, Missing> {
    pub fn with_bleed_driver(
        self,
        bleed: impl BleedDriver + Send + 'static,
    ) -> BmsBuilder<M, C, Set> {
        BmsBuilder {
            monitor: self.monitor,
            current: self.current,
            bleed: Some(Box::new(bleed)),
            settings: self.settings,
            _m: PhantomData,
            _c: PhantomData,
            _b: PhantomData,
        }
    }
}

impl BmsBuilder<Set, Set, Set> {
    /// Validate and build the Bms. Only available when all hardware is set.
    pub fn build(self) -> Result<Bms> {
        self.try_build()
    }
}

/// Generic, statically-dispatched alias using the unified core.
pub type BmsG<M, C, B> = BmsCore<M, C, B>;

/// Build a generic, statically-dispatched `BmsG` from concrete hardware.
///
/// Delegates to the shared `validate_and_build`.
pub fn build_bms<M, C, B>(monitor: M, current: C, bleed: B, settings: BmsSettings) -> Result<BmsG<M, C, B>>
where
    M: CellMonitor + 'static,
    C: CurrentSensor + 'static,
    B: BleedDriver + 'static,
{
    validate_and_build(monitor, current, bleed, settings)
}
