use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bms_traits::CurrentSensor;
use bms_traits::clock::MonotonicClock;
use eyre::WrapErr;

use crate::builder::{BmsBuilder, Missing, Set};
use crate::config::PersistenceCfg;
use crate::error::Result as CoreResult;
use crate::handle::BmsHandle;
use crate::leaky_bucket::{LeakyBucket, SharedLeakyBucket};
use crate::persist::{load_snapshot, save_snapshot, unix_now_s};
use crate::sampler::CurrentSampler;
use crate::soc::{ChargeEstimate, SeedSource};
use crate::status::{AcquisitionHealth, CycleReport};

/// How bus current should be sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Read inside the cycle via `CurrentSensor::read_bus_current`
    Direct,
    /// Sample on a background thread at the given Hz
    Paced(u32),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop after this many cycles; None runs until shutdown.
    pub cycles: Option<u64>,
    pub cycle_period: Duration,
    pub mode: SamplingMode,
    pub persistence: PersistenceCfg,
    pub shutdown: Option<Arc<AtomicBool>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cycles: None,
            cycle_period: Duration::from_millis(50),
            mode: SamplingMode::Direct,
            persistence: PersistenceCfg::default(),
            shutdown: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub cycles: u64,
    pub estimate: ChargeEstimate,
    pub health: AcquisitionHealth,
    pub last: Option<CycleReport>,
}

/// Threshold after which a silent sampler counts as a current failure.
///
/// At least two cycles, so a sampler that is merely slower than the cycle
/// does not trip it, and at least four sample periods.
#[inline]
fn stall_threshold_ms(sample_period: Duration, cycle_period: Duration) -> u64 {
    let four_samples = sample_period.saturating_mul(4);
    let two_cycles = cycle_period.saturating_mul(2);
    let ms = four_samples.max(two_cycles).as_millis();
    (ms.min(u128::from(u64::MAX)) as u64).max(1)
}

/// Build from `builder`, restore the persisted seed, and cycle until the
/// cycle budget runs out or shutdown is requested. Bleeding is turned off and
/// the coulomb counter saved on the way out.
pub fn run<S>(
    builder: BmsBuilder<Set, Missing, Set>,
    current: S,
    opts: RunOptions,
    mut on_cycle: impl FnMut(&CycleReport),
) -> CoreResult<RunSummary>
where
    S: CurrentSensor + Send + 'static,
{
    let state_file = opts.persistence.state_file.as_deref();
    let persisted = match state_file.map(load_snapshot).transpose() {
        Ok(snap) => snap.flatten(),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "ignoring unreadable coulomb snapshot");
            None
        }
    };
    let builder = builder.with_persisted_seed(persisted, opts.persistence.max_seed_age);

    let (handle, sampler) = match opts.mode {
        SamplingMode::Direct => (BmsHandle::new(builder.with_current_sensor(current).build()?), None),
        SamplingMode::Paced(hz) => {
            let bucket = SharedLeakyBucket::new(
                LeakyBucket::new("current", builder.acquisition().current)
                    .map_err(eyre::Report::new)?,
            );
            // Cycle reads come through step_with_current, never the sensor.
            let bms = builder
                .with_current_bucket(bucket.clone())
                .with_current_sensor(crate::mocks::NoopCurrentSensor)
                .build()?;
            let sampler = CurrentSampler::spawn(current, hz, bucket, MonotonicClock::new());
            (BmsHandle::new(bms), Some(sampler))
        }
    };

    tracing::info!(mode = ?opts.mode, cycles = ?opts.cycles, "bms run start");
    let outcome = drive(&handle, sampler.as_ref(), &opts, &mut on_cycle);
    drop(sampler);

    if let Err(e) = handle.disable_bleeding() {
        tracing::error!(error = %format!("{e:#}"), "failed to disable bleeding on exit");
    }
    if let Some(path) = state_file {
        save_if_seeded(&handle, path);
    }

    let (cycles, last) = outcome?;
    let summary = RunSummary {
        cycles,
        estimate: handle.charge_estimate(),
        health: handle.health(),
        last,
    };
    tracing::info!(
        cycles,
        soc_by_cc = summary.estimate.soc_by_cc,
        soc_by_ocv = summary.estimate.soc_by_ocv,
        "bms run complete"
    );
    Ok(summary)
}

fn drive(
    handle: &BmsHandle,
    sampler: Option<&CurrentSampler>,
    opts: &RunOptions,
    on_cycle: &mut impl FnMut(&CycleReport),
) -> CoreResult<(u64, Option<CycleReport>)> {
    let clock = handle.with(|b| b.clock());
    let stop_requested = || {
        opts.shutdown
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    };
    let stall_ms = sampler.map(|s| stall_threshold_ms(s.period(), opts.cycle_period));
    let save_every = opts.persistence.save_every_cycles;

    let mut cycles = 0_u64;
    let mut last = None;
    while opts.cycles.is_none_or(|max| cycles < max) {
        if stop_requested() {
            tracing::info!(cycles, "shutdown requested");
            break;
        }
        let report = match sampler {
            None => handle.step(),
            Some(s) => {
                let mean = s.drain_mean();
                if mean.is_none() && stall_ms.is_some_and(|t| s.stalled_for_ms() > t) {
                    handle.with(|b| b.current_bucket()).on_failure();
                }
                handle.step_with_current(mean)
            }
        }
        .wrap_err_with(|| format!("cycle {}", cycles + 1))?;

        on_cycle(&report);
        cycles += 1;
        last = Some(report);

        if save_every > 0 && cycles % save_every == 0 {
            if let Some(path) = opts.persistence.state_file.as_deref() {
                save_if_seeded(handle, path);
            }
        }
        clock.sleep(opts.cycle_period);
    }
    Ok((cycles, last))
}

/// Persist the counter unless it still holds the placeholder seed.
fn save_if_seeded(handle: &BmsHandle, path: &Path) {
    if handle.charge_estimate().seed == SeedSource::Unknown {
        tracing::debug!("coulomb counter unseeded, not saving");
        return;
    }
    let snap = handle.snapshot(unix_now_s());
    if let Err(e) = save_snapshot(path, &snap) {
        tracing::warn!(error = %format!("{e:#}"), "failed to save coulomb snapshot");
    }
}
