//! Pack assembly from config, and the `run` / `health` commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use bms_core::balancing::{BalanceMode, BalanceOutcome};
use bms_core::builder::{Bms, BmsBuilder, Missing, Set};
use bms_core::config::PersistenceCfg;
use bms_core::error::Result as CoreResult;
use bms_core::pack::Stats;
use bms_core::runner::{self, RunOptions, RunSummary, SamplingMode};
use bms_core::status::{AcquisitionHealth, CycleReport};
use bms_hardware::{SimParams, SimulatedPack};
use bms_traits::{Clock, ManualClock, MonotonicClock};
use serde_json::{Value, json};
use thiserror::Error;

use crate::cli::{BalanceArg, json_mode};
use crate::tables::Chemistry;

/// Raised by `bms health` when a channel is latched degraded.
#[derive(Debug, Clone, Copy, Error)]
pub enum HealthError {
    #[error(
        "acquisition degraded (voltage={}, temperature={}, current={})",
        .0.voltage_degraded,
        .0.temperature_degraded,
        .0.current_degraded
    )]
    Degraded(AcquisitionHealth),
}

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub cycles: Option<u64>,
    pub balance: BalanceMode,
    pub direct: bool,
    pub state_file: Option<PathBuf>,
    pub verbose: bool,
}

pub fn balance_mode(arg: BalanceArg, target_v: Option<f32>) -> CoreResult<BalanceMode> {
    Ok(match arg {
        BalanceArg::Off => BalanceMode::Off,
        BalanceArg::Relative => BalanceMode::Relative,
        BalanceArg::Target => {
            let v = target_v.ok_or_else(|| eyre::eyre!("--balance target needs --target-v"))?;
            if !(v.is_finite() && v > 0.0) {
                eyre::bail!("--target-v must be a positive voltage, got {v}");
            }
            BalanceMode::ToVoltage(v)
        }
    })
}

// ── Assembly ─────────────────────────────────────────────────────────────────

fn sim_params(cfg: &bms_config::Config) -> SimParams {
    SimParams {
        modules: cfg.pack.modules,
        bricks_per_module: cfg.pack.bricks_per_module,
        board_temps_per_module: cfg.pack.board_temps_per_module,
        brick_capacity_mah: cfg.pack.cell_capacity_mah * cfg.pack.parallel_cells as f32,
        initial_soc: cfg.simulation.initial_soc,
        load_current_a: cfg.simulation.load_current_a,
        brick_spread_mv: cfg.simulation.brick_spread_mv,
        temperature_sense_v: cfg.simulation.temperature_sense_v,
        fail_voltage_every: cfg.simulation.fail_voltage_every,
        ..SimParams::default()
    }
}

/// Simulated pack plus the clock it and the core share.
pub struct Simulation {
    pub pack: SimulatedPack,
    clock: Box<dyn Clock + Send + Sync>,
}

impl Simulation {
    pub fn new(cfg: &bms_config::Config) -> Self {
        let params = sim_params(cfg);
        if cfg.simulation.fast_forward {
            let clock = ManualClock::new();
            Self {
                pack: SimulatedPack::new(params, Arc::new(clock.clone())),
                clock: Box::new(clock),
            }
        } else {
            Self {
                pack: SimulatedPack::new(params, Arc::new(MonotonicClock::new())),
                clock: Box::new(MonotonicClock::new()),
            }
        }
    }

    /// Core builder wired to this pack with every config section applied.
    /// The current sensor is left to the caller so the runner can pick the
    /// sampling mode.
    pub fn builder(
        self,
        cfg: &bms_config::Config,
        chem: &Chemistry,
        mode: BalanceMode,
    ) -> (BmsBuilder<Set, Missing, Set>, SimulatedPack) {
        let builder = Bms::builder()
            .with_layout((&cfg.pack).into())
            .with_acquisition((&cfg.acquisition).into())
            .with_aggregation((&cfg.aggregation).into())
            .with_balancing((&cfg.balancing).into())
            .with_estimator(cfg.into())
            .with_balance_mode(mode)
            .with_tables(chem.soc_by_ocv.clone(), chem.soe_from_soc.clone())
            .with_clock(self.clock)
            .with_monitor(self.pack.monitor())
            .with_bleed_driver(self.pack.bleed_driver());
        (builder, self.pack)
    }
}

fn sampling_mode(cfg: &bms_config::Config, direct: bool) -> SamplingMode {
    let mode = if direct {
        SamplingMode::Direct
    } else {
        SamplingMode::from(&cfg.runner)
    };
    // A wall-clock sampler thread cannot keep up with simulated time.
    if cfg.simulation.fast_forward && mode != SamplingMode::Direct {
        tracing::info!("fast-forward simulation: reading current inside the cycle");
        return SamplingMode::Direct;
    }
    mode
}

// ── Commands ─────────────────────────────────────────────────────────────────

pub fn run_pack(
    cfg: &bms_config::Config,
    chem: &Chemistry,
    args: &RunArgs,
    shutdown: Arc<AtomicBool>,
) -> CoreResult<RunSummary> {
    let (builder, pack) = Simulation::new(cfg).builder(cfg, chem, args.balance);

    let mut persistence = PersistenceCfg::from(&cfg.persistence);
    if let Some(p) = &args.state_file {
        persistence.state_file = Some(p.clone());
    }
    let opts = RunOptions {
        cycles: args.cycles,
        cycle_period: Duration::from_millis(cfg.runner.cycle_ms),
        mode: sampling_mode(cfg, args.direct),
        persistence,
        shutdown: Some(shutdown),
    };
    let verbose = args.verbose;
    runner::run(builder, pack.current_sensor(), opts, |r| {
        if verbose {
            print_cycle(r);
        }
    })
}

/// One direct-mode cycle against a fresh simulated pack.
pub fn health_once(cfg: &bms_config::Config, chem: &Chemistry) -> CoreResult<CycleReport> {
    let (builder, pack) = Simulation::new(cfg).builder(cfg, chem, BalanceMode::Off);
    let mut bms = builder.with_current_sensor(pack.current_sensor()).build()?;
    let report = bms.step()?;
    Ok(report)
}

/// Err when any channel is latched degraded.
pub fn check_health(health: &AcquisitionHealth) -> CoreResult<()> {
    if health.any_degraded() {
        return Err(eyre::Report::new(HealthError::Degraded(*health)));
    }
    Ok(())
}

// ── Output ───────────────────────────────────────────────────────────────────

fn stats_json(s: Option<Stats>) -> Value {
    s.map_or(Value::Null, |s| json!({ "min": s.min, "max": s.max, "avg": s.avg }))
}

pub fn health_json(h: &AcquisitionHealth) -> Value {
    json!({
        "voltage_degraded": h.voltage_degraded,
        "temperature_degraded": h.temperature_degraded,
        "current_degraded": h.current_degraded,
        "voltage_fill": h.voltage_fill,
        "temperature_fill": h.temperature_fill,
        "current_fill": h.current_fill,
    })
}

fn balance_json(b: &BalanceOutcome) -> Value {
    match b {
        BalanceOutcome::Off => json!({ "state": "off" }),
        BalanceOutcome::Inhibited(reason) => {
            json!({ "state": "inhibited", "reason": reason.to_string() })
        }
        BalanceOutcome::Applied {
            threshold_v,
            bleeding,
        } => json!({ "state": "applied", "threshold_v": threshold_v, "bleeding": bleeding }),
    }
}

pub fn report_json(r: &CycleReport) -> Value {
    json!({
        "cycle": r.cycle,
        "dt_ms": u64::try_from(r.dt.as_millis()).unwrap_or(u64::MAX),
        "current_a": r.current_a,
        "fresh": {
            "voltages": r.voltages_fresh,
            "temperatures": r.temperatures_fresh,
            "current": r.current_fresh,
        },
        "health": health_json(&r.health),
        "pack": {
            "brick_v": stats_json(r.pack.brick_v),
            "valid_bricks": r.pack.valid_bricks,
            "brick_temp_c": stats_json(r.pack.brick_temp_c),
            "board_temp_c": stats_json(r.pack.board_temp_c),
            "unavailable_modules": r.pack.unavailable_modules,
            "mismatched_modules": r.pack.mismatched_modules,
        },
        "balance": balance_json(&r.balance),
        "bleed_errors": r.bleed_errors,
        "estimate": {
            "soc_by_ocv": r.estimate.soc_by_ocv,
            "soc_by_cc": r.estimate.soc_by_cc,
            "soe_by_ocv": r.estimate.soe_by_ocv,
            "soe_by_cc": r.estimate.soe_by_cc,
            "soc_by_ocv_good": r.estimate.soc_by_ocv_good,
            "seed": r.estimate.seed.as_str(),
            "charge_mc": r.estimate.charge_mc,
        },
    })
}

pub fn summary_json(s: &RunSummary) -> Value {
    json!({
        "cycles": s.cycles,
        "soc_by_cc": s.estimate.soc_by_cc,
        "soc_by_ocv": s.estimate.soc_by_ocv,
        "soe_by_cc": s.estimate.soe_by_cc,
        "soe_by_ocv": s.estimate.soe_by_ocv,
        "soc_by_ocv_good": s.estimate.soc_by_ocv_good,
        "seed": s.estimate.seed.as_str(),
        "charge_mc": s.estimate.charge_mc,
        "health": health_json(&s.health),
        "last": s.last.as_ref().map_or(Value::Null, report_json),
    })
}

fn fmt_stats(s: Option<Stats>, unit: &str) -> String {
    s.map_or_else(
        || "unavailable".to_string(),
        |s| format!("min {:.3}{unit} max {:.3}{unit} avg {:.3}{unit}", s.min, s.max, s.avg),
    )
}

fn fmt_balance(b: &BalanceOutcome) -> String {
    match b {
        BalanceOutcome::Off => "off".to_string(),
        BalanceOutcome::Inhibited(reason) => format!("inhibited ({reason})"),
        BalanceOutcome::Applied {
            threshold_v,
            bleeding,
        } => format!("applied, {bleeding} bleeding above {threshold_v:.4} V"),
    }
}

pub fn fmt_health(h: &AcquisitionHealth) -> String {
    let flag = |d: bool| if d { "DEGRADED" } else { "ok" };
    format!(
        "voltage {} (fill {}), temperature {} (fill {}), current {} (fill {})",
        flag(h.voltage_degraded),
        h.voltage_fill,
        flag(h.temperature_degraded),
        h.temperature_fill,
        flag(h.current_degraded),
        h.current_fill,
    )
}

fn print_cycle(r: &CycleReport) {
    if json_mode() {
        println!("{}", report_json(r));
    } else {
        println!(
            "cycle {:>6}: I={:+.3} A soc_cc={:.4} soc_ocv={:.4} balance={}",
            r.cycle,
            r.current_a,
            r.estimate.soc_by_cc,
            r.estimate.soc_by_ocv,
            fmt_balance(&r.balance)
        );
    }
}

pub fn print_report(r: &CycleReport) {
    println!("Bricks:       {}", fmt_stats(r.pack.brick_v, " V"));
    println!(
        "              {} valid, {} modules unavailable, {} mismatched",
        r.pack.valid_bricks, r.pack.unavailable_modules, r.pack.mismatched_modules
    );
    println!("Cell temps:   {}", fmt_stats(r.pack.brick_temp_c, " C"));
    println!("Board temps:  {}", fmt_stats(r.pack.board_temp_c, " C"));
    println!("Balancing:    {}", fmt_balance(&r.balance));
    println!("Health:       {}", fmt_health(&r.health));
}

pub fn print_summary(s: &RunSummary) {
    let e = &s.estimate;
    println!("Run complete after {} cycles", s.cycles);
    println!(
        "SOC:          {:.4} (coulomb) {:.4} (ocv{})",
        e.soc_by_cc,
        e.soc_by_ocv,
        if e.soc_by_ocv_good { ", qualified" } else { "" }
    );
    println!("SOE:          {:.4} (coulomb) {:.4} (ocv)", e.soe_by_cc, e.soe_by_ocv);
    println!("Charge:       {:.0} mC, seeded from {}", e.charge_mc, e.seed.as_str());
    if let Some(last) = &s.last {
        print_report(last);
    } else {
        println!("Health:       {}", fmt_health(&s.health));
    }
}
