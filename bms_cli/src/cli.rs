//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[inline]
pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(name = "bms", version, about = "Battery management CLI (simulated pack)")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/bms_config.toml")]
    pub config: PathBuf,

    /// Print reports and errors as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Balancing policy requested on the command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum BalanceArg {
    /// Never bleed
    Off,
    /// Bleed bricks above the pack minimum plus the configured threshold
    Relative,
    /// Bleed bricks above --target-v
    Target,
}

/// Tables reachable from `bms lookup`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TableArg {
    /// Open-circuit voltage (V) to state of charge
    SocByOcv,
    /// State of charge to state of energy
    SoeFromSoc,
    /// NTC sense voltage (V) to degrees C
    Ntc,
    /// Zener sense voltage (V) to degrees C
    Zener,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive the simulated pack and print the final report
    Run {
        /// Stop after N cycles (runs until Ctrl-C when omitted)
        #[arg(long, value_name = "N")]
        cycles: Option<u64>,
        /// Balancing policy
        #[arg(long, value_enum, default_value = "off")]
        balance: BalanceArg,
        /// Absolute bleed target in volts for --balance target
        #[arg(long = "target-v", value_name = "VOLTS", required_if_eq("balance", "target"))]
        target_v: Option<f32>,
        /// Read the current sensor inside the cycle instead of on a sampler thread
        #[arg(long, action = ArgAction::SetTrue)]
        direct: bool,
        /// Coulomb-counter snapshot file (overrides persistence.state_file)
        #[arg(long = "state-file", value_name = "FILE")]
        state_file: Option<PathBuf>,
        /// Print one line per cycle
        #[arg(long, action = ArgAction::SetTrue)]
        verbose: bool,
    },
    /// Load and validate the config and chemistry tables
    SelfCheck,
    /// Interpolate one value through a lookup table
    Lookup {
        #[arg(long, value_enum)]
        table: TableArg,
        /// Input value (clamped to the table domain)
        #[arg(long, allow_negative_numbers = true)]
        x: f32,
    },
    /// Run one cycle and report acquisition health
    Health,
}
