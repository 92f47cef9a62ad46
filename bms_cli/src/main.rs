#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `bms` command-line entry point.

mod cli;
mod error_fmt;
mod run;
mod tables;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bms_core::error::BmsError;
use clap::Parser;
use eyre::WrapErr;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE, json_mode};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::run::{RunArgs, balance_mode, check_health, health_once, run_pack};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(e) = real_main(cli) {
        if json_mode() {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        tracing::error!(error = %format!("{e:#}"), "bms exited with error");
        std::process::exit(exit_code_for_error(&e));
    }
}

fn load_config(path: &Path) -> eyre::Result<bms_config::Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = bms_config::load_toml(&text)
        .map_err(eyre::Report::new)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()
        .map_err(|e| eyre::Report::new(BmsError::Config(e.to_string())))?;
    Ok(cfg)
}

/// Console layer on stderr plus an optional JSON file sink from `[logging]`.
fn init_tracing(cli: &Cli, cfg: Option<&bms_config::Config>) {
    // --log-level wins unless left at its default.
    let level = cfg
        .and_then(|c| c.logging.level.clone())
        .filter(|_| cli.log_level == "info")
        .unwrap_or_else(|| cli.log_level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let console = if cli.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = cfg.and_then(|c| c.logging.file.as_deref()).map(|file| {
        let path = Path::new(file);
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
        let dir = dir.unwrap_or_else(|| Path::new("."));
        let name = path.file_name().map_or_else(
            || std::ffi::OsString::from("bms.log"),
            std::ffi::OsStr::to_os_string,
        );
        let rotation = cfg.and_then(|c| c.logging.rotation.as_deref());
        let appender = match rotation {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed()
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    // Logging comes up before the config so a bad config is still logged.
    let cfg = match load_config(&cli.config) {
        Ok(cfg) => {
            init_tracing(&cli, Some(&cfg));
            cfg
        }
        Err(e) => {
            init_tracing(&cli, None);
            return Err(e);
        }
    };
    tracing::debug!(config = %cli.config.display(), "config loaded");

    let chem = tables::load_chemistry(&cfg, &cli.config)?;

    match cli.cmd {
        Commands::Run {
            cycles,
            balance,
            target_v,
            direct,
            state_file,
            verbose,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
                tracing::warn!(error = %e, "failed to install Ctrl-C handler");
            }
            let args = RunArgs {
                cycles,
                balance: balance_mode(balance, target_v)?,
                direct,
                state_file,
                verbose,
            };
            let summary = run_pack(&cfg, &chem, &args, shutdown)?;
            if json_mode() {
                println!("{}", run::summary_json(&summary));
            } else {
                run::print_summary(&summary);
            }
        }
        Commands::SelfCheck => {
            // One cycle exercises every config path the run command takes.
            let report = health_once(&cfg, &chem)?;
            if json_mode() {
                println!(
                    "{}",
                    json!({
                        "ok": true,
                        "config": cli.config.display().to_string(),
                        "soc_by_ocv_points": chem.soc_by_ocv.len(),
                        "soe_from_soc_points": chem.soe_from_soc.len(),
                        "bricks": report.pack.valid_bricks,
                    })
                );
            } else {
                println!("Config OK: {}", cli.config.display());
                println!(
                    "Tables OK: soc_by_ocv {} points, soe_from_soc {} points",
                    chem.soc_by_ocv.len(),
                    chem.soe_from_soc.len()
                );
                println!("Pack OK: {} bricks reporting", report.pack.valid_bricks);
            }
        }
        Commands::Lookup { table, x } => {
            let r = tables::run_lookup(&chem, table, x)?;
            if json_mode() {
                println!(
                    "{}",
                    json!({
                        "table": tables::table_name(table),
                        "x": x,
                        "y": r.y,
                        "clamped": r.clamped,
                    })
                );
            } else {
                let note = if r.clamped { " (clamped)" } else { "" };
                println!("{}({x}) = {:.4}{note}", tables::table_name(table), r.y);
            }
        }
        Commands::Health => {
            let report = health_once(&cfg, &chem)?;
            if json_mode() {
                println!("{}", run::report_json(&report));
            } else {
                run::print_report(&report);
            }
            check_health(&report.health)?;
        }
    }
    Ok(())
}
