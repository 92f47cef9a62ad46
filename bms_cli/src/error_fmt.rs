//! Human-readable error descriptions and structured JSON error formatting.

use bms_core::error::{BmsError, BuildError, LookupError, TableError};

use crate::run::HealthError;

/// Exit code for a latched degraded channel reported by `bms health`.
pub const EXIT_DEGRADED: i32 = 3;
/// Exit code for config or table errors caught before anything runs.
pub const EXIT_CONFIG: i32 = 4;
/// Exit code for hardware faults and timeouts during a run.
pub const EXIT_HARDWARE: i32 = 5;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(HealthError::Degraded(h)) = err.downcast_ref::<HealthError>() {
        return format!(
            "What happened: Acquisition is degraded ({}).\nLikely causes: Monitor or current sensor failing repeatedly, or [simulation].fail_voltage_every set.\nHow to fix: Check wiring and the [acquisition] bucket thresholds, then rerun `bms health`.",
            crate::run::fmt_health(h)
        );
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingMonitor => {
                "What happened: No cell monitor was provided to the BMS.\nLikely causes: The monitor backend failed to initialize or was not wired into the builder.\nHow to fix: Pass a monitor via with_monitor(...).".to_string()
            }
            BuildError::MissingCurrentSensor => {
                "What happened: No current sensor was provided to the BMS.\nLikely causes: The current sensor backend failed to initialize.\nHow to fix: Pass a sensor via with_current_sensor(...).".to_string()
            }
            BuildError::MissingBleedDriver => {
                "What happened: No bleed driver was provided to the BMS.\nLikely causes: The balancing output backend failed to initialize.\nHow to fix: Pass a driver via with_bleed_driver(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then run `bms self-check`."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<TableError>() {
        return table_hint(te);
    }

    if let Some(de) = err.downcast_ref::<BmsError>() {
        return match de {
            BmsError::Timeout => "What happened: The cell monitor timed out.\nLikely causes: Monitor board unpowered or the isoSPI link is down.\nHow to fix: Check the monitor chain, then rerun with --log-level=debug.".to_string(),
            BmsError::Table(te) => table_hint(te),
            BmsError::Lookup(LookupError::SearchFailed { x }) => format!(
                "What happened: Table lookup failed for input {x}.\nLikely causes: The input is not a number.\nHow to fix: Pass a finite value."
            ),
            BmsError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then run `bms self-check`."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<toml::de::Error>() {
        return format!(
            "What happened: The config file is not valid TOML ({}).\nLikely causes: A typo, or a key with the wrong type.\nHow to fix: Compare against etc/bms_config.toml.",
            te.message()
        );
    }

    // String-based heuristics for errors coming from config loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("table csv must have headers") {
        return format!("Invalid headers in table CSV. {msg}");
    }

    if lower.contains("read config") {
        let cause = err.root_cause();
        return format!(
            "What happened: Could not read the config file ({cause}).\nLikely causes: Wrong --config path.\nHow to fix: Pass --config FILE pointing at an existing TOML."
        );
    }

    if lower.contains("must be") || lower.contains("invalid configuration") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then run `bms self-check`."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn table_hint(te: &TableError) -> String {
    format!(
        "What happened: A lookup table is malformed ({te}).\nLikely causes: A [chemistry] CSV with too few rows or an unsorted first column.\nHow to fix: Sort the CSV by its first column and give it at least two rows."
    )
}

fn is_config_error(err: &eyre::Report) -> bool {
    if err.downcast_ref::<BuildError>().is_some()
        || err.downcast_ref::<TableError>().is_some()
        || err.downcast_ref::<toml::de::Error>().is_some()
    {
        return true;
    }
    matches!(
        err.downcast_ref::<BmsError>(),
        Some(BmsError::Config(_) | BmsError::Table(_))
    )
}

/// Stable exit codes per error class; anything unclassified returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<HealthError>().is_some() {
        return EXIT_DEGRADED;
    }
    if is_config_error(err) {
        return EXIT_CONFIG;
    }
    if matches!(
        err.downcast_ref::<BmsError>(),
        Some(BmsError::Timeout | BmsError::Hardware(_) | BmsError::HardwareFault(_))
    ) {
        return EXIT_HARDWARE;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<HealthError>().is_some() {
        "Degraded"
    } else if is_config_error(err) {
        "Config"
    } else if exit_code_for_error(err) == EXIT_HARDWARE {
        "Hardware"
    } else {
        "Error"
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let msg = humanize(err);
    if let Some(HealthError::Degraded(h)) = err.downcast_ref::<HealthError>() {
        return json!({
            "reason": reason_name(err),
            "details": crate::run::health_json(h),
            "message": msg,
        })
        .to_string();
    }
    json!({ "reason": reason_name(err), "message": msg }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bms_core::status::AcquisitionHealth;
    use rstest::rstest;

    fn degraded() -> eyre::Report {
        eyre::Report::new(HealthError::Degraded(AcquisitionHealth {
            voltage_degraded: true,
            voltage_fill: 200,
            ..AcquisitionHealth::default()
        }))
    }

    #[rstest]
    #[case(degraded(), EXIT_DEGRADED)]
    #[case(eyre::Report::new(BuildError::InvalidConfig("capacity must be > 0")), EXIT_CONFIG)]
    #[case(eyre::Report::new(BmsError::Table(TableError::TooShort(1))), EXIT_CONFIG)]
    #[case(eyre::Report::new(BmsError::Timeout), EXIT_HARDWARE)]
    #[case(eyre::eyre!("boom"), 1)]
    fn exit_codes_are_stable(#[case] err: eyre::Report, #[case] code: i32) {
        assert_eq!(exit_code_for_error(&err), code);
    }

    #[test]
    fn context_does_not_hide_the_typed_error() {
        let err = eyre::Report::new(BmsError::Timeout).wrap_err("cycle 3");
        assert_eq!(exit_code_for_error(&err), EXIT_HARDWARE);
        assert!(humanize(&err).contains("monitor timed out"));
    }

    #[test]
    fn degraded_json_carries_channel_details() {
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&degraded())).unwrap();
        assert_eq!(v["reason"], "Degraded");
        assert_eq!(v["details"]["voltage_degraded"], true);
        assert_eq!(v["details"]["voltage_fill"], 200);
    }

    #[test]
    fn unknown_errors_fall_back_to_generic_text() {
        let msg = humanize(&eyre::eyre!("boom"));
        assert!(msg.starts_with("Something went wrong."));
        assert!(msg.contains("boom"));
    }
}
