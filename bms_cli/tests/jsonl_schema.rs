use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let toml = format!(
        r#"
[runner]
cycle_ms = 1000

[simulation]
fast_forward = true
{extra}
"#
    );
    let path = dir.join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn json_lines(out: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(out)
        .lines()
        .filter(|l| l.trim_start().starts_with('{'))
        .map(|l| serde_json::from_str(l).expect("valid JSON"))
        .collect()
}

fn bms(cfg: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bms").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(cfg);
    cmd
}

/// Validate the JSON summary of a completed run.
#[rstest]
fn run_summary_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), "");

    let out = bms(&cfg)
        .args(["run", "--cycles", "4", "--balance", "relative"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines = json_lines(&out);
    let v = lines.last().expect("summary line");

    assert_eq!(v["cycles"].as_u64(), Some(4));
    for key in ["soc_by_cc", "soc_by_ocv", "soe_by_cc", "soe_by_ocv", "charge_mc"] {
        assert!(v[key].as_f64().is_some(), "{key} should be a number");
    }
    assert!(v["soc_by_ocv_good"].is_boolean());
    assert_eq!(v["seed"], "ocv");
    assert_eq!(v["health"]["voltage_degraded"], false);

    let last = &v["last"];
    assert_eq!(last["cycle"].as_u64(), Some(4));
    assert_eq!(last["balance"]["state"], "applied");
    assert!(last["pack"]["brick_v"]["min"].as_f64().is_some());
    assert_eq!(last["pack"]["valid_bricks"].as_u64(), Some(12));
}

/// Verbose runs emit one report per cycle before the summary.
#[rstest]
fn verbose_run_emits_cycle_reports() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), "");

    let out = bms(&cfg)
        .args(["run", "--cycles", "3", "--verbose"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines = json_lines(&out);
    assert_eq!(lines.len(), 4);
    for (i, l) in lines.iter().take(3).enumerate() {
        assert_eq!(l["cycle"].as_u64(), Some(i as u64 + 1));
        assert_eq!(l["fresh"]["voltages"], true);
        assert_eq!(l["balance"]["state"], "off");
    }
}

/// The second run picks up the coulomb counter the first one saved.
#[rstest]
fn state_file_carries_charge_between_runs() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), "");
    let state = dir.path().join("charge.toml");

    let first = bms(&cfg)
        .args(["run", "--cycles", "2", "--state-file"])
        .arg(&state)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(json_lines(&first).last().unwrap()["seed"], "ocv");
    assert!(state.exists());

    let second = bms(&cfg)
        .args(["run", "--cycles", "2", "--state-file"])
        .arg(&state)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(json_lines(&second).last().unwrap()["seed"], "persisted");
}

#[rstest]
fn lookup_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_config(dir.path(), "");

    let out = bms(&cfg)
        .args(["lookup", "--table", "soe-from-soc", "--x", "-0.5"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v = &json_lines(&out)[0];
    assert_eq!(v["table"], "soe-from-soc");
    assert_eq!(v["clamped"], true);
    assert!(v["y"].as_f64().is_some_and(|y| y.abs() < 1e-6));
}

/// Degraded health prints the cycle report, then a structured error.
#[rstest]
fn degraded_health_error_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_config(
        dir.path(),
        "fail_voltage_every = 1\n\n[acquisition.voltage]\nfill_threshold = 10\nclear_threshold = 5\nfailure_fill_count = 10\n",
    );

    let out = bms(&cfg)
        .arg("health")
        .assert()
        .code(3)
        .get_output()
        .stdout
        .clone();
    let lines = json_lines(&out);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["fresh"]["voltages"], false);
    assert_eq!(lines[0]["balance"]["state"], "off");

    let err = &lines[1];
    assert_eq!(err["reason"], "Degraded");
    assert_eq!(err["details"]["voltage_degraded"], true);
    assert!(err["message"].as_str().is_some_and(|m| !m.is_empty()));
}
