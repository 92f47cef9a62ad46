use bms_config::load_toml;
use rstest::rstest;

const BASE: &str = r#"
[pack]
modules = 2
bricks_per_module = 12
board_temps_per_module = 4
cell_capacity_mah = 3000
parallel_cells = 2

[acquisition.voltage]
fill_threshold = 200
clear_threshold = 100
failure_fill_count = 10
success_drain_count = 1

[balancing]
threshold_v = 0.002
max_bleed_temp_c = 55.0

[estimator]
rest_current_a = 0.5
qualification_s = 300

[runner]
mode = "direct"
cycle_ms = 50
current_sample_hz = 200
"#;

#[test]
fn accepts_complete_config() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.pack.modules, 2);
    assert_eq!(cfg.pack.parallel_cells, 2);
    assert!(matches!(cfg.runner.mode, bms_config::RunMode::Direct));
    // Sections left out keep their defaults
    assert_eq!(cfg.acquisition.temperature.fill_threshold, 200);
    assert!((cfg.aggregation.max_valid_brick_v - 5.0).abs() < f32::EPSILON);
}

#[rstest]
#[case("[pack]\nmodules = 0\n", "pack.modules")]
#[case("[pack]\nmodules = 33\n", "pack.modules")]
#[case("[pack]\nbricks_per_module = 17\n", "pack.bricks_per_module")]
#[case("[pack]\ncell_capacity_mah = 0.0\n", "pack.cell_capacity_mah")]
#[case(
    "[acquisition.voltage]\nfill_threshold = 100\nclear_threshold = 100\n",
    "acquisition.voltage.clear_threshold"
)]
#[case(
    "[acquisition.current]\nfailure_fill_count = 0\n",
    "acquisition.current.failure_fill_count"
)]
#[case("[balancing]\nthreshold_v = -0.001\n", "balancing.threshold_v")]
#[case("[estimator]\nrest_current_a = 0.0\n", "estimator.rest_current_a")]
#[case("[estimator]\nqualification_s = 0\n", "estimator.qualification_s")]
#[case("[runner]\ncycle_ms = 0\n", "runner.cycle_ms")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation")]
#[case(
    "[aggregation]\nmin_valid_brick_v = 5.0\nmax_valid_brick_v = 1.0\n",
    "aggregation.min_valid_brick_v"
)]
fn rejects_out_of_range_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "error `{err}` should mention `{needle}`"
    );
}

#[test]
fn unknown_run_mode_is_a_parse_error() {
    let err = load_toml("[runner]\nmode = \"turbo\"\n").expect_err("unknown mode");
    assert!(err.to_string().contains("turbo") || err.to_string().contains("variant"));
}
