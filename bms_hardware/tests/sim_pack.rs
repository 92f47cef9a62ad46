use std::sync::Arc;
use std::time::Duration;

use bms_hardware::error::HwError;
use bms_hardware::{SimParams, SimulatedPack};
use bms_traits::{CellMonitor, CurrentSensor, ManualClock};
use rstest::rstest;

fn sim(params: SimParams) -> (SimulatedPack, ManualClock) {
    let clock = ManualClock::new();
    let pack = SimulatedPack::new(params, Arc::new(clock.clone()));
    (pack, clock)
}

#[rstest]
#[case(1, 12)]
#[case(4, 16)]
#[case(2, 1)]
fn frames_match_layout(#[case] modules: usize, #[case] bricks: usize) {
    let (pack, _clock) = sim(SimParams {
        modules,
        bricks_per_module: bricks,
        ..SimParams::default()
    });
    let mut mon = pack.monitor();
    let volts = mon.acquire_module_voltages(modules).unwrap();
    assert_eq!(volts.len(), modules);
    assert!(volts.iter().all(|f| f.brick_v.len() == bricks));
    let temps = mon.acquire_module_temperatures(modules).unwrap();
    assert!(temps.iter().all(|f| f.board_sense_v.len() == 4));
}

#[test]
fn custom_ocv_curve_is_used() {
    let (pack, _clock) = sim(SimParams {
        brick_spread_mv: 0.0,
        initial_soc: 0.5,
        ..SimParams::default()
    });
    let pack = pack.with_ocv_curve(|soc| 3.5 + soc);
    let frames = pack.monitor().acquire_module_voltages(1).unwrap();
    assert!(frames[0].brick_v.iter().all(|v| (v - 4.0).abs() < 1e-6));
}

#[test]
fn current_sensor_reports_load_and_injected_drops() {
    let (pack, clock) = sim(SimParams::default());
    pack.set_load_current(-2.5);
    pack.fail_current_every(2);
    let mut sensor = pack.current_sensor();
    assert_eq!(sensor.read_bus_current().unwrap(), -2.5);
    let err = sensor.read_bus_current().unwrap_err();
    assert!(err.downcast_ref::<HwError>().is_some());
    clock.advance(Duration::from_secs(60));
    assert_eq!(sensor.read_bus_current().unwrap(), -2.5);
}
