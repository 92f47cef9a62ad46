//! Simulated battery pack.
//!
//! One shared model sits behind three handles: a cell monitor, a bus current
//! sensor and a bleed driver. The model integrates charge against the
//! injected [`Clock`], so with a `ManualClock` hours of operation replay as
//! fast as the caller advances time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bms_traits::{
    BleedDriver, CellMonitor, Clock, CurrentSensor, ModuleTemperatureFrame, ModuleVoltageFrame,
};

use crate::error::HwError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Open-circuit voltage of one brick as a function of its state of charge.
pub type OcvCurve = Box<dyn Fn(f32) -> f32 + Send>;

#[derive(Debug, Clone)]
pub struct SimParams {
    pub modules: usize,
    pub bricks_per_module: usize,
    pub board_temps_per_module: usize,
    pub brick_capacity_mah: f32,
    pub initial_soc: f32,
    /// Positive discharges the pack.
    pub load_current_a: f32,
    /// Initial brick-to-brick spread. Applied in SOC units, which is close to
    /// volts on the flat part of a Li-ion curve.
    pub brick_spread_mv: f32,
    pub temperature_sense_v: f32,
    pub internal_resistance_ohm: f32,
    pub bleed_current_a: f32,
    /// Every Nth voltage acquisition fails; 0 never fails.
    pub fail_voltage_every: u32,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            modules: 1,
            bricks_per_module: 12,
            board_temps_per_module: 4,
            brick_capacity_mah: 3000.0,
            initial_soc: 0.6,
            load_current_a: 0.0,
            brick_spread_mv: 10.0,
            temperature_sense_v: 2.645,
            internal_resistance_ohm: 0.02,
            bleed_current_a: 0.1,
            fail_voltage_every: 0,
        }
    }
}

fn linear_ocv(soc: f32) -> f32 {
    3.0 + 1.2 * soc
}

struct Model {
    params: SimParams,
    clock: Arc<dyn Clock + Send + Sync>,
    last: Instant,
    brick_soc: Vec<f32>,
    bleed: Vec<bool>,
    ocv: OcvCurve,
    voltage_reads: u64,
    current_reads: u64,
    fail_current_every: u32,
}

impl Model {
    fn index(&self, module: usize, brick: usize) -> Option<usize> {
        (module < self.params.modules && brick < self.params.bricks_per_module)
            .then(|| module * self.params.bricks_per_module + brick)
    }

    /// Integrate charge drawn since the last update.
    fn settle(&mut self) {
        let now = self.clock.now();
        let dt_s = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;
        if dt_s <= 0.0 {
            return;
        }
        // mAh -> A*s
        let capacity_as = (self.params.brick_capacity_mah * 3.6).max(f32::EPSILON);
        for (soc, bleeding) in self.brick_soc.iter_mut().zip(&self.bleed) {
            let mut drain_a = self.params.load_current_a;
            if *bleeding {
                drain_a += self.params.bleed_current_a;
            }
            *soc = (*soc - drain_a * dt_s / capacity_as).clamp(0.0, 1.0);
        }
    }

    fn brick_voltage(&self, idx: usize) -> f32 {
        (self.ocv)(self.brick_soc[idx]) - self.params.load_current_a * self.params.internal_resistance_ohm
    }
}

/// Shared simulated pack. Clones refer to the same model.
#[derive(Clone)]
pub struct SimulatedPack {
    inner: Arc<Mutex<Model>>,
}

impl std::fmt::Debug for SimulatedPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = self.lock();
        f.debug_struct("SimulatedPack")
            .field("params", &m.params)
            .field("voltage_reads", &m.voltage_reads)
            .finish_non_exhaustive()
    }
}

impl SimulatedPack {
    pub fn new(params: SimParams, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let bricks = params.bricks_per_module.max(1);
        let spread = params.brick_spread_mv / 1000.0;
        let brick_soc = (0..params.modules * params.bricks_per_module)
            .map(|i| {
                let b = i % bricks;
                // Scatter so the spread does not follow brick order.
                let frac = if bricks > 1 {
                    ((b * 7) % bricks) as f32 / (bricks - 1) as f32
                } else {
                    0.5
                };
                (params.initial_soc + spread * (frac - 0.5)).clamp(0.0, 1.0)
            })
            .collect::<Vec<_>>();
        let bleed = vec![false; brick_soc.len()];
        let last = clock.now();
        Self {
            inner: Arc::new(Mutex::new(Model {
                params,
                clock,
                last,
                brick_soc,
                bleed,
                ocv: Box::new(linear_ocv),
                voltage_reads: 0,
                current_reads: 0,
                fail_current_every: 0,
            })),
        }
    }

    /// Replace the default linear OCV curve.
    pub fn with_ocv_curve(self, curve: impl Fn(f32) -> f32 + Send + 'static) -> Self {
        self.lock().ocv = Box::new(curve);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Model> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn monitor(&self) -> SimMonitor {
        SimMonitor { pack: self.clone() }
    }

    pub fn current_sensor(&self) -> SimCurrentSensor {
        SimCurrentSensor { pack: self.clone() }
    }

    pub fn bleed_driver(&self) -> SimBleedDriver {
        SimBleedDriver { pack: self.clone() }
    }

    pub fn set_load_current(&self, amps: f32) {
        let mut m = self.lock();
        m.settle();
        m.params.load_current_a = amps;
    }

    pub fn fail_voltage_every(&self, n: u32) {
        self.lock().params.fail_voltage_every = n;
    }

    pub fn fail_current_every(&self, n: u32) {
        self.lock().fail_current_every = n;
    }

    pub fn is_bleeding(&self, module: usize, brick: usize) -> bool {
        let m = self.lock();
        m.index(module, brick).is_some_and(|i| m.bleed[i])
    }

    pub fn bleeding_count(&self) -> usize {
        self.lock().bleed.iter().filter(|b| **b).count()
    }

    pub fn brick_soc(&self, module: usize, brick: usize) -> Option<f32> {
        let mut m = self.lock();
        m.settle();
        m.index(module, brick).map(|i| m.brick_soc[i])
    }

    pub fn mean_soc(&self) -> f32 {
        let mut m = self.lock();
        m.settle();
        if m.brick_soc.is_empty() {
            return 0.0;
        }
        m.brick_soc.iter().sum::<f32>() / m.brick_soc.len() as f32
    }
}

pub struct SimMonitor {
    pack: SimulatedPack,
}

impl CellMonitor for SimMonitor {
    fn acquire_module_voltages(
        &mut self,
        module_count: usize,
    ) -> Result<Vec<ModuleVoltageFrame>, BoxError> {
        let mut m = self.pack.lock();
        m.settle();
        m.voltage_reads += 1;
        let every = u64::from(m.params.fail_voltage_every);
        if every > 0 && m.voltage_reads % every == 0 {
            tracing::debug!(read = m.voltage_reads, "injected voltage acquisition failure");
            return Err(Box::new(HwError::Timeout));
        }
        if module_count > m.params.modules {
            return Err(Box::new(HwError::NoResponse {
                module: m.params.modules,
            }));
        }
        let bricks = m.params.bricks_per_module;
        let frames = (0..module_count)
            .map(|module| {
                let brick_v: Vec<f32> = (0..bricks)
                    .map(|b| m.brick_voltage(module * bricks + b))
                    .collect();
                let block_v = Some(brick_v.iter().sum());
                ModuleVoltageFrame { brick_v, block_v }
            })
            .collect();
        Ok(frames)
    }

    fn acquire_module_temperatures(
        &mut self,
        module_count: usize,
    ) -> Result<Vec<ModuleTemperatureFrame>, BoxError> {
        let m = self.pack.lock();
        if module_count > m.params.modules {
            return Err(Box::new(HwError::NoResponse {
                module: m.params.modules,
            }));
        }
        let v = m.params.temperature_sense_v;
        Ok((0..module_count)
            .map(|_| ModuleTemperatureFrame {
                brick_sense_v: vec![v; m.params.bricks_per_module],
                board_sense_v: vec![v; m.params.board_temps_per_module],
            })
            .collect())
    }
}

pub struct SimCurrentSensor {
    pack: SimulatedPack,
}

impl CurrentSensor for SimCurrentSensor {
    fn read_bus_current(&mut self) -> Result<f32, BoxError> {
        let mut m = self.pack.lock();
        m.settle();
        m.current_reads += 1;
        let every = u64::from(m.fail_current_every);
        if every > 0 && m.current_reads % every == 0 {
            return Err(Box::new(HwError::Bus("current sensor frame dropped".into())));
        }
        Ok(m.params.load_current_a)
    }
}

pub struct SimBleedDriver {
    pack: SimulatedPack,
}

impl BleedDriver for SimBleedDriver {
    fn set_bleed_output(
        &mut self,
        module: usize,
        brick: usize,
        enabled: bool,
    ) -> Result<(), BoxError> {
        let mut m = self.pack.lock();
        m.settle();
        let idx = m
            .index(module, brick)
            .ok_or(HwError::OutOfRange { module, brick })?;
        m.bleed[idx] = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bms_traits::ManualClock;
    use std::time::Duration;

    fn pack(params: SimParams) -> (SimulatedPack, ManualClock) {
        let clock = ManualClock::new();
        (SimulatedPack::new(params, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn discharge_lowers_soc_over_time() {
        let (p, clock) = pack(SimParams {
            brick_spread_mv: 0.0,
            load_current_a: 3.0,
            ..SimParams::default()
        });
        let before = p.mean_soc();
        clock.advance(Duration::from_secs(360));
        // 3 A for 0.1 h out of 3 Ah
        assert!((before - p.mean_soc() - 0.1).abs() < 1e-3);
    }

    #[test]
    fn bleeding_drains_only_selected_brick() {
        let (p, clock) = pack(SimParams {
            brick_spread_mv: 0.0,
            bleed_current_a: 1.0,
            ..SimParams::default()
        });
        p.bleed_driver().set_bleed_output(0, 3, true).unwrap();
        clock.advance(Duration::from_secs(108));
        let bled = p.brick_soc(0, 3).unwrap();
        let idle = p.brick_soc(0, 4).unwrap();
        assert!((idle - bled - 0.01).abs() < 1e-4);
        assert!(p.is_bleeding(0, 3));
        assert_eq!(p.bleeding_count(), 1);
    }

    #[test]
    fn injected_failures_repeat() {
        let (p, _clock) = pack(SimParams {
            fail_voltage_every: 3,
            ..SimParams::default()
        });
        let mut mon = p.monitor();
        assert!(mon.acquire_module_voltages(1).is_ok());
        assert!(mon.acquire_module_voltages(1).is_ok());
        assert!(mon.acquire_module_voltages(1).is_err());
        assert!(mon.acquire_module_voltages(1).is_ok());
    }

    #[test]
    fn block_voltage_is_sum_of_bricks() {
        let (p, _clock) = pack(SimParams::default());
        let frames = p.monitor().acquire_module_voltages(1).unwrap();
        let sum: f32 = frames[0].brick_v.iter().sum();
        assert_eq!(frames[0].block_v, Some(sum));
        assert_eq!(frames[0].brick_v.len(), 12);
    }

    #[test]
    fn out_of_range_requests_fail() {
        let (p, _clock) = pack(SimParams::default());
        assert!(p.monitor().acquire_module_voltages(2).is_err());
        let err = p.bleed_driver().set_bleed_output(0, 12, true).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
