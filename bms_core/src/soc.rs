//! Charge and energy estimation.
//!
//! Two tracks run side by side:
//!
//! - **Coulomb counting** integrates bus current every cycle. Always updated,
//!   never self-correcting.
//! - **OCV** reads SOC off the chemistry table at the pack's minimum brick
//!   voltage. Only trusted after the pack has rested for the qualification
//!   period (`soc_by_ocv_good`).
//!
//! Both tracks and the trust flag are published every cycle. Fusing them is
//! opt-in (`reseed_on_ocv_good`), except when the startup seed was unknown:
//! then the first qualified OCV reading always seeds the counter.

use std::sync::Arc;
use std::time::Duration;

use crate::config::EstimatorCfg;
use crate::fixed_point::{charge_uc, mc_to_uc, uc_to_mc};
use crate::lookup::LookupTable;
use crate::persist::CoulombSnapshot;

/// Signed charge accumulator in fixed-point microcoulombs.
///
/// `integrate` adds `current * dt` as given; the total (seed + accumulated)
/// is held within `[0, capacity]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoulombCounter {
    seed_uc: i64,
    accumulated_uc: i64,
    capacity_uc: i64,
}

impl CoulombCounter {
    pub fn new(seed_mc: f64, capacity_mc: f64) -> Self {
        let capacity_uc = mc_to_uc(capacity_mc).max(0);
        Self {
            seed_uc: mc_to_uc(seed_mc).clamp(0, capacity_uc),
            accumulated_uc: 0,
            capacity_uc,
        }
    }

    /// Add `current_ma` integrated over `dt`.
    pub fn integrate(&mut self, current_ma: f32, dt: Duration) {
        let delta = charge_uc(current_ma, dt);
        let total = self
            .seed_uc
            .saturating_add(self.accumulated_uc)
            .saturating_add(delta)
            .clamp(0, self.capacity_uc);
        self.accumulated_uc = total - self.seed_uc;
    }

    /// Restart from a new seed, discarding the accumulated charge.
    pub fn reseed(&mut self, charge_mc: f64) {
        self.seed_uc = mc_to_uc(charge_mc).clamp(0, self.capacity_uc);
        self.accumulated_uc = 0;
    }

    pub fn seed_mc(&self) -> f64 {
        uc_to_mc(self.seed_uc)
    }

    pub fn accumulated_mc(&self) -> f64 {
        uc_to_mc(self.accumulated_uc)
    }

    pub fn accumulated_uc(&self) -> i64 {
        self.accumulated_uc
    }

    pub fn charge_mc(&self) -> f64 {
        uc_to_mc(self.seed_uc + self.accumulated_uc)
    }

    pub fn capacity_mc(&self) -> f64 {
        uc_to_mc(self.capacity_uc)
    }

    pub fn soc(&self) -> f32 {
        if self.capacity_uc == 0 {
            return 0.0;
        }
        ((self.seed_uc + self.accumulated_uc) as f64 / self.capacity_uc as f64) as f32
    }
}

/// Rest-duration timer gating trust in the OCV estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualificationTimer {
    rest_current_a: f32,
    duration: Duration,
    elapsed: Duration,
}

impl QualificationTimer {
    pub fn new(rest_current_a: f32, duration: Duration) -> Self {
        Self {
            rest_current_a,
            duration,
            elapsed: Duration::ZERO,
        }
    }

    /// Advance by `dt` while resting, otherwise restart from zero.
    pub fn update(&mut self, current_a: f32, dt: Duration) -> bool {
        if current_a.is_finite() && current_a.abs() < self.rest_current_a {
            self.elapsed = self.elapsed.saturating_add(dt);
        } else {
            self.elapsed = Duration::ZERO;
        }
        self.is_qualified()
    }

    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn is_qualified(&self) -> bool {
        self.elapsed >= self.duration
    }
}

/// Where the coulomb counter's current seed came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSource {
    Persisted,
    Ocv,
    Unknown,
}

impl SeedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::Ocv => "ocv",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeEstimate {
    pub soc_by_ocv: f32,
    pub soc_by_cc: f32,
    pub soe_by_ocv: f32,
    pub soe_by_cc: f32,
    pub soc_by_ocv_good: bool,
    pub seed: SeedSource,
    pub charge_mc: f64,
}

/// One cycle's worth of estimator input.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorInput {
    /// Bus current, amps, positive = discharge.
    pub current_a: f32,
    pub dt: Duration,
    /// Pack minimum brick voltage; None when unavailable.
    pub min_brick_v: Option<f32>,
    /// `current_a` was sampled this cycle rather than held.
    pub current_fresh: bool,
    /// False while the current channel is latched degraded. The counter
    /// holds its charge instead of integrating a held reading.
    pub current_trusted: bool,
    /// False while any acquisition channel is latched degraded.
    pub acquisition_trusted: bool,
}

/// Pick the startup seed: a fresh persisted snapshot, else the OCV reading
/// of a resting pack, else unknown (mid-capacity placeholder).
pub fn initial_seed(
    persisted: Option<&CoulombSnapshot>,
    now_unix_s: u64,
    max_age: Duration,
    resting_min_brick_v: Option<f32>,
    soc_by_ocv: &LookupTable,
    capacity_mc: f64,
) -> (f64, SeedSource) {
    if let Some(snap) = persisted {
        if snap.usable(now_unix_s, max_age, capacity_mc) {
            return (snap.charge_mc, SeedSource::Persisted);
        }
        tracing::warn!(
            saved_at_unix_s = snap.saved_at_unix_s,
            capacity_mc = snap.capacity_mc,
            "coulomb snapshot stale or mismatched, ignoring"
        );
    }
    if let Some(v) = resting_min_brick_v.filter(|v| v.is_finite()) {
        if let Ok(soc) = soc_by_ocv.try_lookup(v) {
            return (f64::from(soc) * capacity_mc, SeedSource::Ocv);
        }
    }
    (0.5 * capacity_mc, SeedSource::Unknown)
}

#[derive(Debug, Clone)]
pub struct ChargeEstimator {
    cfg: EstimatorCfg,
    soc_by_ocv: Arc<LookupTable>,
    soe_from_soc: Arc<LookupTable>,
    counter: CoulombCounter,
    timer: QualificationTimer,
    estimate: ChargeEstimate,
}

impl ChargeEstimator {
    pub fn new(
        cfg: EstimatorCfg,
        soc_by_ocv: Arc<LookupTable>,
        soe_from_soc: Arc<LookupTable>,
        seed_mc: f64,
        seed: SeedSource,
    ) -> Self {
        let counter = CoulombCounter::new(seed_mc, cfg.capacity_mc);
        let soc_cc = counter.soc();
        let soe_cc = soe_from_soc.lookup(soc_cc);
        let estimate = ChargeEstimate {
            // OCV track starts from the seed until a trusted reading arrives
            soc_by_ocv: soc_cc,
            soc_by_cc: soc_cc,
            soe_by_ocv: soe_cc,
            soe_by_cc: soe_cc,
            soc_by_ocv_good: false,
            seed,
            charge_mc: counter.charge_mc(),
        };
        Self {
            timer: QualificationTimer::new(cfg.rest_current_a, cfg.qualification),
            cfg,
            soc_by_ocv,
            soe_from_soc,
            counter,
            estimate,
        }
    }

    pub fn estimate(&self) -> ChargeEstimate {
        self.estimate
    }

    pub fn cfg(&self) -> &EstimatorCfg {
        &self.cfg
    }

    pub fn soc_by_ocv_table(&self) -> &LookupTable {
        &self.soc_by_ocv
    }

    pub fn soe_from_soc_table(&self) -> &LookupTable {
        &self.soe_from_soc
    }

    pub fn counter(&self) -> &CoulombCounter {
        &self.counter
    }

    pub fn timer(&self) -> &QualificationTimer {
        &self.timer
    }

    pub fn seed(&self) -> SeedSource {
        self.estimate.seed
    }

    /// Replace the counter seed and record where it came from.
    pub fn reseed(&mut self, charge_mc: f64, source: SeedSource) {
        self.counter.reseed(charge_mc);
        self.estimate.seed = source;
        self.estimate.soc_by_cc = self.counter.soc();
        self.estimate.soe_by_cc = self.soe_from_soc.lookup(self.estimate.soc_by_cc);
        self.estimate.charge_mc = self.counter.charge_mc();
        tracing::info!(charge_mc, source = source.as_str(), "coulomb counter seeded");
    }

    pub fn snapshot(&self, now_unix_s: u64) -> CoulombSnapshot {
        CoulombSnapshot {
            charge_mc: self.counter.charge_mc(),
            capacity_mc: self.counter.capacity_mc(),
            saved_at_unix_s: now_unix_s,
        }
    }

    /// Run one estimation cycle.
    pub fn update(&mut self, input: EstimatorInput) -> ChargeEstimate {
        // Positive bus current discharges; the counter accumulates charge.
        if input.current_trusted && input.current_a.is_finite() {
            self.counter.integrate(-input.current_a * 1000.0, input.dt);
        }

        let was_good = self.estimate.soc_by_ocv_good;
        let mut est = self.estimate;
        match input.min_brick_v.filter(|v| v.is_finite()) {
            Some(v) if input.acquisition_trusted => {
                est.soc_by_ocv = self.soc_by_ocv.lookup(v);
                est.soe_by_ocv = self.soe_from_soc.lookup(est.soc_by_ocv);
                // a held reading never advances the rest timer
                est.soc_by_ocv_good = if input.current_fresh {
                    self.timer.update(input.current_a, input.dt)
                } else {
                    self.timer.is_qualified()
                };
            }
            _ => {
                // hold the OCV track, restart qualification
                self.timer.reset();
                est.soc_by_ocv_good = false;
            }
        }

        if est.soc_by_ocv_good && !was_good {
            tracing::info!(soc_by_ocv = est.soc_by_ocv, "OCV estimate qualified");
            if est.seed == SeedSource::Unknown || self.cfg.reseed_on_ocv_good {
                let charge_mc = f64::from(est.soc_by_ocv) * self.cfg.capacity_mc;
                self.counter.reseed(charge_mc);
                tracing::info!(
                    charge_mc,
                    previous = est.seed.as_str(),
                    "coulomb counter re-seeded from OCV"
                );
                est.seed = SeedSource::Ocv;
            }
        }

        est.soc_by_cc = self.counter.soc();
        est.soe_by_cc = self.soe_from_soc.lookup(est.soc_by_cc);
        est.charge_mc = self.counter.charge_mc();
        self.estimate = est;
        est
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables;

    const CAP_MC: f64 = 10_800_000.0;

    fn estimator(seed: SeedSource, reseed: bool) -> ChargeEstimator {
        let cfg = EstimatorCfg {
            reseed_on_ocv_good: reseed,
            capacity_mc: CAP_MC,
            ..EstimatorCfg::default()
        };
        ChargeEstimator::new(
            cfg,
            Arc::new(tables::vtc6_soc_by_ocv().unwrap()),
            Arc::new(tables::vtc6_soe_from_soc().unwrap()),
            0.5 * CAP_MC,
            seed,
        )
    }

    fn rest(min_v: f32, secs: u64) -> EstimatorInput {
        EstimatorInput {
            current_a: 0.1,
            dt: Duration::from_secs(secs),
            min_brick_v: Some(min_v),
            current_fresh: true,
            current_trusted: true,
            acquisition_trusted: true,
        }
    }

    #[test]
    fn counter_is_exact_for_integral_current() {
        let mut c = CoulombCounter::new(0.0, CAP_MC);
        for _ in 0..36_000 {
            c.integrate(1000.0, Duration::from_millis(100));
        }
        assert_eq!(c.accumulated_uc(), 3_600_000_000);
        assert_eq!(c.accumulated_mc(), 3_600_000.0);
    }

    #[test]
    fn counter_saturates_at_bounds() {
        let mut c = CoulombCounter::new(1000.0, 2000.0);
        c.integrate(-1000.0, Duration::from_secs(5));
        assert_eq!(c.charge_mc(), 0.0);
        c.integrate(1000.0, Duration::from_secs(5));
        assert_eq!(c.charge_mc(), 2000.0);
        assert_eq!(c.soc(), 1.0);
    }

    #[test]
    fn timer_qualifies_after_five_minutes_of_rest() {
        let mut t = QualificationTimer::new(0.5, Duration::from_secs(300));
        for _ in 0..299 {
            assert!(!t.update(0.1, Duration::from_secs(1)));
        }
        assert!(t.update(0.1, Duration::from_secs(1)));
    }

    #[test]
    fn timer_resets_on_spike() {
        let mut t = QualificationTimer::new(0.5, Duration::from_secs(300));
        t.update(0.1, Duration::from_secs(240));
        t.update(2.0, Duration::from_millis(10));
        assert_eq!(t.elapsed(), Duration::ZERO);
        assert!(!t.update(0.1, Duration::from_secs(60)));
        assert!(!t.update(f32::NAN, Duration::from_secs(1)));
        assert_eq!(t.elapsed(), Duration::ZERO);
    }

    #[test]
    fn discharge_lowers_coulomb_soc() {
        let mut e = estimator(SeedSource::Persisted, false);
        let est = e.update(EstimatorInput {
            current_a: 3.0,
            dt: Duration::from_secs(360),
            min_brick_v: Some(3.7),
            current_fresh: true,
            current_trusted: true,
            acquisition_trusted: true,
        });
        assert!((est.soc_by_cc - 0.4).abs() < 1e-6);
        assert!(!est.soc_by_ocv_good);
    }

    #[test]
    fn unknown_seed_adopts_first_qualified_ocv() {
        let mut e = estimator(SeedSource::Unknown, false);
        let v = tables::VTC6_OCV_V[80];
        let est = e.update(rest(v, 299));
        assert!(!est.soc_by_ocv_good);
        assert!((est.soc_by_ocv - 0.80).abs() < 1e-4);
        let est = e.update(rest(v, 1));
        assert!(est.soc_by_ocv_good);
        assert_eq!(est.seed, SeedSource::Ocv);
        assert!((est.soc_by_cc - 0.80).abs() < 1e-4);
    }

    #[test]
    fn persisted_seed_is_kept_without_fusion() {
        let mut e = estimator(SeedSource::Persisted, false);
        let est = e.update(rest(tables::VTC6_OCV_V[80], 300));
        assert!(est.soc_by_ocv_good);
        assert_eq!(est.seed, SeedSource::Persisted);
        assert!(est.soc_by_cc < 0.51);
    }

    #[test]
    fn fusion_reseeds_on_rising_edge() {
        let mut e = estimator(SeedSource::Persisted, true);
        let est = e.update(rest(tables::VTC6_OCV_V[30], 300));
        assert_eq!(est.seed, SeedSource::Ocv);
        assert!((est.soc_by_cc - 0.30).abs() < 1e-4);
    }

    #[test]
    fn untrusted_voltages_hold_ocv_and_reset_timer() {
        let mut e = estimator(SeedSource::Persisted, false);
        let held = e.update(rest(tables::VTC6_OCV_V[60], 200)).soc_by_ocv;
        let est = e.update(EstimatorInput {
            acquisition_trusted: false,
            ..rest(3.0, 200)
        });
        assert_eq!(est.soc_by_ocv, held);
        assert!(!est.soc_by_ocv_good);
        assert_eq!(e.timer().elapsed(), Duration::ZERO);

        let est = e.update(EstimatorInput {
            min_brick_v: None,
            ..rest(3.0, 1)
        });
        assert_eq!(est.soc_by_ocv, held);
    }

    #[test]
    fn held_current_never_advances_rest_timer() {
        let mut e = estimator(SeedSource::Persisted, false);
        e.update(rest(tables::VTC6_OCV_V[60], 200));
        let est = e.update(EstimatorInput {
            current_fresh: false,
            ..rest(tables::VTC6_OCV_V[60], 200)
        });
        assert!(!est.soc_by_ocv_good);
        assert_eq!(e.timer().elapsed(), Duration::from_secs(200));
    }

    #[test]
    fn latched_current_freezes_counter() {
        let mut e = estimator(SeedSource::Persisted, false);
        let before = e.estimate().charge_mc;
        let est = e.update(EstimatorInput {
            current_a: 30.0,
            current_fresh: false,
            current_trusted: false,
            acquisition_trusted: false,
            ..rest(3.7, 60)
        });
        assert_eq!(est.charge_mc, before);
        assert!(!est.soc_by_ocv_good);
    }

    #[test]
    fn initial_seed_prefers_fresh_snapshot() {
        let table = tables::vtc6_soc_by_ocv().unwrap();
        let snap = CoulombSnapshot {
            charge_mc: 1234.0,
            capacity_mc: CAP_MC,
            saved_at_unix_s: 1000,
        };
        let day = Duration::from_secs(86_400);
        assert_eq!(
            initial_seed(Some(&snap), 2000, day, Some(3.7), &table, CAP_MC),
            (1234.0, SeedSource::Persisted)
        );
        let (mc, src) = initial_seed(Some(&snap), 1000 + 90_000, day, Some(4.2), &table, CAP_MC);
        assert_eq!(src, SeedSource::Ocv);
        assert!((mc - CAP_MC).abs() < 1.0);
        assert_eq!(
            initial_seed(None, 0, day, None, &table, CAP_MC),
            (0.5 * CAP_MC, SeedSource::Unknown)
        );
    }
}
