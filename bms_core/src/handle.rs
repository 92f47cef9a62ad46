//! Shared, lock-guarded access to a `Bms`.
//!
//! A whole cycle runs under one lock acquisition, so readers never observe a
//! pack that is half acquired or an estimate that lags its aggregates.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::balancing::{BalanceMode, BalanceOutcome};
use crate::builder::Bms;
use crate::error::Result;
use crate::pack::PackAggregates;
use crate::persist::CoulombSnapshot;
use crate::soc::ChargeEstimate;
use crate::status::{AcquisitionHealth, CycleReport};

#[derive(Clone)]
pub struct BmsHandle {
    inner: Arc<Mutex<Bms>>,
}

impl core::fmt::Debug for BmsHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BmsHandle")
            .field("strong", &Arc::strong_count(&self.inner))
            .finish()
    }
}

impl BmsHandle {
    pub fn new(bms: Bms) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bms)),
        }
    }

    // A cycle that panicked leaves the last complete state behind.
    fn lock(&self) -> MutexGuard<'_, Bms> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut Bms) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn step(&self) -> Result<CycleReport> {
        self.lock().step()
    }

    pub fn step_with_current(&self, current_a: Option<f32>) -> Result<CycleReport> {
        self.lock().step_with_current(current_a)
    }

    pub fn run_balancing_cycle(&self, mode: BalanceMode) -> Result<BalanceOutcome> {
        self.lock().run_balancing_cycle(mode)
    }

    pub fn set_balance_mode(&self, mode: BalanceMode) {
        self.lock().set_balance_mode(mode);
    }

    pub fn disable_bleeding(&self) -> Result<()> {
        self.lock().disable_bleeding()
    }

    pub fn pack_aggregates(&self) -> PackAggregates {
        self.lock().pack_aggregates()
    }

    pub fn charge_estimate(&self) -> ChargeEstimate {
        self.lock().charge_estimate()
    }

    pub fn is_acquisition_degraded(&self) -> bool {
        self.lock().is_acquisition_degraded()
    }

    pub fn health(&self) -> AcquisitionHealth {
        self.lock().health()
    }

    pub fn snapshot(&self, now_unix_s: u64) -> CoulombSnapshot {
        self.lock().snapshot(now_unix_s)
    }

    /// Take the `Bms` back when this is the last handle.
    pub fn into_inner(self) -> std::result::Result<Bms, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(m) => Ok(m.into_inner().unwrap_or_else(PoisonError::into_inner)),
            Err(inner) => Err(Self { inner }),
        }
    }
}
