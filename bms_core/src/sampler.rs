//! Background bus-current sampling.
//!
//! Spawns a thread that owns the `CurrentSensor`, samples it at its own
//! (faster) rate, pushes readings through a bounded channel and reports every
//! outcome into the shared current bucket. The cycle drains the channel and
//! uses the mean of what arrived since the previous cycle.
//!
//! Each `CurrentSampler` spawns exactly one thread, shut down and joined when
//! the sampler is dropped.
use crossbeam_channel as xch;
use bms_traits::CurrentSensor;
use bms_traits::clock::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::hw_error::map_hw_error;
use crate::leaky_bucket::SharedLeakyBucket;

/// Readings buffered between cycles; extra samples are dropped.
pub const SAMPLE_QUEUE_DEPTH: usize = 64;

pub struct CurrentSampler {
    rx: xch::Receiver<f32>,
    last_ok: Arc<AtomicU64>,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    period: Duration,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl CurrentSampler {
    pub fn spawn<S, C>(mut sensor: S, hz: u32, bucket: SharedLeakyBucket, clock: C) -> Self
    where
        S: CurrentSensor + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = xch::bounded(SAMPLE_QUEUE_DEPTH);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = last_ok.clone();
        let period = Duration::from_micros(crate::util::period_us(hz));
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(clock);
        let thread_clock = clock.clone();
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("current sampler received shutdown signal");
                    break;
                }

                match sensor.read_bus_current() {
                    Ok(a) if a.is_finite() => {
                        bucket.on_success();
                        last_ok_clone.store(thread_clock.ms_since(epoch), Ordering::Relaxed);
                        match tx.try_send(a) {
                            Ok(()) | Err(xch::TrySendError::Full(_)) => {}
                            Err(xch::TrySendError::Disconnected(_)) => {
                                tracing::debug!("current sampler consumer gone, exiting thread");
                                break;
                            }
                        }
                    }
                    Ok(a) => {
                        bucket.on_failure();
                        tracing::trace!(current_a = a, "non-finite current sample");
                    }
                    Err(e) => {
                        bucket.on_failure();
                        tracing::trace!(error = %map_hw_error(&*e), "current sample failed");
                    }
                }

                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                thread_clock.sleep(period);
            }
            tracing::trace!("current sampler thread exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            clock,
            epoch,
            period,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Mean of every reading queued since the last drain; None if nothing
    /// arrived.
    pub fn drain_mean(&self) -> Option<f32> {
        let (sum, n) = self
            .rx
            .try_iter()
            .fold((0.0_f64, 0_u32), |(s, n), a| (s + f64::from(a), n + 1));
        (n > 0).then(|| (sum / f64::from(n)) as f32)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Milliseconds since the last good sample.
    pub fn stalled_for_ms(&self) -> u64 {
        self.clock
            .ms_since(self.epoch)
            .saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }
}

impl core::fmt::Debug for CurrentSampler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CurrentSampler")
            .field("period", &self.period)
            .field("queued", &self.rx.len())
            .finish()
    }
}

impl Drop for CurrentSampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The thread exits between reads, or once an in-flight read returns.
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("current sampler joined"),
                Err(e) => tracing::warn!(?e, "current sampler thread panicked during shutdown"),
            }
        }
    }
}
