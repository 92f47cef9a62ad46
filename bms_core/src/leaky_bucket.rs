//! Leaky-bucket fault integrator.
//!
//! Each failure pours `failure_fill_count` into the bucket, each success
//! drains `success_drain_count`. The bucket latches when the level reaches
//! `fill_threshold` and only clears once the level falls below
//! `clear_threshold`, so interleaved outcomes near a boundary do not flap.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::LeakyBucketCfg;
use crate::error::BuildError;

/// Latch edge produced by a single outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketTransition {
    Latched,
    Cleared,
}

#[derive(Debug, Clone)]
pub struct LeakyBucket {
    channel: &'static str,
    cfg: LeakyBucketCfg,
    fill_level: u32,
    filled: bool,
}

impl LeakyBucket {
    pub fn new(channel: &'static str, cfg: LeakyBucketCfg) -> Result<Self, BuildError> {
        if cfg.fill_threshold == 0 {
            return Err(BuildError::InvalidConfig("fill_threshold must be > 0"));
        }
        if cfg.clear_threshold >= cfg.fill_threshold {
            return Err(BuildError::InvalidConfig(
                "clear_threshold must be < fill_threshold",
            ));
        }
        if cfg.failure_fill_count == 0 {
            return Err(BuildError::InvalidConfig("failure_fill_count must be > 0"));
        }
        if cfg.success_drain_count == 0 {
            return Err(BuildError::InvalidConfig("success_drain_count must be > 0"));
        }
        Ok(Self {
            channel,
            cfg,
            fill_level: 0,
            filled: false,
        })
    }

    pub fn channel(&self) -> &'static str {
        self.channel
    }

    pub fn fill_level(&self) -> u32 {
        self.fill_level
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Record a failed transaction.
    pub fn on_failure(&mut self) -> Option<BucketTransition> {
        self.fill_level = self
            .fill_level
            .saturating_add(self.cfg.failure_fill_count)
            .min(self.cfg.fill_threshold);
        if self.fill_level >= self.cfg.fill_threshold && !self.filled {
            self.filled = true;
            tracing::warn!(
                channel = self.channel,
                fill_level = self.fill_level,
                "acquisition channel latched degraded"
            );
            return Some(BucketTransition::Latched);
        }
        None
    }

    /// Record a successful transaction.
    pub fn on_success(&mut self) -> Option<BucketTransition> {
        self.fill_level = self.fill_level.saturating_sub(self.cfg.success_drain_count);
        if self.filled && self.fill_level < self.cfg.clear_threshold {
            self.filled = false;
            tracing::info!(
                channel = self.channel,
                fill_level = self.fill_level,
                "acquisition channel recovered"
            );
            return Some(BucketTransition::Cleared);
        }
        None
    }
}

/// Bucket shared between execution contexts (e.g. the current sampler
/// thread and the cycle loop).
#[derive(Debug, Clone)]
pub struct SharedLeakyBucket {
    inner: Arc<Mutex<LeakyBucket>>,
}

impl SharedLeakyBucket {
    pub fn new(bucket: LeakyBucket) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bucket)),
        }
    }

    // A poisoned bucket still holds a consistent level; keep using it.
    fn lock(&self) -> MutexGuard<'_, LeakyBucket> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_failure(&self) -> Option<BucketTransition> {
        self.lock().on_failure()
    }

    pub fn on_success(&self) -> Option<BucketTransition> {
        self.lock().on_success()
    }

    pub fn is_filled(&self) -> bool {
        self.lock().is_filled()
    }

    pub fn fill_level(&self) -> u32 {
        self.lock().fill_level()
    }

    pub fn snapshot(&self) -> LeakyBucket {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket() -> LeakyBucket {
        LeakyBucket::new("test", LeakyBucketCfg::default()).unwrap()
    }

    #[test]
    fn latches_after_twenty_failures() {
        let mut b = bucket();
        for _ in 0..19 {
            assert_eq!(b.on_failure(), None);
        }
        assert!(!b.is_filled());
        assert_eq!(b.on_failure(), Some(BucketTransition::Latched));
        assert!(b.is_filled());
        assert_eq!(b.fill_level(), 200);
        // clipped, no second edge
        assert_eq!(b.on_failure(), None);
        assert_eq!(b.fill_level(), 200);
    }

    #[test]
    fn needs_101_successes_to_clear() {
        let mut b = bucket();
        for _ in 0..20 {
            b.on_failure();
        }
        for _ in 0..100 {
            assert_eq!(b.on_success(), None);
            assert!(b.is_filled());
        }
        assert_eq!(b.on_success(), Some(BucketTransition::Cleared));
        assert!(!b.is_filled());
    }

    #[test]
    fn tolerates_one_failure_in_ten() {
        let mut b = bucket();
        for _ in 0..1000 {
            b.on_failure();
            for _ in 0..10 {
                b.on_success();
            }
        }
        assert!(!b.is_filled());
        assert_eq!(b.fill_level(), 0);
    }

    #[test]
    fn success_floors_at_zero() {
        let mut b = bucket();
        b.on_success();
        assert_eq!(b.fill_level(), 0);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let cfg = LeakyBucketCfg {
            clear_threshold: 200,
            ..LeakyBucketCfg::default()
        };
        assert!(matches!(
            LeakyBucket::new("bad", cfg),
            Err(BuildError::InvalidConfig(_))
        ));
    }

    #[test]
    fn shared_bucket_sees_updates_from_clones() {
        let shared = SharedLeakyBucket::new(bucket());
        let other = shared.clone();
        std::thread::spawn(move || {
            for _ in 0..20 {
                other.on_failure();
            }
        })
        .join()
        .unwrap();
        assert!(shared.is_filled());
    }
}
