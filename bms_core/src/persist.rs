//! Coulomb-counter snapshot persistence.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoulombSnapshot {
    pub charge_mc: f64,
    pub capacity_mc: f64,
    pub saved_at_unix_s: u64,
}

impl CoulombSnapshot {
    pub fn age(&self, now_unix_s: u64) -> Duration {
        Duration::from_secs(now_unix_s.saturating_sub(self.saved_at_unix_s))
    }

    /// Usable as a seed: fresh enough, same rated capacity, charge in range.
    pub fn usable(&self, now_unix_s: u64, max_age: Duration, capacity_mc: f64) -> bool {
        let same_capacity =
            (self.capacity_mc - capacity_mc).abs() <= 1e-6 * capacity_mc.abs().max(1.0);
        self.age(now_unix_s) <= max_age
            && same_capacity
            && self.charge_mc.is_finite()
            && (0.0..=capacity_mc).contains(&self.charge_mc)
    }
}

pub fn unix_now_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

pub fn save_snapshot(path: &Path, snapshot: &CoulombSnapshot) -> Result<()> {
    let body = toml::to_string(snapshot).wrap_err("serialize coulomb snapshot")?;
    write_atomic(path, body.as_bytes())
        .wrap_err_with(|| format!("write coulomb snapshot {}", path.display()))?;
    tracing::debug!(path = %path.display(), charge_mc = snapshot.charge_mc, "coulomb snapshot saved");
    Ok(())
}

/// Load a snapshot; a missing file is `Ok(None)`.
pub fn load_snapshot(path: &Path) -> Result<Option<CoulombSnapshot>> {
    let body = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(eyre::Report::new(e))
                .wrap_err_with(|| format!("read coulomb snapshot {}", path.display()));
        }
    };
    let snap: CoulombSnapshot = toml::from_str(&body)
        .wrap_err_with(|| format!("parse coulomb snapshot {}", path.display()))?;
    Ok(Some(snap))
}
