//! Fixed-point charge arithmetic helpers.
//!
//! Charge is held in microcoulombs (`i64`, 1 uC = 1 mA * 1 ms). Integrating
//! milliamps over whole milliseconds is then exact for integral currents and
//! the accumulator never loses resolution to float rounding over long runs.

use std::time::Duration;

/// Microcoulombs in one millicoulomb.
pub const UC_PER_MC: i64 = 1_000;
/// Milliamp-seconds in one milliamp-hour.
pub const MC_PER_MAH: f64 = 3_600.0;

/// Quantize `current_ma * dt` to integer microcoulombs, rounding to nearest
/// and clamping to the `i64` range. Non-finite products map to 0.
#[inline]
pub fn charge_uc(current_ma: f32, dt: Duration) -> i64 {
    // ns -> ms without going through a lossy secs_f64
    let dt_ms = dt.as_nanos() as f64 / 1_000_000.0;
    quantize_to_i64(f64::from(current_ma) * dt_ms)
}

/// Round to nearest and clamp to `i64`; NaN/±Inf map to 0.
#[inline]
pub fn quantize_to_i64(x: f64) -> i64 {
    if !x.is_finite() {
        return 0;
    }
    let r = x.round();
    if r >= i64::MAX as f64 {
        i64::MAX
    } else if r <= i64::MIN as f64 {
        i64::MIN
    } else {
        r as i64
    }
}

/// Convert a millicoulomb quantity to microcoulombs.
#[inline]
pub fn mc_to_uc(mc: f64) -> i64 {
    quantize_to_i64(mc * UC_PER_MC as f64)
}

/// Convert microcoulombs to millicoulombs.
#[inline]
pub fn uc_to_mc(uc: i64) -> f64 {
    uc as f64 / UC_PER_MC as f64
}

/// Rated pack charge in millicoulombs for `cells` of `cell_mah` in parallel.
#[inline]
pub fn capacity_mc(cell_mah: f32, cells: u32) -> f64 {
    f64::from(cell_mah) * f64::from(cells) * MC_PER_MAH
}
