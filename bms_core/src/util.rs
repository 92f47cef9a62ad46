//! Common time/tolerance helpers for bms_core.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Two brick voltages closer than this are the same voltage.
///
/// Half an LSB of a 14-bit converter spanning 5 V.
pub const RANK_TOLERANCE_V: f32 = 0.000_1;

/// Compute the period in microseconds for a given sampling rate in Hz.
/// - Clamps `hz` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 microsecond.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    debug_assert!(hz > 0, "current_sample_hz must be > 0");
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Tolerance comparison for sensor-derived floats.
///
/// Equal when the difference is within `tol`, or within a few ULPs relative
/// to the operands' magnitude when `tol` is smaller than that.
#[inline]
pub fn fequals(a: f32, b: f32, tol: f32) -> bool {
    let diff = (a - b).abs();
    let scale = a.abs().max(b.abs()).max(1.0);
    diff <= tol.max(f32::EPSILON * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fequals_uses_tolerance_and_relative_floor() {
        assert!(fequals(3.7, 3.70005, RANK_TOLERANCE_V));
        assert!(!fequals(3.7, 3.7002, RANK_TOLERANCE_V));
        assert!(fequals(1000.0, 1000.0 + 1e-5, 0.0));
        assert!(!fequals(f32::NAN, f32::NAN, 1.0));
    }

    #[test]
    fn period_us_floors_to_one_microsecond() {
        assert_eq!(period_us(1), 1_000_000);
        assert_eq!(period_us(200), 5_000);
        assert_eq!(period_us(u32::MAX), 1);
    }
}
