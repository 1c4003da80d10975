//! Common time and integer helpers for bms_core.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;
/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Compute the period in microseconds for a given cycle rate in Hz.
/// - Clamps `hz` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 microsecond.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    debug_assert!(hz > 0, "cycle_rate_hz must be > 0");
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Compute the period in milliseconds for a given cycle rate in Hz.
/// - Clamps `hz` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 millisecond.
#[inline]
pub fn period_ms(hz: u32) -> u64 {
    debug_assert!(hz > 0, "cycle_rate_hz must be > 0");
    (MILLIS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Divide rounding to nearest with ties away from zero. A zero divisor is
/// treated as 1 in release builds. Uses 64-bit intermediates; the quotient of
/// any i32 pair fits back in i32.
#[inline]
pub fn div_round_nearest_i32(n: i32, d: i32) -> i32 {
    debug_assert!(d != 0, "division by zero");
    let n64 = i64::from(n);
    let d64 = i64::from(if d == 0 { 1 } else { d });
    let half = d64.abs() / 2;
    let mag = (n64.abs() + half) / d64.abs();
    let q = if (n64 >= 0) == (d64 >= 0) { mag } else { -mag };
    q as i32
}
