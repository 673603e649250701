//! Native playback time helpers
//!
//! Native times are expressed in microseconds on the stream's own
//! presentation clock. An absent time is represented as `None` rather than
//! a reserved sentinel value.

use std::time::Duration;

/// Native playback time, microseconds
pub type NativeTime = u64;

/// Microseconds in one second
pub const MICROSECONDS_PER_SECOND: u64 = 1_000_000;

/// Convert milliseconds to native time units
pub fn millis_to_native(ms: u64) -> NativeTime {
    ms * 1000
}

/// Convert a native time delta to a `Duration`
pub fn native_to_duration(delta: NativeTime) -> Duration {
    Duration::from_micros(delta)
}

/// Absolute difference between two native times
pub fn native_delta(a: NativeTime, b: NativeTime) -> NativeTime {
    a.abs_diff(b)
}

/// Scale a base duration inversely with playback speed
///
/// A paused (zero) or invalid speed leaves the duration untouched. A result
/// too large to represent saturates at `Duration::MAX`.
pub fn scale_by_speed(base: Duration, speed: f64) -> Duration {
    let magnitude = speed.abs();
    if !magnitude.is_finite() || magnitude <= f64::EPSILON {
        return base;
    }
    Duration::try_from_secs_f64(base.as_secs_f64() / magnitude).unwrap_or(Duration::MAX)
}
