//! Monotonic microsecond clock.
//!
//! `std::time::Instant` is monotonic and MT-safe on every supported
//! platform. Timestamps are measured from a process-wide origin captured on
//! first use; absolute values are only meaningful relative to each other,
//! which is all the timer machinery needs.

use std::sync::OnceLock;
use std::time::Instant;

fn origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// Returns the current monotonic time in microseconds since the process
/// origin.
#[inline]
pub fn monotonic_us() -> u64 {
    origin().elapsed().as_micros() as u64
}

/// Returns the current monotonic time in milliseconds since the process
/// origin.
#[inline]
pub fn monotonic_ms() -> u64 {
    monotonic_us() / 1000
}
