//! Wall-clock access.
//!
//! All subsystem logic takes `now: i64` (Unix seconds) as a parameter so
//! tests can drive time deterministically; this helper is only called at
//! the outermost entry points.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
