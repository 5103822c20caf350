//! Jittered backoff computation shared by every retrying stage.
//!
//! The pipeline uses one backoff shape everywhere: `rand(K·n, K·n²)` seconds
//! for attempt `n` with a configured factor `K`. Retries past the per-lane
//! cap are terminal errors, never slept on.

use rand::Rng;

/// Compute the requeue delay in seconds for the given attempt.
///
/// Attempt numbers are 1-based; attempt 0 is treated as 1 so a freshly
/// constructed message still gets a non-zero delay.
pub fn retry_backoff(factor_secs: i64, attempt: u32) -> i64 {
    let n = i64::from(attempt.max(1));
    let lo = factor_secs * n;
    let hi = factor_secs * n * n;
    if hi <= lo {
        return lo;
    }
    rand::thread_rng().gen_range(lo..=hi)
}

/// Randomized visibility delay used by the upload dispatcher to spread
/// fan-out from bulk uploads.
pub fn dispatch_delay(min_secs: i64, max_secs: i64) -> i64 {
    if max_secs <= min_secs {
        return min_secs;
    }
    rand::thread_rng().gen_range(min_secs..=max_secs)
}
