use std::time::Duration;

use rand::Rng;
use strata_error::ErrorClass;

const MAX_DELAY: Duration = Duration::from_secs(60);

fn base_delay(class: ErrorClass) -> Duration {
    match class {
        ErrorClass::Transient => Duration::from_secs(1),
        ErrorClass::Throttled => Duration::from_secs(5),
        ErrorClass::Conflict => Duration::from_secs(2),
        ErrorClass::Permanent => Duration::ZERO, // never retried, see ErrorClass::retryable
    }
}

/// Exponential backoff with ±25% jitter, clamped to 60s regardless of attempt.
pub fn compute_backoff(class: ErrorClass, attempt: u32) -> Duration {
    let base = base_delay(class);
    let delay = base.saturating_mul(1u32 << attempt.min(20));
    let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
    let jittered_nanos = (delay.as_nanos() as f64) * (1.0 + jitter_frac);
    let jittered = Duration::from_nanos(jittered_nanos.max(0.0) as u64);
    jittered.min(MAX_DELAY)
}
