use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Seconds elapsed since `start`, rounded to the two decimal digits
/// callers are allowed to rely on.
pub fn elapsed_seconds(start: Instant) -> f64 {
    round_seconds(start.elapsed())
}

pub fn round_seconds(elapsed: Duration) -> f64 {
    format!("{:.2}", elapsed.as_secs_f64())
        .parse()
        .unwrap_or(0.0)
}
