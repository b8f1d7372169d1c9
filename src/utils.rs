// src/utils.rs
// Time and validation-round helpers for the staking SDK

use std::time::{SystemTime, UNIX_EPOCH};

/// Approximate length of one validation round, in seconds (2^16).
pub const ROUND_DURATION_SECS: i64 = 65_536;

/// Validation rounds in a 365-day year.
pub fn rounds_per_year() -> f64 {
    (365 * 24 * 60 * 60) as f64 / ROUND_DURATION_SECS as f64
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub fn now_secs() -> i64 {
    now_millis() / 1000
}

/// Estimated `(start, end)` of the round that ends one full round from `now`.
pub fn round_window(now_secs: i64) -> (i64, i64) {
    let end = now_secs + ROUND_DURATION_SECS;
    (end - ROUND_DURATION_SECS, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_window_spans_one_round() {
        let (start, end) = round_window(1_700_000_000);
        assert_eq!(start, 1_700_000_000);
        assert_eq!(end - start, ROUND_DURATION_SECS);
    }

    #[test]
    fn about_481_rounds_per_year() {
        let rpy = rounds_per_year();
        assert!((rpy - 481.21875).abs() < 1e-9);
    }
}
