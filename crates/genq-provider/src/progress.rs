//! Progress estimation while a remote job runs.
//!
//! Providers do not report fractional progress, so progress is derived from
//! the time spent against the polling budget.

use std::time::Duration;

/// Progress reported right after submission.
pub const POLL_PROGRESS_FLOOR: u8 = 50;

/// Highest progress reported while still polling.
pub const POLL_PROGRESS_CAP: u8 = 90;

/// Estimate progress from elapsed time.
///
/// Grows linearly from `floor` at zero elapsed to `cap` at the full budget,
/// never leaving `[floor, cap]` and never decreasing as `elapsed` grows.
pub fn estimate_progress(elapsed: Duration, budget: Duration, floor: u8, cap: u8) -> u8 {
    let floor = floor.min(cap);
    if budget.is_zero() {
        return cap;
    }

    let fraction = (elapsed.as_secs_f64() / budget.as_secs_f64()).min(1.0);
    let span = f64::from(cap - floor);

    floor + (fraction * span) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_matches_linear_heuristic() {
        let budget = secs(600);
        assert_eq!(estimate_progress(secs(0), budget, 50, 90), 50);
        assert_eq!(estimate_progress(secs(300), budget, 50, 90), 70);
        assert_eq!(estimate_progress(secs(600), budget, 50, 90), 90);
    }

    #[test]
    fn test_bounded_past_budget() {
        assert_eq!(estimate_progress(secs(5000), secs(600), 50, 90), 90);
        assert_eq!(estimate_progress(secs(1), Duration::ZERO, 50, 90), 90);
    }

    #[test]
    fn test_monotone_in_elapsed() {
        let budget = secs(900);
        let mut last = 0;
        for s in (0..1200).step_by(7) {
            let p = estimate_progress(secs(s), budget, POLL_PROGRESS_FLOOR, POLL_PROGRESS_CAP);
            assert!(p >= last);
            assert!((POLL_PROGRESS_FLOOR..=POLL_PROGRESS_CAP).contains(&p));
            last = p;
        }
    }
}
