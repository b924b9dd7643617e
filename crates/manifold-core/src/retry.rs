// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use rand::Rng;

/// Exponential backoff for transient provider errors.
///
/// `attempts` counts total tries, not retries: the default of 3 means one
/// initial call plus up to two backed-off retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_millis(500),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No retries at all; useful in tests.
    pub fn none() -> Self {
        Self { attempts: 1, ..Default::default() }
    }

    /// Backoff before retry number `attempt` (0-based: the delay after the
    /// first failure is `delay(0)`).  Jitter scales by 0.5–1.5 so synchronized
    /// clients spread out.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * self.factor.powi(attempt as i32);
        let jittered = if self.jitter {
            exp * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            exp
        };
        Duration::from_secs_f64(jittered)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unjittered_delays_double() {
        let p = RetryPolicy { jitter: false, ..Default::default() };
        assert_eq!(p.delay(0), Duration::from_millis(500));
        assert_eq!(p.delay(1), Duration::from_millis(1000));
        assert_eq!(p.delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn jitter_stays_within_half_to_one_and_a_half() {
        let p = RetryPolicy::default();
        for attempt in 0..3 {
            let nominal = 0.5 * 2.0f64.powi(attempt);
            let d = p.delay(attempt as u32).as_secs_f64();
            assert!(d >= nominal * 0.5 && d <= nominal * 1.5, "delay {d} at {attempt}");
        }
    }

    #[test]
    fn none_policy_allows_single_attempt() {
        assert_eq!(RetryPolicy::none().attempts, 1);
    }
}
