//! Per-key rate limiter (spec.md §4.6, component C6).
//!
//! Three sliding windows (1s/60s/86400s) of request timestamps per API key,
//! pruned on every access. Shared between the HTTP and WebSocket paths
//! (spec.md §5: "a per-key lock or a map-wide lock. Operations are O(window
//! size) worst case"). Structurally this is the teacher's per-IP
//! `DashMap`-of-buckets idiom (`api/rate_limit.rs`) generalized from a
//! token-bucket to the three-deque counter the tiered quality window needs.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::model::TierLimits;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const DAY_MS: i64 = 86_400 * SECOND_MS;

#[derive(Debug, Default)]
struct KeyWindows {
    per_second: VecDeque<i64>,
    per_minute: VecDeque<i64>,
    per_day: VecDeque<i64>,
}

/// Which window rejected the request, used to compute the `Retry-After` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Second,
    Minute,
    Day,
}

pub struct RateLimiter {
    keys: DashMap<String, KeyWindows>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { keys: DashMap::new() }
    }

    /// Checks and, if allowed, records `now_ms` against `api_key`'s windows.
    /// Returns the exceeded window (and a `Retry-After` hint in seconds) on
    /// rejection. A tier limit of `0` means unlimited.
    pub fn check(&self, api_key: &str, tier: &TierLimits, now_ms: i64) -> Result<(), (Window, u64)> {
        let mut entry = self.keys.entry(api_key.to_string()).or_default();

        prune(&mut entry.per_second, now_ms, SECOND_MS);
        prune(&mut entry.per_minute, now_ms, MINUTE_MS);
        prune(&mut entry.per_day, now_ms, DAY_MS);

        if let Some(hint) = over_limit(&entry.per_second, tier.rps, now_ms, SECOND_MS) {
            return Err((Window::Second, hint));
        }
        if let Some(hint) = over_limit(&entry.per_minute, tier.rpm, now_ms, MINUTE_MS) {
            return Err((Window::Minute, hint));
        }
        if let Some(hint) = over_limit(&entry.per_day, tier.rpd, now_ms, DAY_MS) {
            return Err((Window::Day, hint));
        }

        entry.per_second.push_back(now_ms);
        entry.per_minute.push_back(now_ms);
        entry.per_day.push_back(now_ms);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn prune(deque: &mut VecDeque<i64>, now_ms: i64, window_ms: i64) {
    while let Some(&front) = deque.front() {
        if now_ms - front > window_ms {
            deque.pop_front();
        } else {
            break;
        }
    }
}

/// Returns `Some(retry_after_secs)` if `limit` (0 = unlimited) is already met.
fn over_limit(deque: &VecDeque<i64>, limit: u32, now_ms: i64, window_ms: i64) -> Option<u64> {
    if limit == 0 || (deque.len() as u32) < limit {
        return None;
    }
    let oldest = *deque.front().unwrap_or(&now_ms);
    let retry_after_ms = (oldest + window_ms - now_ms).max(0);
    Some((retry_after_ms as u64).div_ceil(1000).max(1))
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(rps: u32, rpm: u32, rpd: u32) -> TierLimits {
        TierLimits { rps, rpm, rpd, max_tokens: None, min_provider_score: None, max_provider_score: None }
    }

    #[test]
    fn unlimited_tier_never_rejects() {
        let limiter = RateLimiter::new();
        let t = tier(0, 0, 0);
        for i in 0..1000 {
            assert!(limiter.check("k", &t, i).is_ok());
        }
    }

    #[test]
    fn rpm_fairness_nth_plus_one_fails_then_succeeds_after_aging_out() {
        let limiter = RateLimiter::new();
        let t = tier(0, 5, 0);

        for i in 0..5 {
            assert!(limiter.check("k", &t, i * 100).is_ok());
        }
        assert!(limiter.check("k", &t, 500).is_err());

        // After the first timestamp (t=0) ages out of the 60s window.
        assert!(limiter.check("k", &t, MINUTE_MS + 1).is_ok());
    }

    #[test]
    fn rps_gate_independent_of_rpm() {
        let limiter = RateLimiter::new();
        let t = tier(1, 100, 0);
        assert!(limiter.check("k", &t, 0).is_ok());
        let err = limiter.check("k", &t, 10).unwrap_err();
        assert_eq!(err.0, Window::Second);
    }

    #[test]
    fn different_keys_are_independent() {
        let limiter = RateLimiter::new();
        let t = tier(1, 0, 0);
        assert!(limiter.check("a", &t, 0).is_ok());
        assert!(limiter.check("b", &t, 0).is_ok());
    }
}
