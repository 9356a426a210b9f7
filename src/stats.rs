//! The statistics engine (spec.md §4.2, component C2).
//!
//! Pure functions over [`crate::model`] records — no I/O, no locking. The
//! router calls these between a provider load and a provider save.

use crate::model::{ProviderRecord, ResponseEntry};

/// Smoothing factor for every EMA in this crate.
pub const EMA_ALPHA: f64 = 0.3;

/// Retention window for `responseTimes` entries.
pub const RESPONSE_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// `ema' = α·x + (1−α)·ema`; `None` previous seeds with `x`. NaN `x` leaves
/// the previous value untouched. Result is rounded to two decimals.
pub fn ema_update(previous: Option<f64>, x: f64) -> Option<f64> {
    if x.is_nan() {
        return previous;
    }
    let next = match previous {
        Some(prev) => EMA_ALPHA * x + (1.0 - EMA_ALPHA) * prev,
        None => x,
    };
    Some(round2(next))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Removes every `ResponseEntry` older than [`RESPONSE_WINDOW_MS`] relative to `now_ms`.
pub fn trim_window(entries: &mut Vec<ResponseEntry>, now_ms: i64) {
    entries.retain(|e| now_ms - e.timestamp <= RESPONSE_WINDOW_MS);
}

/// Applies [`trim_window`] to every model on every provider.
pub fn trim_all(providers: &mut [ProviderRecord], now_ms: i64) {
    for p in providers.iter_mut() {
        for m in p.models.values_mut() {
            trim_window(&mut m.response_times, now_ms);
        }
    }
}

/// Per-provider recompute (spec.md §4.2): resets each model's three EMAs,
/// refolds `responseTimes` in order, and derives provider-level
/// `avgResponseTimeMs` / `avgProviderLatencyMs` from the per-model means.
pub fn recompute_provider(provider: &mut ProviderRecord) {
    let mut response_time_sum = 0.0;
    let mut response_time_n = 0u64;
    let mut latency_sum = 0.0;
    let mut latency_n = 0u64;

    for model in provider.models.values_mut() {
        model.avg_response_time_ms = None;
        model.avg_provider_latency_ms = None;
        model.avg_token_speed = None;

        for entry in &model.response_times {
            model.avg_response_time_ms = ema_update(model.avg_response_time_ms, entry.response_time_ms);
            response_time_sum += entry.response_time_ms;
            response_time_n += 1;

            if let Some(latency) = entry.provider_latency_ms {
                model.avg_provider_latency_ms = ema_update(model.avg_provider_latency_ms, latency);
                latency_sum += latency;
                latency_n += 1;
            }
            if let Some(speed) = entry.observed_speed_tps {
                model.avg_token_speed = ema_update(model.avg_token_speed, speed);
            }
        }

        if model.avg_token_speed.is_none() {
            model.avg_token_speed = Some(model.token_generation_speed);
        }
    }

    provider.avg_response_time_ms = if response_time_n > 0 {
        Some(round2(response_time_sum / response_time_n as f64))
    } else {
        None
    };
    provider.avg_provider_latency_ms = if latency_n > 0 {
        Some(round2(latency_sum / latency_n as f64))
    } else {
        None
    };
}

/// Latency sub-score: 100 at/below 50ms, 0 at/above 5000ms, linear between.
/// Absent latency scores 50.
fn latency_subscore(avg_provider_latency_ms: Option<f64>) -> f64 {
    match avg_provider_latency_ms {
        None => 50.0,
        Some(ms) if ms <= 50.0 => 100.0,
        Some(ms) if ms >= 5000.0 => 0.0,
        Some(ms) => 100.0 * (1.0 - (ms - 50.0) / (5000.0 - 50.0)),
    }
}

/// Error sub-score: `100 · (1 − min(1, errors/totalRequests))`; `totalRequests
/// == 0` with `errors > 0` scores 0; with no errors and no requests, 100.
fn error_subscore(errors: u64, total_requests: u64) -> f64 {
    if total_requests == 0 {
        return if errors > 0 { 0.0 } else { 100.0 };
    }
    let ratio = (errors as f64 / total_requests as f64).min(1.0);
    100.0 * (1.0 - ratio)
}

/// Combines the two sub-scores with weights 0.7 (latency) / 0.3 (errors),
/// normalizing if they don't already sum to 1, rounded and clamped to [0, 100].
pub fn score(provider: &ProviderRecord) -> i32 {
    const LATENCY_WEIGHT: f64 = 0.7;
    const ERROR_WEIGHT: f64 = 0.3;
    let total_weight = LATENCY_WEIGHT + ERROR_WEIGHT;

    let latency = latency_subscore(provider.avg_provider_latency_ms);
    let errs = error_subscore(provider.errors, provider.total_requests());

    let combined = (LATENCY_WEIGHT * latency + ERROR_WEIGHT * errs) / total_weight;
    combined.round().clamp(0.0, 100.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelStats, ProviderRecord};

    #[test]
    fn ema_seeds_from_absent() {
        assert_eq!(ema_update(None, 42.0), Some(42.0));
    }

    #[test]
    fn ema_ignores_nan() {
        assert_eq!(ema_update(Some(10.0), f64::NAN), Some(10.0));
    }

    #[test]
    fn ema_converges_within_20_iterations() {
        let mut ema = None;
        for _ in 0..20 {
            ema = ema_update(ema, 100.0);
        }
        let v = ema.unwrap();
        assert!((v - 100.0).abs() < 0.01, "expected convergence, got {v}");
    }

    #[test]
    fn trim_window_drops_old_entries() {
        let mut entries = vec![
            ResponseEntry {
                timestamp: 0,
                response_time_ms: 1.0,
                input_tokens: 1,
                output_tokens: 1,
                tokens_generated: 1,
                provider_latency_ms: None,
                observed_speed_tps: None,
                api_key: "k".into(),
            },
            ResponseEntry {
                timestamp: RESPONSE_WINDOW_MS + 10_000,
                response_time_ms: 1.0,
                input_tokens: 1,
                output_tokens: 1,
                tokens_generated: 1,
                provider_latency_ms: None,
                observed_speed_tps: None,
                api_key: "k".into(),
            },
        ];
        trim_window(&mut entries, RESPONSE_WINDOW_MS + 10_000);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp, RESPONSE_WINDOW_MS + 10_000);
    }

    #[test]
    fn latency_subscore_bounds() {
        assert_eq!(latency_subscore(Some(50.0)), 100.0);
        assert_eq!(latency_subscore(Some(5000.0)), 0.0);
        assert_eq!(latency_subscore(None), 50.0);
    }

    #[test]
    fn error_subscore_no_requests_no_errors_is_100() {
        assert_eq!(error_subscore(0, 0), 100.0);
        assert_eq!(error_subscore(1, 0), 0.0);
    }

    #[test]
    fn score_clamped_and_combined() {
        let mut p = ProviderRecord::new("p1", "http://x", None);
        p.models.insert("m".into(), ModelStats::new("m", None));
        p.avg_provider_latency_ms = Some(50.0);
        p.errors = 0;
        // no response_times recorded -> total_requests via models is 0, errors 0 => error_subscore 100
        assert_eq!(score(&p), 100);
    }
}
