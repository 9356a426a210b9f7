//! In-memory traffic log (SPEC_FULL §10 ambient supplement).
//!
//! A fixed-capacity ring buffer of recent request outcomes, kept purely for
//! admin introspection (`GET /api/admin/traffic`). It is advisory only, never
//! authoritative — unlike the three state-store documents it is not
//! persisted and a restart clears it, consistent with spec.md's framing of
//! statistics as advisory and the router's own provider stats being the
//! durable record.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct TrafficLog {
    capacity: usize,
    entries: Mutex<VecDeque<TrafficEntry>>,
}

impl TrafficLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Records a completed request. Best-effort: if the lock is contended
    /// the entry is dropped rather than delaying the response path.
    pub fn push(&self, entry: TrafficEntry) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    pub async fn recent(&self, limit: usize) -> Vec<TrafficEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub async fn stats(&self) -> TrafficStats {
        let entries = self.entries.lock().await;
        let total = entries.len();
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            entries.iter().map(|e| e.latency_ms).sum::<f64>() / total as f64
        };
        let error_count = entries.iter().filter(|e| !e.success).count();

        let mut provider_counts = std::collections::HashMap::new();
        for entry in entries.iter() {
            if let Some(provider_id) = &entry.provider_id {
                *provider_counts.entry(provider_id.clone()).or_insert(0usize) += 1;
            }
        }

        TrafficStats { total_requests: total, error_count, avg_latency_ms, provider_counts }
    }
}

/// One request/response pair, as observed at the HTTP/WS boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub route: String,
    pub model: String,
    /// Which provider ultimately served the request, if any candidate succeeded.
    pub provider_id: Option<String>,
    pub latency_ms: f64,
    pub success: bool,
    pub error: Option<String>,
}

impl TrafficEntry {
    pub fn new(route: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            route: route.into(),
            model: model.into(),
            provider_id: None,
            latency_ms: 0.0,
            success: false,
            error: None,
        }
    }

    pub fn success(mut self, provider_id: impl Into<String>, latency_ms: f64) -> Self {
        self.provider_id = Some(provider_id.into());
        self.latency_ms = latency_ms;
        self.success = true;
        self
    }

    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.success = false;
        self
    }
}

#[derive(Debug, Serialize)]
pub struct TrafficStats {
    pub total_requests: usize,
    pub error_count: usize,
    pub avg_latency_ms: f64,
    pub provider_counts: std::collections::HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_and_retrieve_single_entry() {
        let log = TrafficLog::new(10);
        log.push(TrafficEntry::new("chat_completions", "gpt-3.5-turbo").success("p1", 42.0));

        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].provider_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn oldest_entry_evicted_when_capacity_exceeded() {
        let log = TrafficLog::new(2);
        log.push(TrafficEntry::new("chat_completions", "m").success("oldest", 1.0));
        log.push(TrafficEntry::new("chat_completions", "m").success("middle", 2.0));
        log.push(TrafficEntry::new("chat_completions", "m").success("newest", 3.0));

        let all = log.recent(100).await;
        assert_eq!(all.len(), 2);
        assert!(!all.iter().any(|e| e.provider_id.as_deref() == Some("oldest")));
    }

    #[tokio::test]
    async fn stats_averages_latency_and_counts_errors() {
        let log = TrafficLog::new(10);
        log.push(TrafficEntry::new("chat_completions", "m").success("p1", 100.0));
        log.push(TrafficEntry::new("chat_completions", "m").failure("boom"));

        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.avg_latency_ms, 50.0);
    }
}
