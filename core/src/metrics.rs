/// Metrics recorder for the message cache
/// Counts lookups, optimistic updates, reconciliations, and evictions
use serde::Serialize;
use std::cell::Cell;
use tracing::warn;

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub optimistic_updates: u64,
    pub reconciliations: u64,
    pub reconcile_inserts: u64,
    pub rollbacks: u64,
    pub evictions: u64,
    pub malformed_inputs: u64,
}

impl CacheMetrics {
    /// Hit ratio (0.0 to 1.0); 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Counters live in a `Cell` so read paths can record hits through `&self`
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    metrics: Cell<CacheMetrics>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, f: impl FnOnce(&mut CacheMetrics)) {
        let mut metrics = self.metrics.get();
        f(&mut metrics);
        self.metrics.set(metrics);
    }

    pub fn record_lookup(&self, hit: bool) {
        self.bump(|m| {
            if hit {
                m.hits += 1;
            } else {
                m.misses += 1;
            }
        });
    }

    pub fn record_optimistic_update(&self) {
        self.bump(|m| m.optimistic_updates += 1);
    }

    /// `inserted` is true when reconciliation found nothing and created a record
    pub fn record_reconciliation(&self, inserted: bool) {
        self.bump(|m| {
            m.reconciliations += 1;
            if inserted {
                m.reconcile_inserts += 1;
            }
        });
    }

    pub fn record_rollback(&self) {
        self.bump(|m| m.rollbacks += 1);
    }

    pub fn record_evictions(&self, count: usize) {
        self.bump(|m| m.evictions += count as u64);
    }

    /// Log and count a payload that needed defaults
    pub fn record_malformed(&self, correlation_id: &str, defaulted: &[&'static str]) {
        self.bump(|m| m.malformed_inputs += 1);
        warn!(
            "Malformed message payload {}: defaulted {}",
            correlation_id,
            defaulted.join(", ")
        );
    }

    pub fn snapshot(&self) -> CacheMetrics {
        self.metrics.get()
    }

    pub fn reset(&self) {
        self.metrics.set(CacheMetrics::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recorder() {
        let recorder = MetricsRecorder::new();
        recorder.record_lookup(true);
        recorder.record_lookup(true);
        recorder.record_lookup(false);
        recorder.record_optimistic_update();
        recorder.record_reconciliation(true);
        recorder.record_reconciliation(false);
        recorder.record_evictions(3);
        recorder.record_malformed("c1", &["conversationId"]);

        let m = recorder.snapshot();
        assert_eq!(m.hits, 2);
        assert_eq!(m.misses, 1);
        assert_eq!(m.optimistic_updates, 1);
        assert_eq!(m.reconciliations, 2);
        assert_eq!(m.reconcile_inserts, 1);
        assert_eq!(m.evictions, 3);
        assert_eq!(m.malformed_inputs, 1);
        assert!((m.hit_rate() - 2.0 / 3.0).abs() < 1e-9);

        recorder.reset();
        assert_eq!(recorder.snapshot(), CacheMetrics::default());
        assert_eq!(recorder.snapshot().hit_rate(), 0.0);
    }
}
