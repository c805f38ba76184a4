//! Lock-free service counters behind `get_system_stats` and the periodic
//! statistics snapshot.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use engram_types::stats::SystemStats;

/// Smoothing factor of the response-time average.
pub const RESPONSE_TIME_ALPHA: f64 = 0.1;

/// Bit pattern marking "no sample yet" in the EMA cell.
const NO_SAMPLE: u64 = u64::MAX;

#[derive(Debug)]
pub struct MemoryStats {
    total_queries: AtomicU64,
    /// `f64` bits of the smoothed response time.
    avg_response_time: AtomicU64,
    instance_count: AtomicUsize,
    pattern_discoveries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Unix millis, `0` before the first operation.
    last_activity: AtomicI64,
    background_dropped: AtomicU64,
}

impl Default for MemoryStats {
    fn default() -> Self {
        Self {
            total_queries: AtomicU64::new(0),
            avg_response_time: AtomicU64::new(NO_SAMPLE),
            instance_count: AtomicUsize::new(0),
            pattern_discoveries: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            last_activity: AtomicI64::new(0),
            background_dropped: AtomicU64::new(0),
        }
    }
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one caller-facing operation and fold its latency into the average.
    pub fn record_query(&self, elapsed_ms: u64, now: DateTime<Utc>) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.last_activity
            .store(now.timestamp_millis(), Ordering::Relaxed);

        let sample = elapsed_ms as f64;
        let _ = self
            .avg_response_time
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let next = if bits == NO_SAMPLE {
                    sample
                } else {
                    let avg = f64::from_bits(bits);
                    avg + RESPONSE_TIME_ALPHA * (sample - avg)
                };
                Some(next.to_bits())
            });
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_patterns(&self, count: usize) {
        self.pattern_discoveries
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_dropped_job(&self) {
        self.background_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_instance_count(&self, count: usize) {
        self.instance_count.store(count, Ordering::Relaxed);
    }

    pub fn instance_count(&self) -> usize {
        self.instance_count.load(Ordering::Relaxed)
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        match self.avg_response_time.load(Ordering::Acquire) {
            NO_SAMPLE => 0.0,
            bits => f64::from_bits(bits),
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let total = hits + self.cache_misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> SystemStats {
        let last = self.last_activity.load(Ordering::Relaxed);
        SystemStats {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            avg_response_time_ms: self.avg_response_time_ms(),
            instance_count: self.instance_count(),
            pattern_discovery_count: self.pattern_discoveries.load(Ordering::Relaxed),
            cache_hit_rate: self.cache_hit_rate(),
            last_activity: (last > 0)
                .then(|| Utc.timestamp_millis_opt(last).single())
                .flatten(),
            background_jobs_dropped: self.background_dropped.load(Ordering::Relaxed),
            table_counts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_the_average() {
        let stats = MemoryStats::new();
        assert_eq!(stats.avg_response_time_ms(), 0.0);

        stats.record_query(100, Utc::now());
        assert_eq!(stats.avg_response_time_ms(), 100.0);

        stats.record_query(200, Utc::now());
        assert!((stats.avg_response_time_ms() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn hit_rate_counts_hits_over_lookups() {
        let stats = MemoryStats::new();
        assert_eq!(stats.cache_hit_rate(), 0.0);
        stats.record_miss();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        assert_eq!(stats.cache_hit_rate(), 0.75);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let stats = MemoryStats::new();
        assert!(stats.snapshot().last_activity.is_none());

        let now = Utc::now();
        stats.record_query(5, now);
        stats.record_patterns(3);
        stats.set_instance_count(2);
        stats.record_dropped_job();

        let snap = stats.snapshot();
        assert_eq!(snap.total_queries, 1);
        assert_eq!(snap.pattern_discovery_count, 3);
        assert_eq!(snap.instance_count, 2);
        assert_eq!(snap.background_jobs_dropped, 1);
        assert_eq!(
            snap.last_activity.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }
}
