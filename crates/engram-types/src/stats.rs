//! Service statistics and health reporting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::MemoryTableCounts;

/// Point-in-time snapshot of memory service activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_queries: u64,
    /// Exponentially smoothed response time in milliseconds.
    pub avg_response_time_ms: f64,
    pub instance_count: usize,
    pub pattern_discovery_count: u64,
    /// Registry hits over all registry lookups, `0.0` before the first lookup.
    pub cache_hit_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    pub background_jobs_dropped: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_counts: Option<MemoryTableCounts>,
}

/// Overall health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub database: bool,
    pub instances: usize,
    pub checked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
