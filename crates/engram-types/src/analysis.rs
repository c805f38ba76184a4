//! Records produced by the background analyzers: discovered patterns and
//! memory evolution events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// A recurring pattern observed in an instance's stored content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPattern {
    pub agent_id: String,
    pub user_id: String,
    /// e.g. "keyword" or "content_type".
    pub pattern_type: String,
    pub pattern_key: String,
    pub occurrences: u64,
    /// `occurrences` relative to the instance's most frequent pattern.
    pub confidence: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Filter for pattern listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_type: Option<String>,
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: u64,
    #[serde(default = "default_pattern_limit")]
    pub limit: usize,
}

fn default_min_occurrences() -> u64 {
    2
}

fn default_pattern_limit() -> usize {
    20
}

impl Default for PatternQuery {
    fn default() -> Self {
        Self {
            pattern_type: None,
            min_occurrences: default_min_occurrences(),
            limit: default_pattern_limit(),
        }
    }
}

/// Kind of memory evolution observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvolutionKind {
    /// Previously seen content was stored again.
    Reinforcement,
    /// Important content that bypassed semantic memory.
    Promotion,
    /// Periodic marker after a batch of stores.
    Consolidation,
}

impl fmt::Display for EvolutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvolutionKind::Reinforcement => write!(f, "reinforcement"),
            EvolutionKind::Promotion => write!(f, "promotion"),
            EvolutionKind::Consolidation => write!(f, "consolidation"),
        }
    }
}

impl FromStr for EvolutionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reinforcement" => Ok(EvolutionKind::Reinforcement),
            "promotion" => Ok(EvolutionKind::Promotion),
            "consolidation" => Ok(EvolutionKind::Consolidation),
            other => Err(format!("invalid evolution kind: '{other}'")),
        }
    }
}

/// One evolution observation for an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionEvent {
    pub id: Uuid,
    pub agent_id: String,
    pub user_id: String,
    pub kind: EvolutionKind,
    pub summary: String,
    /// How many times the triggering content has been seen.
    pub occurrences: u64,
    pub created_at: DateTime<Utc>,
}

/// Aggregate evolution counters across all instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionStats {
    pub total_evaluations: u64,
    pub total_events: u64,
    pub reinforcements: u64,
    pub promotions: u64,
    pub consolidations: u64,
    pub tracked_instances: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Paging for evolution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EvolutionKind>,
}

fn default_history_limit() -> usize {
    50
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
            kind: None,
        }
    }
}
