//! Cross-type retrieval ranking.
//!
//! Each store scores its own candidates. The ranker flattens the four lists,
//! applies a per-type adjustment and keeps the best `limit` entries:
//!
//! | type       | final score                                    |
//! |------------|------------------------------------------------|
//! | working    | base + max(0, 1 - age_ms / 600000) * 0.2       |
//! | episodic   | base + 0.15 when the session matches           |
//! | semantic   | base                                           |
//! | procedural | base + min(0.2, usage_count * 0.02)            |

use chrono::{DateTime, Utc};
use engram_types::memory::{
    MemoryContext, MemoryType, PerTypeMemories, RankedCandidate, ScoredMemory,
};

/// Window over which the working-memory recency bonus decays to zero.
pub const RECENCY_WINDOW_MS: f64 = 600_000.0;
pub const RECENCY_BONUS: f64 = 0.2;
pub const SESSION_BONUS: f64 = 0.15;
pub const USAGE_BONUS_PER_USE: f64 = 0.02;
pub const USAGE_BONUS_CAP: f64 = 0.2;

/// Merge and rank the per-type candidate lists.
///
/// The sort is stable over the flattened list, so ties keep the order
/// working, episodic, semantic, procedural and, within a type, the store's
/// own order.
pub fn rank(
    lists: &PerTypeMemories,
    context: &MemoryContext,
    limit: usize,
    now: DateTime<Utc>,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = MemoryType::ALL
        .into_iter()
        .flat_map(|memory_type| {
            lists
                .get(memory_type)
                .iter()
                .map(move |candidate| score(memory_type, candidate, context, now))
        })
        .collect();

    ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    ranked.truncate(limit);
    ranked
}

fn score(
    memory_type: MemoryType,
    candidate: &ScoredMemory,
    context: &MemoryContext,
    now: DateTime<Utc>,
) -> RankedCandidate {
    let base_score = if candidate.relevance_score.is_finite() {
        candidate.relevance_score
    } else {
        0.0
    };
    let record = &candidate.record;

    let bonus = match memory_type {
        MemoryType::Working => {
            let age_ms = (now - record.created_at).num_milliseconds() as f64;
            (1.0 - age_ms / RECENCY_WINDOW_MS).max(0.0) * RECENCY_BONUS
        }
        MemoryType::Episodic => match (&record.session_id, &context.session_id) {
            (Some(theirs), Some(ours)) if theirs == ours => SESSION_BONUS,
            _ => 0.0,
        },
        MemoryType::Semantic => 0.0,
        MemoryType::Procedural => {
            (record.usage_count as f64 * USAGE_BONUS_PER_USE).min(USAGE_BONUS_CAP)
        }
    };

    RankedCandidate {
        record: record.clone(),
        memory_type,
        base_score,
        final_score: base_score + bonus,
    }
}
