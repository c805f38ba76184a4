//! Pattern discovery over the `memory_patterns` table.
//!
//! Every stored memory contributes keyword, content-type and tag patterns
//! for its instance. Re-observing a pattern bumps its occurrence count and
//! `last_seen`. Retrieval enhancement is purely local: duplicate summaries
//! within a type list collapse to their best-scored copy.

use std::collections::HashMap;

use chrono::Utc;
use engram_core::memory::pattern::PatternDiscovery;
use engram_types::analysis::{DiscoveredPattern, PatternQuery};
use engram_types::envelope::payload_text;
use engram_types::error::RepositoryError;
use engram_types::memory::{
    InstanceKey, MemoryContext, MemoryMetadata, MemoryType, PerTypeMemories, ScoredMemory,
    StoredMemory,
};
use serde_json::Value;
use sqlx::Row;

use super::pool::DatabasePool;
use super::terms::keywords;
use super::{format_datetime, parse_datetime, query_error};

/// Keywords recorded per stored memory, in order of first appearance.
const MAX_KEYWORDS_PER_MEMORY: usize = 16;

/// SQLite-backed implementation of `PatternDiscovery`.
#[derive(Debug, Clone)]
pub struct SqlitePatternDiscovery {
    pool: DatabasePool,
}

impl SqlitePatternDiscovery {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// `(pattern_type, pattern_key)` pairs found in one stored memory.
fn extract_patterns(content: &Value, metadata: &MemoryMetadata) -> Vec<(&'static str, String)> {
    let mut patterns: Vec<(&'static str, String)> = keywords(&payload_text(content))
        .into_iter()
        .take(MAX_KEYWORDS_PER_MEMORY)
        .map(|k| ("keyword", k))
        .collect();

    if let Some(ct) = metadata
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
    {
        patterns.push(("content_type", ct.to_lowercase()));
    }

    for tag in &metadata.tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !patterns.iter().any(|(t, k)| *t == "tag" && *k == tag) {
            patterns.push(("tag", tag));
        }
    }
    patterns
}

/// Drop repeated summaries, keeping the best-scored copy, then order by score.
fn dedupe_by_summary(list: Vec<ScoredMemory>) -> Vec<ScoredMemory> {
    let mut best: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<ScoredMemory> = Vec::with_capacity(list.len());

    for candidate in list {
        let summary = candidate
            .record
            .content
            .summary_text()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        match best.get(&summary) {
            Some(&idx) => {
                if candidate.relevance_score > kept[idx].relevance_score {
                    kept[idx] = candidate;
                }
            }
            None => {
                best.insert(summary, kept.len());
                kept.push(candidate);
            }
        }
    }

    kept.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    kept
}

impl PatternDiscovery for SqlitePatternDiscovery {
    async fn analyze_new_memory(
        &self,
        key: &InstanceKey,
        content: &Value,
        _context: &MemoryContext,
        metadata: &MemoryMetadata,
        results: &[StoredMemory],
    ) -> Result<usize, RepositoryError> {
        if results.is_empty() {
            return Ok(0);
        }
        let patterns = extract_patterns(content, metadata);
        if patterns.is_empty() {
            return Ok(0);
        }

        let now = format_datetime(&Utc::now());
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        for (pattern_type, pattern_key) in &patterns {
            sqlx::query(
                "INSERT INTO memory_patterns (agent_id, user_id, pattern_type, pattern_key, occurrences, first_seen, last_seen) \
                 VALUES (?, ?, ?, ?, 1, ?, ?) \
                 ON CONFLICT (agent_id, user_id, pattern_type, pattern_key) \
                 DO UPDATE SET occurrences = occurrences + 1, last_seen = excluded.last_seen",
            )
            .bind(&key.agent_id)
            .bind(&key.user_id)
            .bind(*pattern_type)
            .bind(pattern_key)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }
        tx.commit().await.map_err(query_error)?;

        tracing::debug!(instance = %key, patterns = patterns.len(), "patterns recorded");
        Ok(patterns.len())
    }

    async fn enhance_retrieval(
        &self,
        _key: &InstanceKey,
        mut lists: PerTypeMemories,
        _query: &str,
        _context: &MemoryContext,
    ) -> Result<PerTypeMemories, RepositoryError> {
        for memory_type in MemoryType::ALL {
            let list = std::mem::take(lists.get_mut(memory_type));
            *lists.get_mut(memory_type) = dedupe_by_summary(list);
        }
        Ok(lists)
    }

    async fn discovered_patterns(
        &self,
        key: &InstanceKey,
        query: &PatternQuery,
    ) -> Result<Vec<DiscoveredPattern>, RepositoryError> {
        let (max,): (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(occurrences) FROM memory_patterns WHERE agent_id = ? AND user_id = ?",
        )
        .bind(&key.agent_id)
        .bind(&key.user_id)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let Some(max) = max.filter(|m| *m > 0) else {
            return Ok(Vec::new());
        };

        let type_filter = if query.pattern_type.is_some() {
            " AND pattern_type = ?"
        } else {
            ""
        };
        let sql = format!(
            "SELECT pattern_type, pattern_key, occurrences, first_seen, last_seen \
             FROM memory_patterns \
             WHERE agent_id = ? AND user_id = ? AND occurrences >= ?{type_filter} \
             ORDER BY occurrences DESC, last_seen DESC, pattern_key ASC \
             LIMIT ?"
        );

        let mut select = sqlx::query(&sql)
            .bind(&key.agent_id)
            .bind(&key.user_id)
            .bind(i64::try_from(query.min_occurrences).unwrap_or(i64::MAX));
        if let Some(pattern_type) = &query.pattern_type {
            select = select.bind(pattern_type);
        }
        let rows = select
            .bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let occurrences: i64 = row.try_get("occurrences").map_err(query_error)?;
                let first_seen: String = row.try_get("first_seen").map_err(query_error)?;
                let last_seen: String = row.try_get("last_seen").map_err(query_error)?;
                Ok(DiscoveredPattern {
                    agent_id: key.agent_id.clone(),
                    user_id: key.user_id.clone(),
                    pattern_type: row.try_get("pattern_type").map_err(query_error)?,
                    pattern_key: row.try_get("pattern_key").map_err(query_error)?,
                    occurrences: u64::try_from(occurrences).unwrap_or(0),
                    confidence: occurrences as f64 / max as f64,
                    first_seen: parse_datetime(&first_seen)?,
                    last_seen: parse_datetime(&last_seen)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::temp_pool;
    use engram_types::envelope::MemoryEnvelope;
    use engram_types::memory::MemoryRecord;
    use serde_json::json;
    use uuid::Uuid;

    fn stored() -> Vec<StoredMemory> {
        vec![StoredMemory {
            memory_type: MemoryType::Episodic,
            memory_id: Uuid::now_v7(),
        }]
    }

    fn scored(text: &str, score: f64) -> ScoredMemory {
        ScoredMemory {
            record: MemoryRecord {
                id: Uuid::now_v7(),
                memory_type: MemoryType::Semantic,
                agent_id: "1".to_string(),
                user_id: "alice".to_string(),
                session_id: None,
                content: MemoryEnvelope::from_payload(MemoryType::Semantic, json!(text), None),
                metadata: MemoryMetadata::default(),
                created_at: Utc::now(),
                expires_at: None,
                usage_count: 0,
            },
            relevance_score: score,
        }
    }

    #[test]
    fn test_extract_patterns() {
        let metadata = MemoryMetadata {
            content_type: Some(" Fact ".to_string()),
            tags: vec!["Rust".to_string(), "rust".to_string(), " ".to_string()],
            ..Default::default()
        };
        let patterns = extract_patterns(&json!({"text": "Tokio drives async Rust"}), &metadata);
        assert_eq!(
            patterns,
            vec![
                ("keyword", "tokio".to_string()),
                ("keyword", "drives".to_string()),
                ("keyword", "async".to_string()),
                ("keyword", "rust".to_string()),
                ("content_type", "fact".to_string()),
                ("tag", "rust".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_repeated_content_reinforces_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let discovery = SqlitePatternDiscovery::new(pool);
        let key = InstanceKey::new("1", "alice");
        let ctx = MemoryContext::new("1", "alice");
        let metadata = MemoryMetadata {
            content_type: Some("preference".to_string()),
            ..Default::default()
        };

        for text in ["prefers dark mode", "prefers tabs", "prefers dark roast"] {
            discovery
                .analyze_new_memory(&key, &json!(text), &ctx, &metadata, &stored())
                .await
                .unwrap();
        }

        let patterns = discovery
            .discovered_patterns(&key, &PatternQuery::default())
            .await
            .unwrap();
        let found: Vec<(&str, &str, u64)> = patterns
            .iter()
            .map(|p| (p.pattern_type.as_str(), p.pattern_key.as_str(), p.occurrences))
            .collect();
        assert_eq!(
            found,
            vec![
                ("content_type", "preference", 3),
                ("keyword", "prefers", 3),
                ("keyword", "dark", 2),
            ]
        );
        assert_eq!(patterns[0].confidence, 1.0);
        assert!((patterns[2].confidence - 2.0 / 3.0).abs() < 1e-9);

        let keywords_only = discovery
            .discovered_patterns(
                &key,
                &PatternQuery {
                    pattern_type: Some("keyword".to_string()),
                    min_occurrences: 1,
                    limit: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(keywords_only.len(), 2);
        assert!(keywords_only.iter().all(|p| p.pattern_type == "keyword"));
    }

    #[tokio::test]
    async fn test_failed_store_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let discovery = SqlitePatternDiscovery::new(pool);
        let key = InstanceKey::new("1", "alice");

        let count = discovery
            .analyze_new_memory(
                &key,
                &json!("something memorable"),
                &MemoryContext::new("1", "alice"),
                &MemoryMetadata::default(),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(
            discovery
                .discovered_patterns(&key, &PatternQuery { min_occurrences: 1, ..Default::default() })
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_patterns_are_per_instance() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let discovery = SqlitePatternDiscovery::new(pool);
        let alice = InstanceKey::new("1", "alice");

        discovery
            .analyze_new_memory(
                &alice,
                &json!("kubernetes cluster"),
                &MemoryContext::new("1", "alice"),
                &MemoryMetadata::default(),
                &stored(),
            )
            .await
            .unwrap();

        let bob = discovery
            .discovered_patterns(
                &InstanceKey::new("1", "bob"),
                &PatternQuery { min_occurrences: 1, ..Default::default() },
            )
            .await
            .unwrap();
        assert!(bob.is_empty());
    }

    #[tokio::test]
    async fn test_enhancement_collapses_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let discovery = SqlitePatternDiscovery::new(pool);

        let lists = PerTypeMemories {
            semantic: vec![
                scored("Rust is fast", 0.4),
                scored("rust  is FAST", 0.9),
                scored("Go is simple", 0.6),
            ],
            ..Default::default()
        };
        let enhanced = discovery
            .enhance_retrieval(
                &InstanceKey::new("1", "alice"),
                lists,
                "fast",
                &MemoryContext::new("1", "alice"),
            )
            .await
            .unwrap();

        let scores: Vec<f64> = enhanced.semantic.iter().map(|s| s.relevance_score).collect();
        assert_eq!(scores, vec![0.9, 0.6]);
        assert_eq!(enhanced.semantic[0].record.content.summary_text(), "rust  is FAST");
        assert!(enhanced.working.is_empty());
    }
}
