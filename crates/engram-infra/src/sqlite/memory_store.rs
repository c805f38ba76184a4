//! SQLite memory-type stores.
//!
//! One [`SqliteMemoryStore`] per memory type and instance, each bound to its
//! own table. Envelopes are stored as JSON next to their summary text, which
//! is what relevance is scored against. Reads go to the reader pool; every
//! write, including the procedural usage counter, goes through the writer.

use chrono::{DateTime, Utc};
use engram_core::memory::box_store::BoxMemoryStore;
use engram_core::memory::store::{IsolationContext, MemoryTypeStore, StoreFactory};
use engram_types::envelope::MemoryEnvelope;
use engram_types::error::RepositoryError;
use engram_types::memory::{
    InstanceKey, MemoryContext, MemoryMetadata, MemoryRecord, MemoryType, RetrieveOptions,
    ScoredMemory,
};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::terms::{overlap_score, query_terms};
use super::{format_datetime, parse_datetime, query_error};

/// Most recent rows considered per retrieval before scoring.
const CANDIDATE_WINDOW: i64 = 500;

/// Builds the four SQLite stores of an instance.
#[derive(Debug, Clone)]
pub struct SqliteStoreFactory {
    pool: DatabasePool,
    working_ttl: chrono::Duration,
}

impl SqliteStoreFactory {
    pub fn new(pool: DatabasePool, working_ttl: std::time::Duration) -> Self {
        Self {
            pool,
            working_ttl: chrono::Duration::from_std(working_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
        }
    }
}

impl StoreFactory for SqliteStoreFactory {
    fn build(&self, memory_type: MemoryType, isolation: &IsolationContext) -> BoxMemoryStore {
        BoxMemoryStore::new(SqliteMemoryStore {
            pool: self.pool.clone(),
            memory_type,
            key: isolation.key.clone(),
            working_ttl: self.working_ttl,
        })
    }
}

/// Store for one memory type of one instance.
#[derive(Debug)]
pub struct SqliteMemoryStore {
    pool: DatabasePool,
    memory_type: MemoryType,
    key: InstanceKey,
    working_ttl: chrono::Duration,
}

impl SqliteMemoryStore {
    pub fn new(
        pool: DatabasePool,
        memory_type: MemoryType,
        key: InstanceKey,
        working_ttl: chrono::Duration,
    ) -> Self {
        Self {
            pool,
            memory_type,
            key,
            working_ttl,
        }
    }

    fn table(&self) -> &'static str {
        self.memory_type.table_name()
    }

    /// Column list; types without an expiry or usage counter select constants.
    fn columns(&self) -> &'static str {
        match self.memory_type {
            MemoryType::Working => {
                "id, agent_id, user_id, session_id, content, summary, metadata, created_at, \
                 expires_at, 0 AS usage_count"
            }
            MemoryType::Procedural => {
                "id, agent_id, user_id, session_id, content, summary, metadata, created_at, \
                 NULL AS expires_at, usage_count"
            }
            MemoryType::Episodic | MemoryType::Semantic => {
                "id, agent_id, user_id, session_id, content, summary, metadata, created_at, \
                 NULL AS expires_at, 0 AS usage_count"
            }
        }
    }

    /// Extra predicate hiding rows that must never be returned.
    fn live_filter(&self) -> &'static str {
        match self.memory_type {
            MemoryType::Working => " AND expires_at > ?",
            _ => "",
        }
    }

    async fn bump_usage(&self, results: &mut [ScoredMemory]) -> Result<(), RepositoryError> {
        if results.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        for scored in results.iter() {
            sqlx::query("UPDATE procedural_memories SET usage_count = usage_count + 1 WHERE id = ?")
                .bind(scored.record.id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;
        }
        tx.commit().await.map_err(query_error)?;

        for scored in results.iter_mut() {
            scored.record.usage_count = scored.record.usage_count.saturating_add(1);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct MemoryRow {
    id: String,
    agent_id: String,
    user_id: String,
    session_id: Option<String>,
    content: String,
    summary: String,
    metadata: String,
    created_at: String,
    expires_at: Option<String>,
    usage_count: i64,
}

impl MemoryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            user_id: row.try_get("user_id")?,
            session_id: row.try_get("session_id")?,
            content: row.try_get("content")?,
            summary: row.try_get("summary")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            usage_count: row.try_get("usage_count")?,
        })
    }

    fn into_record(self, memory_type: MemoryType) -> Result<MemoryRecord, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid memory id: {e}")))?;
        let content: MemoryEnvelope = serde_json::from_str(&self.content)
            .map_err(|e| RepositoryError::Query(format!("invalid memory content: {e}")))?;
        let metadata: MemoryMetadata = serde_json::from_str(&self.metadata)
            .map_err(|e| RepositoryError::Query(format!("invalid memory metadata: {e}")))?;
        let created_at = parse_datetime(&self.created_at)?;
        let expires_at = self
            .expires_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?;

        Ok(MemoryRecord {
            id,
            memory_type,
            agent_id: self.agent_id,
            user_id: self.user_id,
            session_id: self.session_id,
            content,
            metadata,
            created_at,
            expires_at,
            usage_count: u32::try_from(self.usage_count.max(0)).unwrap_or(u32::MAX),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryTypeStore implementation
// ---------------------------------------------------------------------------

impl MemoryTypeStore for SqliteMemoryStore {
    fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    async fn initialize(&self) -> Result<(), RepositoryError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE agent_id = ? AND user_id = ?",
            self.table()
        );
        let (rows,): (i64,) = sqlx::query_as(&sql)
            .bind(&self.key.agent_id)
            .bind(&self.key.user_id)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => RepositoryError::Connection,
                other => query_error(other),
            })?;

        tracing::debug!(
            instance = %self.key,
            memory_type = %self.memory_type,
            rows,
            "memory store ready"
        );
        Ok(())
    }

    async fn store(
        &self,
        content: &MemoryEnvelope,
        context: &MemoryContext,
        metadata: &MemoryMetadata,
    ) -> Result<MemoryRecord, RepositoryError> {
        if content.memory_type() != self.memory_type {
            return Err(RepositoryError::Conflict(format!(
                "{} content sent to the {} store",
                content.memory_type(),
                self.memory_type
            )));
        }

        let now = Utc::now();
        let id = Uuid::now_v7();
        let expires_at: Option<DateTime<Utc>> = match self.memory_type {
            MemoryType::Working => Some(metadata.expires_at.unwrap_or(now + self.working_ttl)),
            _ => None,
        };
        let pattern_type = match content {
            MemoryEnvelope::Procedural(p) => p.pattern_type.clone(),
            _ => None,
        };

        let content_json = serde_json::to_string(content)
            .map_err(|e| RepositoryError::Query(format!("failed to encode content: {e}")))?;
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| RepositoryError::Query(format!("failed to encode metadata: {e}")))?;

        let sql = match self.memory_type {
            MemoryType::Working => format!(
                "INSERT INTO {} (id, agent_id, user_id, session_id, content, summary, metadata, created_at, expires_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                self.table()
            ),
            MemoryType::Procedural => format!(
                "INSERT INTO {} (id, agent_id, user_id, session_id, content, summary, metadata, created_at, pattern_type) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                self.table()
            ),
            MemoryType::Episodic | MemoryType::Semantic => format!(
                "INSERT INTO {} (id, agent_id, user_id, session_id, content, summary, metadata, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                self.table()
            ),
        };

        let mut query = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(&self.key.agent_id)
            .bind(&self.key.user_id)
            .bind(&context.session_id)
            .bind(content_json)
            .bind(content.summary_text())
            .bind(metadata_json)
            .bind(format_datetime(&now));
        match self.memory_type {
            MemoryType::Working => query = query.bind(expires_at.as_ref().map(format_datetime)),
            MemoryType::Procedural => query = query.bind(pattern_type),
            MemoryType::Episodic | MemoryType::Semantic => {}
        }
        query
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(MemoryRecord {
            id,
            memory_type: self.memory_type,
            agent_id: self.key.agent_id.clone(),
            user_id: self.key.user_id.clone(),
            session_id: context.session_id.clone(),
            content: content.clone(),
            metadata: metadata.clone(),
            created_at: now,
            expires_at,
            usage_count: 0,
        })
    }

    async fn retrieve(
        &self,
        query: &str,
        context: &MemoryContext,
        options: &RetrieveOptions,
    ) -> Result<Vec<ScoredMemory>, RepositoryError> {
        let limit = options.effective_limit();
        if limit == 0 {
            return Ok(Vec::new());
        }

        let session_first = self.memory_type == MemoryType::Episodic && context.session_id.is_some();
        let order = if session_first {
            "ORDER BY CASE WHEN session_id = ? THEN 0 ELSE 1 END, created_at DESC, id DESC"
        } else {
            "ORDER BY created_at DESC, id DESC"
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE agent_id = ? AND user_id = ?{} {} LIMIT ?",
            self.columns(),
            self.table(),
            self.live_filter(),
            order
        );

        let mut select = sqlx::query(&sql)
            .bind(&self.key.agent_id)
            .bind(&self.key.user_id);
        if self.memory_type == MemoryType::Working {
            select = select.bind(format_datetime(&Utc::now()));
        }
        if session_first {
            select = select.bind(&context.session_id);
        }
        let rows = select
            .bind(CANDIDATE_WINDOW)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let terms = query_terms(query);
        let mut results = Vec::new();
        for row in &rows {
            let row = MemoryRow::from_row(row).map_err(query_error)?;
            let score = overlap_score(&terms, query, &row.summary);
            if (!terms.is_empty() && score <= 0.0) || score < options.min_relevance {
                continue;
            }
            results.push(ScoredMemory {
                record: row.into_record(self.memory_type)?,
                relevance_score: score,
            });
        }

        // Stable: equal scores keep recency (and session) order.
        results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        results.truncate(limit);

        if self.memory_type == MemoryType::Procedural {
            self.bump_usage(&mut results).await?;
        }

        tracing::debug!(
            instance = %self.key,
            memory_type = %self.memory_type,
            candidates = rows.len(),
            returned = results.len(),
            "memory store retrieval"
        );
        Ok(results)
    }

    async fn get(&self, id: &Uuid) -> Result<Option<MemoryRecord>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ? AND agent_id = ? AND user_id = ?{}",
            self.columns(),
            self.table(),
            self.live_filter()
        );
        let mut select = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(&self.key.agent_id)
            .bind(&self.key.user_id);
        if self.memory_type == MemoryType::Working {
            select = select.bind(format_datetime(&Utc::now()));
        }

        let row = select
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let row = MemoryRow::from_row(&row).map_err(query_error)?;
                Ok(Some(row.into_record(self.memory_type)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::temp_pool;
    use serde_json::json;

    fn store_for(pool: &DatabasePool, memory_type: MemoryType, user: &str) -> SqliteMemoryStore {
        SqliteMemoryStore::new(
            pool.clone(),
            memory_type,
            InstanceKey::new("1", user),
            chrono::Duration::hours(1),
        )
    }

    fn envelope(memory_type: MemoryType, text: &str) -> MemoryEnvelope {
        MemoryEnvelope::from_payload(memory_type, json!({ "text": text }), None)
    }

    fn ctx() -> MemoryContext {
        MemoryContext::new("1", "alice")
    }

    #[tokio::test]
    async fn test_store_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let store = store_for(&pool, MemoryType::Semantic, "alice");
        store.initialize().await.unwrap();

        let metadata = MemoryMetadata {
            importance: Some(0.9),
            tags: vec!["rust".to_string()],
            ..Default::default()
        };
        let created = store
            .store(&envelope(MemoryType::Semantic, "Rust has ownership"), &ctx(), &metadata)
            .await
            .unwrap();

        let loaded = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.memory_type, MemoryType::Semantic);
        assert_eq!(loaded.content, created.content);
        assert_eq!(loaded.metadata.importance, Some(0.9));
        assert_eq!(loaded.metadata.tags, vec!["rust"]);
        assert!(loaded.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_store_rejects_envelope_of_other_type() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let store = store_for(&pool, MemoryType::Semantic, "alice");

        let result = store
            .store(&envelope(MemoryType::Working, "wrong"), &ctx(), &MemoryMetadata::default())
            .await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let alice = store_for(&pool, MemoryType::Episodic, "alice");
        let bob = store_for(&pool, MemoryType::Episodic, "bob");

        let record = alice
            .store(&envelope(MemoryType::Episodic, "alice likes tea"), &ctx(), &MemoryMetadata::default())
            .await
            .unwrap();

        let found = bob
            .retrieve("tea", &MemoryContext::new("1", "bob"), &RetrieveOptions::default())
            .await
            .unwrap();
        assert!(found.is_empty());
        assert!(bob.get(&record.id).await.unwrap().is_none());
        assert_eq!(
            alice
                .retrieve("tea", &ctx(), &RetrieveOptions::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_retrieve_scores_by_term_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let store = store_for(&pool, MemoryType::Semantic, "alice");
        for text in ["tokio runtime internals", "rust tokio axum stack", "gardening tips"] {
            store
                .store(&envelope(MemoryType::Semantic, text), &ctx(), &MemoryMetadata::default())
                .await
                .unwrap();
        }

        let results = store
            .retrieve("rust tokio", &ctx(), &RetrieveOptions::default())
            .await
            .unwrap();

        let texts: Vec<String> = results.iter().map(|r| r.record.content.summary_text()).collect();
        assert_eq!(texts, vec!["rust tokio axum stack", "tokio runtime internals"]);
        assert_eq!(results[0].relevance_score, 1.0);
        assert_eq!(results[1].relevance_score, 0.5);
    }

    #[tokio::test]
    async fn test_retrieve_honours_limit_and_min_relevance() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let store = store_for(&pool, MemoryType::Semantic, "alice");
        for text in ["alpha beta", "alpha", "alpha gamma", "beta"] {
            store
                .store(&envelope(MemoryType::Semantic, text), &ctx(), &MemoryMetadata::default())
                .await
                .unwrap();
        }

        let limited = store
            .retrieve("alpha", &ctx(), &RetrieveOptions { limit: Some(2), min_relevance: 0.0 })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);

        let strict = store
            .retrieve("alpha beta", &ctx(), &RetrieveOptions { limit: Some(10), min_relevance: 0.9 })
            .await
            .unwrap();
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].record.content.summary_text(), "alpha beta");

        let none = store
            .retrieve("alpha", &ctx(), &RetrieveOptions { limit: Some(0), min_relevance: 0.0 })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_working_memory_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let store = store_for(&pool, MemoryType::Working, "alice");

        let expired = store
            .store(
                &envelope(MemoryType::Working, "old context"),
                &ctx(),
                &MemoryMetadata {
                    expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let live = store
            .store(&envelope(MemoryType::Working, "new context"), &ctx(), &MemoryMetadata::default())
            .await
            .unwrap();

        let ttl_expiry = live.expires_at.unwrap();
        assert!(ttl_expiry > Utc::now() + chrono::Duration::minutes(59));

        assert!(store.get(&expired.id).await.unwrap().is_none());
        assert!(store.get(&live.id).await.unwrap().is_some());

        let results = store
            .retrieve("context", &ctx(), &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, live.id);
    }

    #[tokio::test]
    async fn test_episodic_prefers_current_session_on_ties() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let store = store_for(&pool, MemoryType::Episodic, "alice");

        let in_session = store
            .store(
                &envelope(MemoryType::Episodic, "deploy failed"),
                &ctx().with_session("s1"),
                &MemoryMetadata::default(),
            )
            .await
            .unwrap();
        // Newer, but from another session.
        store
            .store(
                &envelope(MemoryType::Episodic, "deploy succeeded"),
                &ctx().with_session("s2"),
                &MemoryMetadata::default(),
            )
            .await
            .unwrap();

        let results = store
            .retrieve("deploy", &ctx().with_session("s1"), &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record.id, in_session.id);

        let without_session = store
            .retrieve("deploy", &ctx(), &RetrieveOptions::default())
            .await
            .unwrap();
        assert_ne!(without_session[0].record.id, in_session.id);
    }

    #[tokio::test]
    async fn test_procedural_retrieval_counts_usage() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let store = store_for(&pool, MemoryType::Procedural, "alice");

        let content = MemoryEnvelope::from_payload(
            MemoryType::Procedural,
            json!("run cargo fmt before commit"),
            Some("workflow".to_string()),
        );
        let record = store
            .store(&content, &ctx(), &MemoryMetadata::default())
            .await
            .unwrap();
        assert_eq!(record.usage_count, 0);

        let first = store
            .retrieve("cargo fmt", &ctx(), &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(first[0].record.usage_count, 1);
        store
            .retrieve("cargo", &ctx(), &RetrieveOptions::default())
            .await
            .unwrap();

        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.usage_count, 2);

        let (pattern_type,): (Option<String>,) =
            sqlx::query_as("SELECT pattern_type FROM procedural_memories WHERE id = ?")
                .bind(record.id.to_string())
                .fetch_one(&pool.reader)
                .await
                .unwrap();
        assert_eq!(pattern_type.as_deref(), Some("workflow"));
    }

    #[tokio::test]
    async fn test_factory_builds_store_per_type() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let factory = SqliteStoreFactory::new(pool, std::time::Duration::from_secs(60));
        let isolation = IsolationContext::new(InstanceKey::new("default", "alice"));

        for memory_type in MemoryType::ALL {
            let store = factory.build(memory_type, &isolation);
            assert_eq!(store.memory_type(), memory_type);
            store.initialize().await.unwrap();
        }
    }
}
