//! Cross-instance maintenance queries over the memory tables.

use chrono::{DateTime, Utc};
use engram_core::memory::maintenance::MemoryMaintenance;
use engram_types::error::RepositoryError;
use engram_types::memory::{InstanceKey, MemoryTableCounts, MemoryType};

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

/// SQLite-backed implementation of `MemoryMaintenance`.
#[derive(Debug, Clone)]
pub struct SqliteMemoryMaintenance {
    pool: DatabasePool,
}

impl SqliteMemoryMaintenance {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn set_count(counts: &mut MemoryTableCounts, memory_type: MemoryType, n: u64) {
    match memory_type {
        MemoryType::Working => counts.working = n,
        MemoryType::Episodic => counts.episodic = n,
        MemoryType::Semantic => counts.semantic = n,
        MemoryType::Procedural => counts.procedural = n,
    }
}

impl MemoryMaintenance for SqliteMemoryMaintenance {
    async fn purge_expired_working(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM working_memories WHERE expires_at <= ?")
            .bind(format_datetime(&now))
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    async fn clear_instance(&self, key: &InstanceKey) -> Result<MemoryTableCounts, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        let mut deleted = MemoryTableCounts::default();

        for memory_type in MemoryType::ALL {
            let sql = format!(
                "DELETE FROM {} WHERE agent_id = ? AND user_id = ?",
                memory_type.table_name()
            );
            let result = sqlx::query(&sql)
                .bind(&key.agent_id)
                .bind(&key.user_id)
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;
            set_count(&mut deleted, memory_type, result.rows_affected());
        }

        let result = sqlx::query("DELETE FROM memory_patterns WHERE agent_id = ? AND user_id = ?")
            .bind(&key.agent_id)
            .bind(&key.user_id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        deleted.patterns = result.rows_affected();

        tx.commit().await.map_err(query_error)?;
        Ok(deleted)
    }

    async fn table_counts(&self) -> Result<MemoryTableCounts, RepositoryError> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            "SELECT \
               (SELECT COUNT(*) FROM working_memories), \
               (SELECT COUNT(*) FROM episodic_memories), \
               (SELECT COUNT(*) FROM semantic_memories), \
               (SELECT COUNT(*) FROM procedural_memories), \
               (SELECT COUNT(*) FROM memory_patterns)",
        )
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let as_count = |n: i64| u64::try_from(n).unwrap_or(0);
        Ok(MemoryTableCounts {
            working: as_count(row.0),
            episodic: as_count(row.1),
            semantic: as_count(row.2),
            procedural: as_count(row.3),
            patterns: as_count(row.4),
        })
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool.reader)
            .await
            .map(|_| ())
            .map_err(|e| {
                tracing::warn!(error = %e, "database ping failed");
                RepositoryError::Connection
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::memory_store::SqliteMemoryStore;
    use crate::sqlite::temp_pool;
    use engram_core::memory::store::MemoryTypeStore;
    use engram_types::envelope::MemoryEnvelope;
    use engram_types::memory::{MemoryContext, MemoryMetadata};
    use serde_json::json;

    async fn put(pool: &DatabasePool, memory_type: MemoryType, user: &str, metadata: MemoryMetadata) {
        SqliteMemoryStore::new(
            pool.clone(),
            memory_type,
            InstanceKey::new("1", user),
            chrono::Duration::hours(1),
        )
        .store(
            &MemoryEnvelope::from_payload(memory_type, json!("note"), None),
            &MemoryContext::new("1", user),
            &metadata,
        )
        .await
        .unwrap();
    }

    async fn add_pattern(pool: &DatabasePool, user: &str) {
        sqlx::query(
            "INSERT INTO memory_patterns (agent_id, user_id, pattern_type, pattern_key, first_seen, last_seen) \
             VALUES ('1', ?, 'keyword', 'note', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')",
        )
        .bind(user)
        .execute(&pool.writer)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_purge_expired_working_only_removes_expired_rows() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let maintenance = SqliteMemoryMaintenance::new(pool.clone());

        put(
            &pool,
            MemoryType::Working,
            "alice",
            MemoryMetadata {
                expires_at: Some(Utc::now() - chrono::Duration::minutes(5)),
                ..Default::default()
            },
        )
        .await;
        put(&pool, MemoryType::Working, "alice", MemoryMetadata::default()).await;
        put(&pool, MemoryType::Episodic, "alice", MemoryMetadata::default()).await;

        assert_eq!(maintenance.purge_expired_working(Utc::now()).await.unwrap(), 1);
        assert_eq!(maintenance.purge_expired_working(Utc::now()).await.unwrap(), 0);

        let counts = maintenance.table_counts().await.unwrap();
        assert_eq!(counts.working, 1);
        assert_eq!(counts.episodic, 1);
    }

    #[tokio::test]
    async fn test_clear_instance_leaves_other_users() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let maintenance = SqliteMemoryMaintenance::new(pool.clone());

        for memory_type in MemoryType::ALL {
            put(&pool, memory_type, "alice", MemoryMetadata::default()).await;
        }
        put(&pool, MemoryType::Semantic, "alice", MemoryMetadata::default()).await;
        put(&pool, MemoryType::Semantic, "bob", MemoryMetadata::default()).await;
        add_pattern(&pool, "alice").await;
        add_pattern(&pool, "bob").await;

        let deleted = maintenance
            .clear_instance(&InstanceKey::new("1", "alice"))
            .await
            .unwrap();
        assert_eq!(
            deleted,
            MemoryTableCounts {
                working: 1,
                episodic: 1,
                semantic: 2,
                procedural: 1,
                patterns: 1,
            }
        );

        let remaining = maintenance.table_counts().await.unwrap();
        assert_eq!(remaining.total(), 2);
        assert_eq!(remaining.semantic, 1);
        assert_eq!(remaining.patterns, 1);
    }

    #[tokio::test]
    async fn test_ping_and_counts_on_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir).await;
        let maintenance = SqliteMemoryMaintenance::new(pool.clone());

        maintenance.ping().await.unwrap();
        assert_eq!(maintenance.table_counts().await.unwrap().total(), 0);

        pool.close().await;
        assert!(matches!(maintenance.ping().await, Err(RepositoryError::Connection)));
    }
}
