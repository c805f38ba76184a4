//! A memory instance: the four stores of one (agent, user) pair.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use engram_types::error::MemoryError;
use engram_types::memory::{InstanceKey, MemoryType};

use super::box_store::BoxMemoryStore;
use super::pattern::PatternHandle;
use super::store::IsolationContext;

/// One agent's memory of one user.
///
/// Owns its four stores exclusively; stores are never shared between
/// instances. `last_accessed` is refreshed on every registry hit.
/// Once retired (removed from the registry) the instance accepts no
/// further background work.
#[derive(Debug)]
pub struct MemoryInstance {
    pub key: InstanceKey,
    pub isolation: IsolationContext,
    pub patterns: PatternHandle,
    pub created_at: DateTime<Utc>,
    working: BoxMemoryStore,
    episodic: BoxMemoryStore,
    semantic: BoxMemoryStore,
    procedural: BoxMemoryStore,
    /// Unix millis.
    last_accessed: AtomicI64,
    retired: AtomicBool,
}

impl MemoryInstance {
    /// Assemble an instance. Stores are not initialized yet; see [`Self::initialize`].
    pub fn new(
        isolation: IsolationContext,
        stores: [BoxMemoryStore; 4],
        patterns: PatternHandle,
        now: DateTime<Utc>,
    ) -> Self {
        let [working, episodic, semantic, procedural] = stores;
        Self {
            key: isolation.key.clone(),
            isolation,
            patterns,
            created_at: now,
            working,
            episodic,
            semantic,
            procedural,
            last_accessed: AtomicI64::new(now.timestamp_millis()),
            retired: AtomicBool::new(false),
        }
    }

    /// Initialize all four stores concurrently. The first failure wins.
    pub async fn initialize(&self) -> Result<(), MemoryError> {
        tokio::try_join!(
            initialize_store(&self.working),
            initialize_store(&self.episodic),
            initialize_store(&self.semantic),
            initialize_store(&self.procedural),
        )?;
        Ok(())
    }

    pub fn store(&self, memory_type: MemoryType) -> &BoxMemoryStore {
        match memory_type {
            MemoryType::Working => &self.working,
            MemoryType::Episodic => &self.episodic,
            MemoryType::Semantic => &self.semantic,
            MemoryType::Procedural => &self.procedural,
        }
    }

    pub fn touch(&self, now: DateTime<Utc>) {
        self.last_accessed
            .store(now.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        let millis = self.last_accessed.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(self.created_at)
    }

    /// Mark the instance as removed. Jobs still holding it are skipped.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

async fn initialize_store(store: &BoxMemoryStore) -> Result<(), MemoryError> {
    store
        .initialize()
        .await
        .map_err(|e| MemoryError::Initialization {
            memory_type: store.memory_type(),
            message: e.to_string(),
        })
}
