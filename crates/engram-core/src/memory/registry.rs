//! Instance registry: lazily created memory instances keyed by (agent, user).
//!
//! The registry is an owned value; construct one per service. Creation is
//! single-flight per key: concurrent first accesses queue on a per-key async
//! mutex, one of them initializes the stores, and the rest observe its
//! instance. A failed initialization registers nothing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use engram_types::error::MemoryError;
use engram_types::memory::{InstanceKey, MemoryType};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::instance::MemoryInstance;
use super::pattern::{BoxPatternDiscovery, PatternHandle};
use super::stats::MemoryStats;
use super::store::{IsolationContext, StoreFactory};

pub struct InstanceRegistry {
    instances: DashMap<InstanceKey, Arc<MemoryInstance>>,
    creation_locks: DashMap<InstanceKey, Arc<Mutex<()>>>,
    factory: Arc<dyn StoreFactory>,
    patterns: Arc<BoxPatternDiscovery>,
    stats: Arc<MemoryStats>,
}

impl InstanceRegistry {
    pub fn new(
        factory: Arc<dyn StoreFactory>,
        patterns: Arc<BoxPatternDiscovery>,
        stats: Arc<MemoryStats>,
    ) -> Self {
        Self {
            instances: DashMap::new(),
            creation_locks: DashMap::new(),
            factory,
            patterns,
            stats,
        }
    }

    /// Return the instance for `key`, creating and initializing it on first use.
    pub async fn get_or_create(&self, key: &InstanceKey) -> Result<Arc<MemoryInstance>, MemoryError> {
        let now = Utc::now();
        if let Some(instance) = self.lookup(key, now) {
            self.stats.record_hit();
            return Ok(instance);
        }

        let lock = self
            .creation_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have finished while we waited.
        if let Some(instance) = self.lookup(key, Utc::now()) {
            self.stats.record_hit();
            return Ok(instance);
        }

        self.stats.record_miss();
        let instance = Arc::new(self.build(key.clone()));
        if let Err(e) = instance.initialize().await {
            warn!(instance = %key, error = %e, "memory instance initialization failed");
            return Err(e);
        }

        self.instances.insert(key.clone(), Arc::clone(&instance));
        self.stats.set_instance_count(self.instances.len());
        info!(instance = %key, namespace = %instance.isolation.namespace, "memory instance created");
        Ok(instance)
    }

    fn lookup(&self, key: &InstanceKey, now: DateTime<Utc>) -> Option<Arc<MemoryInstance>> {
        self.instances.get(key).map(|entry| {
            entry.touch(now);
            Arc::clone(entry.value())
        })
    }

    fn build(&self, key: InstanceKey) -> MemoryInstance {
        let isolation = IsolationContext::new(key.clone());
        let stores = MemoryType::ALL.map(|t| self.factory.build(t, &isolation));
        let patterns = PatternHandle::new(key, Arc::clone(&self.patterns));
        MemoryInstance::new(isolation, stores, patterns, Utc::now())
    }

    /// The registered instance for `key`, without creating or touching it.
    pub fn peek(&self, key: &InstanceKey) -> Option<Arc<MemoryInstance>> {
        self.instances.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Drop and retire the instance for `key`. Returns whether one was registered.
    ///
    /// Background jobs already queued against the removed instance are
    /// skipped by the worker.
    pub fn remove(&self, key: &InstanceKey) -> bool {
        let Some((_, instance)) = self.instances.remove(key) else {
            return false;
        };
        instance.retire();
        self.stats.set_instance_count(self.instances.len());
        debug!(instance = %key, "memory instance removed");
        true
    }

    /// Evict every instance not accessed within `max_idle` of `now`.
    ///
    /// Returns the evicted keys. Creation locks nobody is holding or waiting
    /// on are released as well.
    pub fn evict_idle(&self, max_idle: Duration, now: DateTime<Utc>) -> Vec<InstanceKey> {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let mut evicted = Vec::new();

        self.instances.retain(|key, instance| {
            let idle = now - instance.last_accessed();
            if idle > max_idle {
                evicted.push(key.clone());
                false
            } else {
                true
            }
        });

        self.creation_locks.retain(|key, lock| {
            self.instances.contains_key(key) || Arc::strong_count(lock) > 1
        });

        self.stats.set_instance_count(self.instances.len());
        evicted
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
