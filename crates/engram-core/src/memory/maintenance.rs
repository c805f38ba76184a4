//! Maintenance port over the relational tables behind the memory stores.
//!
//! Used by the lifecycle sweeps, `clear_memories`, the statistics endpoint and
//! the health check. These operations span every instance, so they go around
//! the per-instance stores and talk to storage directly.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use engram_types::error::RepositoryError;
use engram_types::memory::{InstanceKey, MemoryTableCounts};

/// Cross-instance queries against memory storage.
pub trait MemoryMaintenance: Send + Sync {
    /// Delete every working-memory row whose `expires_at` is before `now`.
    /// Returns the number of rows removed.
    fn purge_expired_working(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, RepositoryError>> + Send;

    /// Delete all rows of one instance from the four memory tables and the
    /// pattern table.
    fn clear_instance(
        &self,
        key: &InstanceKey,
    ) -> impl Future<Output = Result<MemoryTableCounts, RepositoryError>> + Send;

    /// Row counts across all instances.
    fn table_counts(&self) -> impl Future<Output = Result<MemoryTableCounts, RepositoryError>> + Send;

    /// Cheap reachability probe.
    fn ping(&self) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Object-safe version of [`MemoryMaintenance`].
pub trait MemoryMaintenanceDyn: Send + Sync {
    fn purge_expired_working_boxed(&self, now: DateTime<Utc>) -> BoxFut<'_, u64>;
    fn clear_instance_boxed<'a>(&'a self, key: &'a InstanceKey) -> BoxFut<'a, MemoryTableCounts>;
    fn table_counts_boxed(&self) -> BoxFut<'_, MemoryTableCounts>;
    fn ping_boxed(&self) -> BoxFut<'_, ()>;
}

impl<T: MemoryMaintenance> MemoryMaintenanceDyn for T {
    fn purge_expired_working_boxed(&self, now: DateTime<Utc>) -> BoxFut<'_, u64> {
        Box::pin(self.purge_expired_working(now))
    }

    fn clear_instance_boxed<'a>(&'a self, key: &'a InstanceKey) -> BoxFut<'a, MemoryTableCounts> {
        Box::pin(self.clear_instance(key))
    }

    fn table_counts_boxed(&self) -> BoxFut<'_, MemoryTableCounts> {
        Box::pin(self.table_counts())
    }

    fn ping_boxed(&self) -> BoxFut<'_, ()> {
        Box::pin(self.ping())
    }
}

/// Type-erased [`MemoryMaintenance`].
pub struct BoxMemoryMaintenance {
    inner: Box<dyn MemoryMaintenanceDyn + Send + Sync>,
}

impl BoxMemoryMaintenance {
    pub fn new<T: MemoryMaintenance + 'static>(maintenance: T) -> Self {
        Self {
            inner: Box::new(maintenance),
        }
    }

    pub async fn purge_expired_working(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.inner.purge_expired_working_boxed(now).await
    }

    pub async fn clear_instance(
        &self,
        key: &InstanceKey,
    ) -> Result<MemoryTableCounts, RepositoryError> {
        self.inner.clear_instance_boxed(key).await
    }

    pub async fn table_counts(&self) -> Result<MemoryTableCounts, RepositoryError> {
        self.inner.table_counts_boxed().await
    }

    pub async fn ping(&self) -> Result<(), RepositoryError> {
        self.inner.ping_boxed().await
    }
}
