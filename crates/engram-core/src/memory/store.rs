//! MemoryTypeStore trait definition.
//!
//! Every memory type (working, episodic, semantic, procedural) is backed by a
//! store implementing this contract. Stores own their persistence and their
//! relevance scoring; the service only fans calls out to them.

use engram_types::envelope::MemoryEnvelope;
use engram_types::error::RepositoryError;
use engram_types::memory::{
    InstanceKey, MemoryContext, MemoryMetadata, MemoryRecord, MemoryType, RetrieveOptions,
    ScoredMemory,
};
use uuid::Uuid;

use super::box_store::BoxMemoryStore;

/// Trait for one memory-type store scoped to a single instance.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations live in engram-infra.
pub trait MemoryTypeStore: Send + Sync {
    /// Which memory type this store holds.
    fn memory_type(&self) -> MemoryType;

    /// Prepare the store for use. Called once when an instance is created.
    fn initialize(&self) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist `content` and return the created record.
    fn store(
        &self,
        content: &MemoryEnvelope,
        context: &MemoryContext,
        metadata: &MemoryMetadata,
    ) -> impl std::future::Future<Output = Result<MemoryRecord, RepositoryError>> + Send;

    /// Return candidates for `query`, scored by this store's own strategy.
    fn retrieve(
        &self,
        query: &str,
        context: &MemoryContext,
        options: &RetrieveOptions,
    ) -> impl std::future::Future<Output = Result<Vec<ScoredMemory>, RepositoryError>> + Send;

    /// Look up a single record by id. Expired records are not returned.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<MemoryRecord>, RepositoryError>> + Send;
}

/// Scope handed to every store of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationContext {
    pub key: InstanceKey,
    /// Stable namespace string, e.g. `agent:1/user:alice`.
    pub namespace: String,
}

impl IsolationContext {
    pub fn new(key: InstanceKey) -> Self {
        let namespace = format!("agent:{}/user:{}", key.agent_id, key.user_id);
        Self { key, namespace }
    }
}

/// Builds the stores of a new instance.
///
/// Construction is synchronous; any I/O belongs in [`MemoryTypeStore::initialize`].
pub trait StoreFactory: Send + Sync {
    fn build(&self, memory_type: MemoryType, isolation: &IsolationContext) -> BoxMemoryStore;
}
