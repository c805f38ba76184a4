//! BoxMemoryStore -- object-safe dynamic dispatch wrapper for MemoryTypeStore.
//!
//! Same blanket-impl pattern as the other boxed ports in this crate:
//! 1. Define an object-safe `MemoryTypeStoreDyn` trait with boxed futures
//! 2. Blanket-impl `MemoryTypeStoreDyn` for all `T: MemoryTypeStore`
//! 3. `BoxMemoryStore` wraps `Box<dyn MemoryTypeStoreDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use engram_types::envelope::MemoryEnvelope;
use engram_types::error::RepositoryError;
use engram_types::memory::{
    MemoryContext, MemoryMetadata, MemoryRecord, MemoryType, RetrieveOptions, ScoredMemory,
};
use uuid::Uuid;

use super::store::MemoryTypeStore;

/// Object-safe version of [`MemoryTypeStore`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch (`dyn MemoryTypeStoreDyn`).
/// A blanket implementation is provided for all types implementing `MemoryTypeStore`.
pub trait MemoryTypeStoreDyn: Send + Sync {
    fn memory_type(&self) -> MemoryType;

    fn initialize_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>>;

    fn store_boxed<'a>(
        &'a self,
        content: &'a MemoryEnvelope,
        context: &'a MemoryContext,
        metadata: &'a MemoryMetadata,
    ) -> Pin<Box<dyn Future<Output = Result<MemoryRecord, RepositoryError>> + Send + 'a>>;

    fn retrieve_boxed<'a>(
        &'a self,
        query: &'a str,
        context: &'a MemoryContext,
        options: &'a RetrieveOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ScoredMemory>, RepositoryError>> + Send + 'a>>;

    fn get_boxed<'a>(
        &'a self,
        id: &'a Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<MemoryRecord>, RepositoryError>> + Send + 'a>>;
}

/// Blanket implementation: any `MemoryTypeStore` automatically implements `MemoryTypeStoreDyn`.
impl<T: MemoryTypeStore> MemoryTypeStoreDyn for T {
    fn memory_type(&self) -> MemoryType {
        MemoryTypeStore::memory_type(self)
    }

    fn initialize_boxed<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + 'a>> {
        Box::pin(self.initialize())
    }

    fn store_boxed<'a>(
        &'a self,
        content: &'a MemoryEnvelope,
        context: &'a MemoryContext,
        metadata: &'a MemoryMetadata,
    ) -> Pin<Box<dyn Future<Output = Result<MemoryRecord, RepositoryError>> + Send + 'a>> {
        Box::pin(self.store(content, context, metadata))
    }

    fn retrieve_boxed<'a>(
        &'a self,
        query: &'a str,
        context: &'a MemoryContext,
        options: &'a RetrieveOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ScoredMemory>, RepositoryError>> + Send + 'a>>
    {
        Box::pin(self.retrieve(query, context, options))
    }

    fn get_boxed<'a>(
        &'a self,
        id: &'a Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<MemoryRecord>, RepositoryError>> + Send + 'a>>
    {
        Box::pin(self.get(id))
    }
}

/// Type-erased memory store.
///
/// Lets one instance hold four stores of different concrete types. Since
/// `MemoryTypeStore` uses RPITIT it cannot be a trait object directly;
/// `BoxMemoryStore` provides equivalent methods that delegate to the inner
/// `MemoryTypeStoreDyn` trait object.
pub struct BoxMemoryStore {
    inner: Box<dyn MemoryTypeStoreDyn + Send + Sync>,
}

impl BoxMemoryStore {
    /// Wrap a concrete `MemoryTypeStore` in a type-erased box.
    pub fn new<T: MemoryTypeStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    pub fn memory_type(&self) -> MemoryType {
        self.inner.memory_type()
    }

    pub async fn initialize(&self) -> Result<(), RepositoryError> {
        self.inner.initialize_boxed().await
    }

    pub async fn store(
        &self,
        content: &MemoryEnvelope,
        context: &MemoryContext,
        metadata: &MemoryMetadata,
    ) -> Result<MemoryRecord, RepositoryError> {
        self.inner.store_boxed(content, context, metadata).await
    }

    pub async fn retrieve(
        &self,
        query: &str,
        context: &MemoryContext,
        options: &RetrieveOptions,
    ) -> Result<Vec<ScoredMemory>, RepositoryError> {
        self.inner.retrieve_boxed(query, context, options).await
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<MemoryRecord>, RepositoryError> {
        self.inner.get_boxed(id).await
    }
}

impl std::fmt::Debug for BoxMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxMemoryStore")
            .field("memory_type", &self.inner.memory_type())
            .finish()
    }
}
