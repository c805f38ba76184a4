//! Pattern discovery port.
//!
//! Pattern discovery observes every successful store in the background and
//! may reorder or deduplicate retrieval candidates before ranking. It is
//! best-effort: errors are logged by the caller and never reach the user.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use engram_types::analysis::{DiscoveredPattern, PatternQuery};
use engram_types::error::RepositoryError;
use engram_types::memory::{
    InstanceKey, MemoryContext, MemoryMetadata, PerTypeMemories, StoredMemory,
};
use serde_json::Value;

/// Background pattern analyzer shared by all instances.
pub trait PatternDiscovery: Send + Sync {
    /// Record patterns found in freshly stored `content`.
    /// Returns how many patterns were created or reinforced.
    fn analyze_new_memory(
        &self,
        key: &InstanceKey,
        content: &Value,
        context: &MemoryContext,
        metadata: &MemoryMetadata,
        results: &[StoredMemory],
    ) -> impl Future<Output = Result<usize, RepositoryError>> + Send;

    /// Optionally reorder or prune the per-type candidate lists of a retrieval.
    fn enhance_retrieval(
        &self,
        key: &InstanceKey,
        lists: PerTypeMemories,
        query: &str,
        context: &MemoryContext,
    ) -> impl Future<Output = Result<PerTypeMemories, RepositoryError>> + Send;

    /// Patterns recorded for `key`, most frequent first.
    fn discovered_patterns(
        &self,
        key: &InstanceKey,
        query: &PatternQuery,
    ) -> impl Future<Output = Result<Vec<DiscoveredPattern>, RepositoryError>> + Send;
}

/// Object-safe version of [`PatternDiscovery`].
pub trait PatternDiscoveryDyn: Send + Sync {
    fn analyze_new_memory_boxed<'a>(
        &'a self,
        key: &'a InstanceKey,
        content: &'a Value,
        context: &'a MemoryContext,
        metadata: &'a MemoryMetadata,
        results: &'a [StoredMemory],
    ) -> Pin<Box<dyn Future<Output = Result<usize, RepositoryError>> + Send + 'a>>;

    fn enhance_retrieval_boxed<'a>(
        &'a self,
        key: &'a InstanceKey,
        lists: PerTypeMemories,
        query: &'a str,
        context: &'a MemoryContext,
    ) -> Pin<Box<dyn Future<Output = Result<PerTypeMemories, RepositoryError>> + Send + 'a>>;

    fn discovered_patterns_boxed<'a>(
        &'a self,
        key: &'a InstanceKey,
        query: &'a PatternQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DiscoveredPattern>, RepositoryError>> + Send + 'a>>;
}

impl<T: PatternDiscovery> PatternDiscoveryDyn for T {
    fn analyze_new_memory_boxed<'a>(
        &'a self,
        key: &'a InstanceKey,
        content: &'a Value,
        context: &'a MemoryContext,
        metadata: &'a MemoryMetadata,
        results: &'a [StoredMemory],
    ) -> Pin<Box<dyn Future<Output = Result<usize, RepositoryError>> + Send + 'a>> {
        Box::pin(self.analyze_new_memory(key, content, context, metadata, results))
    }

    fn enhance_retrieval_boxed<'a>(
        &'a self,
        key: &'a InstanceKey,
        lists: PerTypeMemories,
        query: &'a str,
        context: &'a MemoryContext,
    ) -> Pin<Box<dyn Future<Output = Result<PerTypeMemories, RepositoryError>> + Send + 'a>> {
        Box::pin(self.enhance_retrieval(key, lists, query, context))
    }

    fn discovered_patterns_boxed<'a>(
        &'a self,
        key: &'a InstanceKey,
        query: &'a PatternQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DiscoveredPattern>, RepositoryError>> + Send + 'a>>
    {
        Box::pin(self.discovered_patterns(key, query))
    }
}

/// Type-erased [`PatternDiscovery`].
pub struct BoxPatternDiscovery {
    inner: Box<dyn PatternDiscoveryDyn + Send + Sync>,
}

impl BoxPatternDiscovery {
    pub fn new<T: PatternDiscovery + 'static>(discovery: T) -> Self {
        Self {
            inner: Box::new(discovery),
        }
    }

    pub async fn analyze_new_memory(
        &self,
        key: &InstanceKey,
        content: &Value,
        context: &MemoryContext,
        metadata: &MemoryMetadata,
        results: &[StoredMemory],
    ) -> Result<usize, RepositoryError> {
        self.inner
            .analyze_new_memory_boxed(key, content, context, metadata, results)
            .await
    }

    pub async fn enhance_retrieval(
        &self,
        key: &InstanceKey,
        lists: PerTypeMemories,
        query: &str,
        context: &MemoryContext,
    ) -> Result<PerTypeMemories, RepositoryError> {
        self.inner
            .enhance_retrieval_boxed(key, lists, query, context)
            .await
    }

    pub async fn discovered_patterns(
        &self,
        key: &InstanceKey,
        query: &PatternQuery,
    ) -> Result<Vec<DiscoveredPattern>, RepositoryError> {
        self.inner.discovered_patterns_boxed(key, query).await
    }
}

/// The pattern-discovery handle an instance carries: the shared analyzer
/// bound to the instance's key.
#[derive(Clone)]
pub struct PatternHandle {
    key: InstanceKey,
    discovery: Arc<BoxPatternDiscovery>,
}

impl PatternHandle {
    pub fn new(key: InstanceKey, discovery: Arc<BoxPatternDiscovery>) -> Self {
        Self { key, discovery }
    }

    pub async fn analyze_new_memory(
        &self,
        content: &Value,
        context: &MemoryContext,
        metadata: &MemoryMetadata,
        results: &[StoredMemory],
    ) -> Result<usize, RepositoryError> {
        self.discovery
            .analyze_new_memory(&self.key, content, context, metadata, results)
            .await
    }

    pub async fn enhance_retrieval(
        &self,
        lists: PerTypeMemories,
        query: &str,
        context: &MemoryContext,
    ) -> Result<PerTypeMemories, RepositoryError> {
        self.discovery
            .enhance_retrieval(&self.key, lists, query, context)
            .await
    }
}

impl std::fmt::Debug for PatternHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternHandle")
            .field("key", &self.key)
            .finish()
    }
}
