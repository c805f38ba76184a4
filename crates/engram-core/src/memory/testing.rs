//! In-memory fakes for the memory ports, shared by the unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use engram_types::analysis::{DiscoveredPattern, PatternQuery};
use engram_types::envelope::MemoryEnvelope;
use engram_types::error::{CaptionError, RepositoryError};
use engram_types::memory::{
    InstanceKey, MemoryContext, MemoryMetadata, MemoryRecord, MemoryTableCounts, MemoryType,
    PerTypeMemories, RetrieveOptions, ScoredMemory, StoredMemory,
};
use serde_json::{Value, json};
use uuid::Uuid;

use super::box_store::BoxMemoryStore;
use super::caption::Captioner;
use super::maintenance::MemoryMaintenance;
use super::pattern::PatternDiscovery;
use super::store::{IsolationContext, MemoryTypeStore, StoreFactory};

pub fn record(memory_type: MemoryType, text: &str, created_at: DateTime<Utc>) -> MemoryRecord {
    MemoryRecord {
        id: Uuid::now_v7(),
        memory_type,
        agent_id: "1".to_string(),
        user_id: "u".to_string(),
        session_id: None,
        content: MemoryEnvelope::from_payload(memory_type, json!({ "text": text }), None),
        metadata: MemoryMetadata::default(),
        created_at,
        expires_at: None,
        usage_count: 0,
    }
}

pub fn scored(record: MemoryRecord, relevance_score: f64) -> ScoredMemory {
    ScoredMemory {
        record,
        relevance_score,
    }
}

/// Records of every fake store, shared with [`FakeMaintenance`].
pub type SharedRecords = Arc<Mutex<Vec<MemoryRecord>>>;

/// Factory producing [`InMemoryStore`]s over one shared record list.
#[derive(Default, Clone)]
pub struct InMemoryFactory {
    pub records: SharedRecords,
    pub init_calls: Arc<AtomicUsize>,
    pub fail_init: Arc<Mutex<HashSet<MemoryType>>>,
    pub fail_store: Arc<Mutex<HashSet<MemoryType>>>,
    pub fail_retrieve: Arc<Mutex<HashSet<MemoryType>>>,
    pub init_delay: Option<Duration>,
    pub ttl: Option<Duration>,
}

impl InMemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_init(self, memory_type: MemoryType) -> Self {
        self.fail_init.lock().unwrap().insert(memory_type);
        self
    }

    pub fn failing_store(self, memory_type: MemoryType) -> Self {
        self.fail_store.lock().unwrap().insert(memory_type);
        self
    }

    pub fn failing_retrieve(self, memory_type: MemoryType) -> Self {
        self.fail_retrieve.lock().unwrap().insert(memory_type);
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn records_of(&self, memory_type: MemoryType) -> Vec<MemoryRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.memory_type == memory_type)
            .cloned()
            .collect()
    }
}

impl StoreFactory for InMemoryFactory {
    fn build(&self, memory_type: MemoryType, isolation: &IsolationContext) -> BoxMemoryStore {
        BoxMemoryStore::new(InMemoryStore {
            memory_type,
            key: isolation.key.clone(),
            factory: self.clone(),
        })
    }
}

pub struct InMemoryStore {
    memory_type: MemoryType,
    key: InstanceKey,
    factory: InMemoryFactory,
}

impl InMemoryStore {
    fn fails(set: &Mutex<HashSet<MemoryType>>, memory_type: MemoryType) -> bool {
        set.lock().unwrap().contains(&memory_type)
    }
}

impl MemoryTypeStore for InMemoryStore {
    fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    async fn initialize(&self) -> Result<(), RepositoryError> {
        self.factory.init_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.factory.init_delay {
            tokio::time::sleep(delay).await;
        }
        if Self::fails(&self.factory.fail_init, self.memory_type) {
            return Err(RepositoryError::Connection);
        }
        Ok(())
    }

    async fn store(
        &self,
        content: &MemoryEnvelope,
        context: &MemoryContext,
        metadata: &MemoryMetadata,
    ) -> Result<MemoryRecord, RepositoryError> {
        if Self::fails(&self.factory.fail_store, self.memory_type) {
            return Err(RepositoryError::Query(format!(
                "{} table is read-only",
                self.memory_type
            )));
        }
        let now = Utc::now();
        let expires_at = match self.memory_type {
            MemoryType::Working => metadata.expires_at.or_else(|| {
                self.factory
                    .ttl
                    .map(|ttl| now + chrono::Duration::from_std(ttl).unwrap())
            }),
            _ => None,
        };
        let record = MemoryRecord {
            id: Uuid::now_v7(),
            memory_type: self.memory_type,
            agent_id: self.key.agent_id.clone(),
            user_id: self.key.user_id.clone(),
            session_id: context.session_id.clone(),
            content: content.clone(),
            metadata: metadata.clone(),
            created_at: now,
            expires_at,
            usage_count: 0,
        };
        self.factory.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn retrieve(
        &self,
        query: &str,
        _context: &MemoryContext,
        options: &RetrieveOptions,
    ) -> Result<Vec<ScoredMemory>, RepositoryError> {
        if Self::fails(&self.factory.fail_retrieve, self.memory_type) {
            return Err(RepositoryError::Query("retrieve failed".to_string()));
        }
        let now = Utc::now();
        let needle = query.to_lowercase();
        let records = self.factory.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| {
                r.memory_type == self.memory_type
                    && r.agent_id == self.key.agent_id
                    && r.user_id == self.key.user_id
                    && r.expires_at.is_none_or(|at| at > now)
            })
            .map(|r| {
                let score = if r.content.summary_text().to_lowercase().contains(&needle) {
                    1.0
                } else {
                    0.5
                };
                scored(r.clone(), score)
            })
            .filter(|s| s.relevance_score >= options.min_relevance)
            .take(options.effective_limit())
            .collect())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<MemoryRecord>, RepositoryError> {
        let now = Utc::now();
        Ok(self
            .factory
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.id == id && r.expires_at.is_none_or(|at| at > now))
            .cloned())
    }
}

/// Maintenance over the same records an [`InMemoryFactory`] writes.
#[derive(Default, Clone)]
pub struct FakeMaintenance {
    pub records: SharedRecords,
    pub unreachable: Arc<AtomicBool>,
    pub purge_calls: Arc<AtomicUsize>,
}

impl FakeMaintenance {
    pub fn over(factory: &InMemoryFactory) -> Self {
        Self {
            records: Arc::clone(&factory.records),
            ..Default::default()
        }
    }

    fn check(&self) -> Result<(), RepositoryError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(RepositoryError::Connection)
        } else {
            Ok(())
        }
    }

    fn count(records: &[MemoryRecord]) -> MemoryTableCounts {
        let mut counts = MemoryTableCounts::default();
        for r in records {
            match r.memory_type {
                MemoryType::Working => counts.working += 1,
                MemoryType::Episodic => counts.episodic += 1,
                MemoryType::Semantic => counts.semantic += 1,
                MemoryType::Procedural => counts.procedural += 1,
            }
        }
        counts
    }
}

impl MemoryMaintenance for FakeMaintenance {
    async fn purge_expired_working(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.purge_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| {
            !(r.memory_type == MemoryType::Working && r.expires_at.is_some_and(|at| at < now))
        });
        Ok((before - records.len()) as u64)
    }

    async fn clear_instance(&self, key: &InstanceKey) -> Result<MemoryTableCounts, RepositoryError> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        let (removed, kept): (Vec<_>, Vec<_>) = records
            .drain(..)
            .partition(|r| r.agent_id == key.agent_id && r.user_id == key.user_id);
        *records = kept;
        Ok(Self::count(&removed))
    }

    async fn table_counts(&self) -> Result<MemoryTableCounts, RepositoryError> {
        self.check()?;
        Ok(Self::count(&self.records.lock().unwrap()))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check()
    }
}

/// Pattern discovery that records calls and leaves retrievals untouched.
#[derive(Default, Clone)]
pub struct RecordingPatterns {
    pub analyzed: Arc<Mutex<Vec<(InstanceKey, Vec<StoredMemory>)>>>,
    pub fail_enhance: bool,
    pub fail_analyze: bool,
}

impl PatternDiscovery for RecordingPatterns {
    async fn analyze_new_memory(
        &self,
        key: &InstanceKey,
        _content: &Value,
        _context: &MemoryContext,
        _metadata: &MemoryMetadata,
        results: &[StoredMemory],
    ) -> Result<usize, RepositoryError> {
        if self.fail_analyze {
            return Err(RepositoryError::Query("analysis failed".to_string()));
        }
        self.analyzed
            .lock()
            .unwrap()
            .push((key.clone(), results.to_vec()));
        Ok(1)
    }

    async fn enhance_retrieval(
        &self,
        _key: &InstanceKey,
        lists: PerTypeMemories,
        _query: &str,
        _context: &MemoryContext,
    ) -> Result<PerTypeMemories, RepositoryError> {
        if self.fail_enhance {
            return Err(RepositoryError::Query("enhance failed".to_string()));
        }
        Ok(lists)
    }

    async fn discovered_patterns(
        &self,
        key: &InstanceKey,
        _query: &PatternQuery,
    ) -> Result<Vec<DiscoveredPattern>, RepositoryError> {
        let now = Utc::now();
        let count = self
            .analyzed
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .count() as u64;
        Ok(vec![DiscoveredPattern {
            agent_id: key.agent_id.clone(),
            user_id: key.user_id.clone(),
            pattern_type: "keyword".to_string(),
            pattern_key: "analyzed".to_string(),
            occurrences: count,
            confidence: 1.0,
            first_seen: now,
            last_seen: now,
        }])
    }
}

pub struct FixedCaptioner(pub String);

impl Captioner for FixedCaptioner {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn caption(
        &self,
        _image_base64: &str,
        _prompt: &str,
        _max_tokens: u32,
    ) -> Result<String, CaptionError> {
        Ok(self.0.clone())
    }
}

pub struct FailingCaptioner;

impl Captioner for FailingCaptioner {
    fn name(&self) -> &str {
        "failing"
    }

    async fn caption(
        &self,
        _image_base64: &str,
        _prompt: &str,
        _max_tokens: u32,
    ) -> Result<String, CaptionError> {
        Err(CaptionError::Provider("503 Service Unavailable".to_string()))
    }
}

/// Counts calls and returns a fixed caption.
#[derive(Clone, Default)]
pub struct CountingCaptioner {
    pub calls: Arc<AtomicUsize>,
}

impl Captioner for CountingCaptioner {
    fn name(&self) -> &str {
        "counting"
    }

    async fn caption(
        &self,
        _image_base64: &str,
        _prompt: &str,
        _max_tokens: u32,
    ) -> Result<String, CaptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("Terminal showing a stack trace".to_string())
    }
}
