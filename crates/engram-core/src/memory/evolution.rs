//! Memory evolution: how an instance's stored content changes over time.
//!
//! [`MemoryEvolution`] is the port the background worker calls after every
//! successful store. [`EvolutionTracker`] is the in-process implementation:
//! it fingerprints stored text per instance and emits
//!
//! - `Reinforcement` when a fingerprint is seen again,
//! - `Promotion` when a fingerprint reaches [`PROMOTION_SIGHTINGS`] without the
//!   write reaching semantic memory,
//! - `Consolidation` every [`CONSOLIDATION_EVERY`] stores on an instance.
//!
//! Each instance remembers at most [`SIGHTINGS_CAPACITY`] fingerprints; past
//! that the oldest is forgotten.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use engram_types::analysis::{EvolutionEvent, EvolutionKind, EvolutionStats, HistoryQuery};
use engram_types::envelope::payload_text;
use engram_types::error::RepositoryError;
use engram_types::memory::{InstanceKey, MemoryContext, MemoryMetadata, MemoryType, StoredMemory};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::instance::MemoryInstance;

pub const PROMOTION_SIGHTINGS: u64 = 3;
pub const CONSOLIDATION_EVERY: u64 = 25;
pub const HISTORY_CAPACITY: usize = 200;
pub const SIGHTINGS_CAPACITY: usize = 1_000;

const SUMMARY_MAX_CHARS: usize = 80;

/// Background evaluator of memory evolution.
pub trait MemoryEvolution: Send + Sync {
    fn evaluate(
        &self,
        instance: &MemoryInstance,
        content: &Value,
        context: &MemoryContext,
        metadata: &MemoryMetadata,
        results: &[StoredMemory],
    ) -> impl Future<Output = Result<Vec<EvolutionEvent>, RepositoryError>> + Send;

    fn stats(&self) -> impl Future<Output = Result<EvolutionStats, RepositoryError>> + Send;

    /// Events of one instance, newest first.
    fn history(
        &self,
        key: &InstanceKey,
        query: &HistoryQuery,
    ) -> impl Future<Output = Result<Vec<EvolutionEvent>, RepositoryError>> + Send;

    /// Drop everything known about `key`.
    fn forget(&self, key: &InstanceKey) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Object-safe version of [`MemoryEvolution`].
pub trait MemoryEvolutionDyn: Send + Sync {
    fn evaluate_boxed<'a>(
        &'a self,
        instance: &'a MemoryInstance,
        content: &'a Value,
        context: &'a MemoryContext,
        metadata: &'a MemoryMetadata,
        results: &'a [StoredMemory],
    ) -> BoxFut<'a, Vec<EvolutionEvent>>;

    fn stats_boxed(&self) -> BoxFut<'_, EvolutionStats>;

    fn history_boxed<'a>(
        &'a self,
        key: &'a InstanceKey,
        query: &'a HistoryQuery,
    ) -> BoxFut<'a, Vec<EvolutionEvent>>;

    fn forget_boxed<'a>(&'a self, key: &'a InstanceKey) -> BoxFut<'a, ()>;
}

impl<T: MemoryEvolution> MemoryEvolutionDyn for T {
    fn evaluate_boxed<'a>(
        &'a self,
        instance: &'a MemoryInstance,
        content: &'a Value,
        context: &'a MemoryContext,
        metadata: &'a MemoryMetadata,
        results: &'a [StoredMemory],
    ) -> BoxFut<'a, Vec<EvolutionEvent>> {
        Box::pin(self.evaluate(instance, content, context, metadata, results))
    }

    fn stats_boxed(&self) -> BoxFut<'_, EvolutionStats> {
        Box::pin(self.stats())
    }

    fn history_boxed<'a>(
        &'a self,
        key: &'a InstanceKey,
        query: &'a HistoryQuery,
    ) -> BoxFut<'a, Vec<EvolutionEvent>> {
        Box::pin(self.history(key, query))
    }

    fn forget_boxed<'a>(&'a self, key: &'a InstanceKey) -> BoxFut<'a, ()> {
        Box::pin(self.forget(key))
    }
}

/// Type-erased [`MemoryEvolution`].
pub struct BoxMemoryEvolution {
    inner: Box<dyn MemoryEvolutionDyn + Send + Sync>,
}

impl BoxMemoryEvolution {
    pub fn new<T: MemoryEvolution + 'static>(evolution: T) -> Self {
        Self {
            inner: Box::new(evolution),
        }
    }

    pub async fn evaluate(
        &self,
        instance: &MemoryInstance,
        content: &Value,
        context: &MemoryContext,
        metadata: &MemoryMetadata,
        results: &[StoredMemory],
    ) -> Result<Vec<EvolutionEvent>, RepositoryError> {
        self.inner
            .evaluate_boxed(instance, content, context, metadata, results)
            .await
    }

    pub async fn stats(&self) -> Result<EvolutionStats, RepositoryError> {
        self.inner.stats_boxed().await
    }

    pub async fn history(
        &self,
        key: &InstanceKey,
        query: &HistoryQuery,
    ) -> Result<Vec<EvolutionEvent>, RepositoryError> {
        self.inner.history_boxed(key, query).await
    }

    pub async fn forget(&self, key: &InstanceKey) -> Result<(), RepositoryError> {
        self.inner.forget_boxed(key).await
    }
}

#[derive(Debug, Default)]
struct InstanceEvolution {
    sightings: HashMap<String, u64>,
    /// Fingerprints in first-seen order, oldest at the front.
    first_seen: VecDeque<String>,
    stores: u64,
    /// Newest at the front.
    history: VecDeque<EvolutionEvent>,
}

impl InstanceEvolution {
    /// Count one more sighting of `fingerprint` and return the total.
    fn sight(&mut self, fingerprint: String) -> u64 {
        if let Some(count) = self.sightings.get_mut(&fingerprint) {
            *count += 1;
            return *count;
        }
        if self.sightings.len() >= SIGHTINGS_CAPACITY {
            if let Some(oldest) = self.first_seen.pop_front() {
                self.sightings.remove(&oldest);
            }
        }
        self.first_seen.push_back(fingerprint.clone());
        self.sightings.insert(fingerprint, 1);
        1
    }
}

/// In-memory [`MemoryEvolution`] keyed by instance.
#[derive(Debug, Default)]
pub struct EvolutionTracker {
    instances: DashMap<InstanceKey, InstanceEvolution>,
    evaluations: AtomicU64,
    reinforcements: AtomicU64,
    promotions: AtomicU64,
    consolidations: AtomicU64,
    /// Unix millis, `0` before the first event.
    last_event_at: AtomicI64,
}

impl EvolutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, kind: EvolutionKind) -> &AtomicU64 {
        match kind {
            EvolutionKind::Reinforcement => &self.reinforcements,
            EvolutionKind::Promotion => &self.promotions,
            EvolutionKind::Consolidation => &self.consolidations,
        }
    }

    fn observe(
        &self,
        key: &InstanceKey,
        text: &str,
        reached_semantic: bool,
        now: DateTime<Utc>,
    ) -> Vec<EvolutionEvent> {
        let mut state = self.instances.entry(key.clone()).or_default();
        state.stores += 1;

        let mut kinds = Vec::new();
        let normalized = normalize(text);
        if !normalized.is_empty() {
            let seen = state.sight(fingerprint(&normalized));
            if seen > 1 {
                kinds.push((EvolutionKind::Reinforcement, seen));
            }
            if seen == PROMOTION_SIGHTINGS && !reached_semantic {
                kinds.push((EvolutionKind::Promotion, seen));
            }
        }
        if state.stores % CONSOLIDATION_EVERY == 0 {
            kinds.push((EvolutionKind::Consolidation, state.stores));
        }

        let events: Vec<EvolutionEvent> = kinds
            .into_iter()
            .map(|(kind, occurrences)| EvolutionEvent {
                id: Uuid::now_v7(),
                agent_id: key.agent_id.clone(),
                user_id: key.user_id.clone(),
                kind,
                summary: summarize(kind, &normalized, occurrences),
                occurrences,
                created_at: now,
            })
            .collect();

        for event in &events {
            state.history.push_front(event.clone());
            self.counter(event.kind).fetch_add(1, Ordering::Relaxed);
        }
        state.history.truncate(HISTORY_CAPACITY);
        if !events.is_empty() {
            self.last_event_at
                .store(now.timestamp_millis(), Ordering::Relaxed);
        }
        events
    }
}

impl MemoryEvolution for EvolutionTracker {
    async fn evaluate(
        &self,
        instance: &MemoryInstance,
        content: &Value,
        _context: &MemoryContext,
        _metadata: &MemoryMetadata,
        results: &[StoredMemory],
    ) -> Result<Vec<EvolutionEvent>, RepositoryError> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let reached_semantic = results
            .iter()
            .any(|r| r.memory_type == MemoryType::Semantic);
        Ok(self.observe(
            &instance.key,
            &payload_text(content),
            reached_semantic,
            Utc::now(),
        ))
    }

    async fn stats(&self) -> Result<EvolutionStats, RepositoryError> {
        let reinforcements = self.reinforcements.load(Ordering::Relaxed);
        let promotions = self.promotions.load(Ordering::Relaxed);
        let consolidations = self.consolidations.load(Ordering::Relaxed);
        let last = self.last_event_at.load(Ordering::Relaxed);
        Ok(EvolutionStats {
            total_evaluations: self.evaluations.load(Ordering::Relaxed),
            total_events: reinforcements + promotions + consolidations,
            reinforcements,
            promotions,
            consolidations,
            tracked_instances: self.instances.len(),
            last_event_at: (last > 0)
                .then(|| Utc.timestamp_millis_opt(last).single())
                .flatten(),
        })
    }

    async fn history(
        &self,
        key: &InstanceKey,
        query: &HistoryQuery,
    ) -> Result<Vec<EvolutionEvent>, RepositoryError> {
        Ok(self
            .instances
            .get(key)
            .map(|state| {
                state
                    .history
                    .iter()
                    .filter(|e| query.kind.is_none_or(|k| e.kind == k))
                    .take(query.limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn forget(&self, key: &InstanceKey) -> Result<(), RepositoryError> {
        self.instances.remove(key);
        Ok(())
    }
}

/// Lower-case, whitespace-collapsed form used for fingerprinting.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn fingerprint(normalized: &str) -> String {
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

fn summarize(kind: EvolutionKind, text: &str, occurrences: u64) -> String {
    let excerpt: String = text.chars().take(SUMMARY_MAX_CHARS).collect();
    match kind {
        EvolutionKind::Reinforcement => format!("seen {occurrences} times: {excerpt}"),
        EvolutionKind::Promotion => format!("candidate for semantic memory: {excerpt}"),
        EvolutionKind::Consolidation => format!("{occurrences} memories stored"),
    }
}
