//! MemoryService: the caller-facing surface of the memory system.
//!
//! Resolves the (agent, user) instance, classifies writes, fans store and
//! retrieve calls out to the four memory-type stores, ranks results, and
//! hands successful writes to the background analyzers.
//!
//! The store, retrieve and visual paths never return `Err`: failures are
//! reported as `success: false` with an error message and the elapsed time.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use engram_types::analysis::{DiscoveredPattern, EvolutionEvent, EvolutionStats, HistoryQuery, PatternQuery};
use engram_types::config::MemoryConfig;
use engram_types::envelope::MemoryEnvelope;
use engram_types::error::MemoryError;
use engram_types::memory::{
    ClearMemoriesReport, InstanceKey, MemoryBreakdown, MemoryContext, MemoryMetadata,
    MemoryTableCounts, MemoryType, PerTypeMemories, RankedCandidate, RetrieveMemoryResponse,
    RetrieveOptions, ScoredMemory, StoreMemoryResponse, StoredMemory,
};
use engram_types::stats::{HealthReport, HealthStatus, SystemStats};
use engram_types::visual::{CaptionMode, VisualMemoryRequest, VisualMemoryResponse};
use futures_util::future::join_all;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::background::{BackgroundJob, BackgroundQueue, BackgroundWorker, StoredContent, background_channel};
use super::caption::BoxCaptioner;
use super::classifier::determine_targets;
use super::evolution::BoxMemoryEvolution;
use super::instance::MemoryInstance;
use super::lifecycle::LifecycleManager;
use super::maintenance::BoxMemoryMaintenance;
use super::pattern::BoxPatternDiscovery;
use super::ranker::rank;
use super::registry::InstanceRegistry;
use super::stats::MemoryStats;
use super::store::StoreFactory;
use super::visual;

/// The collaborators a [`MemoryService`] is built from.
pub struct MemoryComponents {
    pub stores: Arc<dyn StoreFactory>,
    pub maintenance: BoxMemoryMaintenance,
    pub patterns: BoxPatternDiscovery,
    pub evolution: BoxMemoryEvolution,
    /// `None` disables captioning; visual memories then use the fallback caption.
    pub captioner: Option<BoxCaptioner>,
}

pub struct MemoryService {
    registry: Arc<InstanceRegistry>,
    maintenance: Arc<BoxMemoryMaintenance>,
    patterns: Arc<BoxPatternDiscovery>,
    evolution: Arc<BoxMemoryEvolution>,
    captioner: Option<BoxCaptioner>,
    stats: Arc<MemoryStats>,
    background: BackgroundQueue,
    lifecycle: LifecycleManager,
    config: MemoryConfig,
}

impl MemoryService {
    /// Build the service without starting the background worker.
    pub fn new(components: MemoryComponents, config: MemoryConfig) -> (Self, BackgroundWorker) {
        let stats = Arc::new(MemoryStats::new());
        let patterns = Arc::new(components.patterns);
        let evolution = Arc::new(components.evolution);
        let maintenance = Arc::new(components.maintenance);
        let registry = Arc::new(InstanceRegistry::new(
            components.stores,
            Arc::clone(&patterns),
            Arc::clone(&stats),
        ));
        let (background, worker) = background_channel(
            config.background_queue_capacity,
            Arc::clone(&evolution),
            Arc::clone(&stats),
        );
        let lifecycle = LifecycleManager::new(
            Arc::clone(&registry),
            Arc::clone(&maintenance),
            Arc::clone(&evolution),
            Arc::clone(&stats),
            config.clone(),
        );

        let service = Self {
            registry,
            maintenance,
            patterns,
            evolution,
            captioner: components.captioner,
            stats,
            background,
            lifecycle,
            config,
        };
        (service, worker)
    }

    /// Build the service and spawn its background worker, which stops when
    /// `shutdown` fires.
    pub fn start(
        components: MemoryComponents,
        config: MemoryConfig,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (service, worker) = Self::new(components, config);
        let handle = tokio::spawn(worker.run(shutdown));
        (service, handle)
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Store
    // -----------------------------------------------------------------------

    /// Classify `content` and write it to every targeted store concurrently.
    ///
    /// All writes settle before this returns. A failed write makes the whole
    /// call report `success: false`; writes that already succeeded are kept.
    #[tracing::instrument(
        name = "store_memory",
        skip_all,
        fields(agent_id = %context.agent_id, user_id = %context.user_id)
    )]
    pub async fn store_memory(
        &self,
        content: Value,
        context: MemoryContext,
        metadata: MemoryMetadata,
    ) -> StoreMemoryResponse {
        let start = Instant::now();
        let targets = determine_targets(&content, &context, &metadata).targets();

        let outcome = self
            .write_targets(&content, &context, &metadata, &targets)
            .await;
        let elapsed = elapsed_ms(start);
        self.stats.record_query(elapsed, Utc::now());

        match outcome {
            Ok((instance, results)) => {
                debug!(targets = ?targets, elapsed_ms = elapsed, "memory stored");
                self.schedule_analysis(
                    instance,
                    StoredContent {
                        content,
                        context,
                        metadata,
                        results: results.clone(),
                    },
                );
                StoreMemoryResponse {
                    success: true,
                    response_time_ms: elapsed,
                    storage_targets: targets,
                    results,
                    error: None,
                }
            }
            Err((e, results)) => StoreMemoryResponse {
                success: false,
                response_time_ms: elapsed,
                storage_targets: targets,
                results,
                error: Some(e.to_string()),
            },
        }
    }

    async fn write_targets(
        &self,
        content: &Value,
        context: &MemoryContext,
        metadata: &MemoryMetadata,
        targets: &[MemoryType],
    ) -> Result<(Arc<MemoryInstance>, Vec<StoredMemory>), (MemoryError, Vec<StoredMemory>)> {
        let instance = self
            .registry
            .get_or_create(&context.key())
            .await
            .map_err(|e| (e, Vec::new()))?;

        let pattern_type = metadata
            .extra
            .get("pattern_type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| metadata.content_type.clone());

        let writes = targets.iter().map(|&memory_type| {
            let envelope =
                MemoryEnvelope::from_payload(memory_type, content.clone(), pattern_type.clone());
            let store = instance.store(memory_type);
            async move {
                let result = store.store(&envelope, context, metadata).await;
                (memory_type, result)
            }
        });

        let mut stored = Vec::with_capacity(targets.len());
        let mut first_error = None;
        for (memory_type, result) in join_all(writes).await {
            match result {
                Ok(record) => stored.push(StoredMemory {
                    memory_type,
                    memory_id: record.id,
                }),
                Err(e) => {
                    warn!(memory_type = %memory_type, error = %e, "memory write failed");
                    first_error.get_or_insert(MemoryError::Store {
                        memory_type,
                        message: e.to_string(),
                    });
                }
            }
        }

        match first_error {
            None => Ok((instance, stored)),
            Some(e) => {
                if !stored.is_empty() {
                    warn!(
                        succeeded = ?stored.iter().map(|s| s.memory_type).collect::<Vec<_>>(),
                        "partial memory write left in place"
                    );
                }
                Err((e, stored))
            }
        }
    }

    fn schedule_analysis(&self, instance: Arc<MemoryInstance>, stored: StoredContent) {
        let stored = Arc::new(stored);
        self.background.submit(BackgroundJob::AnalyzeNewMemory {
            instance: Arc::clone(&instance),
            stored: Arc::clone(&stored),
        });
        self.background
            .submit(BackgroundJob::EvaluateEvolution { instance, stored });
    }

    // -----------------------------------------------------------------------
    // Retrieve
    // -----------------------------------------------------------------------

    /// Query all four stores concurrently, let pattern discovery refine the
    /// candidates, then rank them. A missing `options` or `limit` takes the
    /// configured default limit.
    #[tracing::instrument(
        name = "retrieve_memory",
        skip_all,
        fields(agent_id = %context.agent_id, user_id = %context.user_id)
    )]
    pub async fn retrieve_memory(
        &self,
        query: &str,
        context: &MemoryContext,
        options: Option<RetrieveOptions>,
    ) -> RetrieveMemoryResponse {
        let start = Instant::now();
        let options = options
            .unwrap_or_default()
            .with_default_limit(self.config.default_retrieve_limit);

        let outcome = self.retrieve_ranked(query, context, &options).await;
        let elapsed = elapsed_ms(start);
        self.stats.record_query(elapsed, Utc::now());

        match outcome {
            Ok((memories, breakdown)) => {
                debug!(returned = memories.len(), elapsed_ms = elapsed, "memory retrieved");
                RetrieveMemoryResponse {
                    success: true,
                    response_time_ms: elapsed,
                    memories,
                    breakdown,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "memory retrieval failed");
                RetrieveMemoryResponse {
                    success: false,
                    response_time_ms: elapsed,
                    memories: Vec::new(),
                    breakdown: MemoryBreakdown::default(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn retrieve_ranked(
        &self,
        query: &str,
        context: &MemoryContext,
        options: &RetrieveOptions,
    ) -> Result<(Vec<RankedCandidate>, MemoryBreakdown), MemoryError> {
        let instance = self.registry.get_or_create(&context.key()).await?;

        let (working, episodic, semantic, procedural) = tokio::try_join!(
            retrieve_from(&instance, MemoryType::Working, query, context, options),
            retrieve_from(&instance, MemoryType::Episodic, query, context, options),
            retrieve_from(&instance, MemoryType::Semantic, query, context, options),
            retrieve_from(&instance, MemoryType::Procedural, query, context, options),
        )?;
        let lists = PerTypeMemories {
            working,
            episodic,
            semantic,
            procedural,
        };

        let lists = match instance
            .patterns
            .enhance_retrieval(lists.clone(), query, context)
            .await
        {
            Ok(enhanced) => enhanced,
            Err(e) => {
                warn!(error = %e, "pattern enhancement failed, using store results");
                lists
            }
        };

        let breakdown = lists.breakdown();
        Ok((rank(&lists, context, options.effective_limit(), Utc::now()), breakdown))
    }

    // -----------------------------------------------------------------------
    // Visual
    // -----------------------------------------------------------------------

    /// Caption a screenshot and store it in working or episodic memory.
    ///
    /// Episodic writes are followed by a working-memory back-reference to the
    /// new episode. The returned caption is never empty. Other memory types are
    /// rejected before the captioner is called.
    #[tracing::instrument(
        name = "store_visual_memory",
        skip(self, request),
        fields(descriptive = request.is_descriptive)
    )]
    pub async fn store_visual_memory(
        &self,
        agent_id: &str,
        user_id: &str,
        memory_type: MemoryType,
        request: VisualMemoryRequest,
    ) -> VisualMemoryResponse {
        let start = Instant::now();

        let (caption, caption_fallback, outcome) = match memory_type {
            MemoryType::Working | MemoryType::Episodic => {
                let (caption, fallback) = self.caption_for(&request).await;
                let outcome = self
                    .write_visual(agent_id, user_id, memory_type, &caption, &request)
                    .await;
                (caption, fallback, outcome)
            }
            other => (
                fallback_caption_for(&request),
                true,
                Err(MemoryError::InvalidRequest(format!(
                    "visual memories can only be stored in working or episodic memory, not {other}"
                ))),
            ),
        };
        let elapsed = elapsed_ms(start);
        self.stats.record_query(elapsed, Utc::now());

        match outcome {
            Ok((memory_id, reference_id)) => VisualMemoryResponse {
                success: true,
                memory_type,
                memory_id: Some(memory_id),
                caption,
                caption_fallback,
                reference_id,
                response_time_ms: elapsed,
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "visual memory store failed");
                VisualMemoryResponse {
                    success: false,
                    memory_type,
                    memory_id: None,
                    caption,
                    caption_fallback,
                    reference_id: None,
                    response_time_ms: elapsed,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Caption from the captioner, or the fallback template. The flag is
    /// `true` when the fallback was used.
    async fn caption_for(&self, request: &VisualMemoryRequest) -> (String, bool) {
        let mode = CaptionMode::from_descriptive(request.is_descriptive);
        let query = request.query.as_deref();
        let fallback = || (fallback_caption_for(request), true);

        let Some(captioner) = &self.captioner else {
            return fallback();
        };
        let Some(image) = request
            .image_data
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            debug!("no image data, using fallback caption");
            return fallback();
        };

        let prompt = visual::caption_prompt(mode, query);
        match captioner
            .caption(image, &prompt, visual::max_tokens(mode))
            .await
        {
            Ok(raw) => match visual::normalize_caption(&raw, mode) {
                Some(caption) => (caption, false),
                None => {
                    warn!(provider = captioner.name(), "captioner returned an empty caption");
                    fallback()
                }
            },
            Err(e) => {
                warn!(provider = captioner.name(), error = %e, "captioning failed, using fallback caption");
                fallback()
            }
        }
    }

    async fn write_visual(
        &self,
        agent_id: &str,
        user_id: &str,
        memory_type: MemoryType,
        caption: &str,
        request: &VisualMemoryRequest,
    ) -> Result<(uuid::Uuid, Option<uuid::Uuid>), MemoryError> {
        let mut context = MemoryContext::new(agent_id, user_id);
        context.session_id = request.metadata.session_id.clone();
        let metadata = MemoryMetadata {
            is_immediate: memory_type == MemoryType::Working,
            content_type: Some("visual".to_string()),
            ..Default::default()
        };

        let instance = self.registry.get_or_create(&context.key()).await?;
        let now = Utc::now();
        let envelope = match memory_type {
            MemoryType::Episodic => visual::episodic_envelope(caption, request, now),
            _ => visual::working_envelope(caption, request),
        };

        let record = instance
            .store(memory_type)
            .store(&envelope, &context, &metadata)
            .await
            .map_err(|e| MemoryError::Store {
                memory_type,
                message: e.to_string(),
            })?;

        let mut results = vec![StoredMemory {
            memory_type,
            memory_id: record.id,
        }];
        let mut reference_id = None;
        if memory_type == MemoryType::Episodic {
            let reference = visual::back_reference(record.id, caption, request);
            let reference_meta = MemoryMetadata {
                content_type: Some("episodic_reference".to_string()),
                ..Default::default()
            };
            match instance
                .store(MemoryType::Working)
                .store(&reference, &context, &reference_meta)
                .await
            {
                Ok(r) => {
                    reference_id = Some(r.id);
                    results.push(StoredMemory {
                        memory_type: MemoryType::Working,
                        memory_id: r.id,
                    });
                }
                Err(e) => {
                    warn!(episode = %record.id, error = %e, "working back-reference write failed");
                }
            }
        }

        self.schedule_analysis(
            Arc::clone(&instance),
            StoredContent {
                content: json!({ "caption": caption, "query": request.query }),
                context,
                metadata,
                results,
            },
        );
        Ok((record.id, reference_id))
    }

    // -----------------------------------------------------------------------
    // Analysis, administration, statistics
    // -----------------------------------------------------------------------

    pub async fn get_discovered_patterns(
        &self,
        agent_id: &str,
        user_id: &str,
        query: &PatternQuery,
    ) -> Result<Vec<DiscoveredPattern>, MemoryError> {
        let key = InstanceKey::new(agent_id, user_id);
        Ok(self.patterns.discovered_patterns(&key, query).await?)
    }

    pub async fn get_evolution_stats(&self) -> Result<EvolutionStats, MemoryError> {
        Ok(self.evolution.stats().await?)
    }

    pub async fn get_evolution_history(
        &self,
        agent_id: &str,
        user_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<EvolutionEvent>, MemoryError> {
        let key = InstanceKey::new(agent_id, user_id);
        Ok(self.evolution.history(&key, query).await?)
    }

    /// Evict the instance and delete everything stored for it.
    #[tracing::instrument(name = "clear_memories", skip(self))]
    pub async fn clear_memories(&self, agent_id: &str, user_id: &str) -> ClearMemoriesReport {
        let key = InstanceKey::new(agent_id, user_id);
        self.registry.remove(&key);

        if let Err(e) = self.evolution.forget(&key).await {
            warn!(error = %e, "failed to reset evolution state");
        }

        match self.maintenance.clear_instance(&key).await {
            Ok(deleted) => {
                info!(deleted = deleted.total(), "memories cleared");
                ClearMemoriesReport {
                    success: true,
                    agent_id: key.agent_id,
                    user_id: key.user_id,
                    deleted,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "clearing memories failed");
                ClearMemoriesReport {
                    success: false,
                    agent_id: key.agent_id,
                    user_id: key.user_id,
                    deleted: MemoryTableCounts::default(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Counters plus per-table row counts. Counts are omitted when storage
    /// cannot be queried.
    pub async fn get_system_stats(&self) -> SystemStats {
        let mut stats = self.stats.snapshot();
        match self.maintenance.table_counts().await {
            Ok(counts) => stats.table_counts = Some(counts),
            Err(e) => warn!(error = %e, "table counts unavailable"),
        }
        stats
    }

    pub async fn health_check(&self) -> HealthReport {
        let ping = self.maintenance.ping().await;
        if let Err(e) = &ping {
            warn!(error = %e, "memory storage unreachable");
        }
        HealthReport {
            status: if ping.is_ok() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            database: ping.is_ok(),
            instances: self.registry.len(),
            checked_at: Utc::now(),
            error: ping.err().map(|e| e.to_string()),
        }
    }
}

async fn retrieve_from(
    instance: &MemoryInstance,
    memory_type: MemoryType,
    query: &str,
    context: &MemoryContext,
    options: &RetrieveOptions,
) -> Result<Vec<ScoredMemory>, MemoryError> {
    instance
        .store(memory_type)
        .retrieve(query, context, options)
        .await
        .map_err(|e| MemoryError::Retrieve {
            memory_type,
            message: e.to_string(),
        })
}

fn fallback_caption_for(request: &VisualMemoryRequest) -> String {
    visual::fallback_caption(
        CaptionMode::from_descriptive(request.is_descriptive),
        request.query.as_deref(),
        request.metadata.context.as_deref(),
    )
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
