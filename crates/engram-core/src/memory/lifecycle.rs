//! Periodic memory maintenance: working-memory TTL sweep, idle instance
//! eviction and the statistics snapshot.
//!
//! Each routine runs on its own fixed interval. The first tick is skipped so
//! nothing runs at start-up. A failing sweep is logged and retried on the
//! next tick; it never stops the loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use engram_types::config::MemoryConfig;
use engram_types::error::RepositoryError;
use engram_types::memory::InstanceKey;
use engram_types::stats::SystemStats;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::evolution::BoxMemoryEvolution;
use super::maintenance::BoxMemoryMaintenance;
use super::registry::InstanceRegistry;
use super::stats::MemoryStats;

#[derive(Clone)]
pub struct LifecycleManager {
    registry: Arc<InstanceRegistry>,
    maintenance: Arc<BoxMemoryMaintenance>,
    evolution: Arc<BoxMemoryEvolution>,
    stats: Arc<MemoryStats>,
    config: MemoryConfig,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        maintenance: Arc<BoxMemoryMaintenance>,
        evolution: Arc<BoxMemoryEvolution>,
        stats: Arc<MemoryStats>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            registry,
            maintenance,
            evolution,
            stats,
            config,
        }
    }

    /// Spawn the three periodic routines. They stop when `shutdown` fires.
    pub fn start(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let sweep = self.clone();
        let evict = self.clone();
        let report = self.clone();

        vec![
            spawn_periodic(
                "working_ttl_sweep",
                self.config.working_sweep_interval(),
                shutdown.clone(),
                move || {
                    let sweep = sweep.clone();
                    async move {
                        if let Err(e) = sweep.sweep_expired_working().await {
                            error!(error = %e, "working memory TTL sweep failed");
                        }
                    }
                },
            ),
            spawn_periodic(
                "instance_eviction",
                self.config.eviction_interval(),
                shutdown.clone(),
                move || {
                    let evict = evict.clone();
                    async move {
                        evict.evict_idle_instances().await;
                    }
                },
            ),
            spawn_periodic(
                "stats_snapshot",
                self.config.stats_interval(),
                shutdown,
                move || {
                    let report = report.clone();
                    async move {
                        report.emit_stats_snapshot();
                    }
                },
            ),
        ]
    }

    /// Delete every expired working-memory row now.
    pub async fn sweep_expired_working(&self) -> Result<u64, RepositoryError> {
        let removed = self.maintenance.purge_expired_working(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "expired working memories deleted");
        } else {
            debug!("no expired working memories");
        }
        Ok(removed)
    }

    /// Evict instances idle longer than the configured window, along with
    /// their evolution state. Stored memories are kept.
    pub async fn evict_idle_instances(&self) -> Vec<InstanceKey> {
        let evicted = self
            .registry
            .evict_idle(self.config.instance_idle_timeout(), Utc::now());
        for key in &evicted {
            if let Err(e) = self.evolution.forget(key).await {
                warn!(instance = %key, error = %e, "failed to drop evolution state");
            }
        }
        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                remaining = self.registry.len(),
                "idle memory instances evicted"
            );
        }
        evicted
    }

    /// Log an aggregate statistics snapshot and return it.
    pub fn emit_stats_snapshot(&self) -> SystemStats {
        let snapshot = self.stats.snapshot();
        info!(
            total_queries = snapshot.total_queries,
            avg_response_time_ms = snapshot.avg_response_time_ms,
            instance_count = snapshot.instance_count,
            pattern_discovery_count = snapshot.pattern_discovery_count,
            cache_hit_rate = snapshot.cache_hit_rate,
            last_activity = ?snapshot.last_activity,
            "memory statistics"
        );
        snapshot
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
        debug!(routine = name, "lifecycle routine stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::evolution::EvolutionTracker;
    use crate::memory::pattern::BoxPatternDiscovery;
    use crate::memory::testing::{FakeMaintenance, InMemoryFactory, RecordingPatterns};
    use engram_types::envelope::MemoryEnvelope;
    use engram_types::memory::{MemoryContext, MemoryMetadata, MemoryType};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    struct Fixture {
        manager: LifecycleManager,
        registry: Arc<InstanceRegistry>,
        evolution: Arc<BoxMemoryEvolution>,
        factory: InMemoryFactory,
        maintenance: FakeMaintenance,
    }

    fn fixture(config: MemoryConfig) -> Fixture {
        let factory = InMemoryFactory::new();
        let maintenance = FakeMaintenance::over(&factory);
        let stats = Arc::new(MemoryStats::new());
        let registry = Arc::new(InstanceRegistry::new(
            Arc::new(factory.clone()),
            Arc::new(BoxPatternDiscovery::new(RecordingPatterns::default())),
            Arc::clone(&stats),
        ));
        let evolution = Arc::new(BoxMemoryEvolution::new(EvolutionTracker::new()));
        let manager = LifecycleManager::new(
            Arc::clone(&registry),
            Arc::new(BoxMemoryMaintenance::new(maintenance.clone())),
            Arc::clone(&evolution),
            stats,
            config,
        );
        Fixture {
            manager,
            registry,
            evolution,
            factory,
            maintenance,
        }
    }

    #[tokio::test]
    async fn ttl_sweep_removes_expired_working_memory() {
        let f = fixture(MemoryConfig::default());
        let key = InstanceKey::new("1", "u");
        let instance = f.registry.get_or_create(&key).await.unwrap();
        let working = instance.store(MemoryType::Working);

        let expired = working
            .store(
                &MemoryEnvelope::from_payload(MemoryType::Working, json!("old"), None),
                &MemoryContext::new("1", "u"),
                &MemoryMetadata {
                    expires_at: Some(Utc::now() - chrono::Duration::milliseconds(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let live = working
            .store(
                &MemoryEnvelope::from_payload(MemoryType::Working, json!("new"), None),
                &MemoryContext::new("1", "u"),
                &MemoryMetadata::default(),
            )
            .await
            .unwrap();

        assert_eq!(f.manager.sweep_expired_working().await.unwrap(), 1);
        assert!(working.get(&expired.id).await.unwrap().is_none());
        assert!(working.get(&live.id).await.unwrap().is_some());
        assert_eq!(f.factory.records_of(MemoryType::Working).len(), 1);
    }

    #[tokio::test]
    async fn sweep_error_is_returned_not_panicked() {
        let f = fixture(MemoryConfig::default());
        f.maintenance.unreachable.store(true, Ordering::SeqCst);
        assert!(f.manager.sweep_expired_working().await.is_err());
    }

    #[tokio::test]
    async fn eviction_uses_configured_window() {
        let f = fixture(MemoryConfig {
            instance_idle_timeout_secs: 60,
            ..Default::default()
        });
        let key = InstanceKey::new("1", "u");
        let instance = f.registry.get_or_create(&key).await.unwrap();

        assert!(f.manager.evict_idle_instances().await.is_empty());
        instance.touch(Utc::now() - chrono::Duration::seconds(61));
        assert_eq!(f.manager.evict_idle_instances().await, vec![key]);
        assert_eq!(f.manager.emit_stats_snapshot().instance_count, 0);
    }

    #[tokio::test]
    async fn eviction_drops_evolution_state() {
        let f = fixture(MemoryConfig {
            instance_idle_timeout_secs: 0,
            ..Default::default()
        });
        for i in 0..50 {
            let key = InstanceKey::new("1", format!("user-{i}"));
            let instance = f.registry.get_or_create(&key).await.unwrap();
            instance.touch(Utc::now() - chrono::Duration::seconds(1));
            f.evolution
                .evaluate(
                    &instance,
                    &json!("hello"),
                    &MemoryContext::new("1", key.user_id.clone()),
                    &MemoryMetadata::default(),
                    &[],
                )
                .await
                .unwrap();
        }
        assert_eq!(f.evolution.stats().await.unwrap().tracked_instances, 50);

        let evicted = f.manager.evict_idle_instances().await;

        assert_eq!(evicted.len(), 50);
        assert!(f.registry.is_empty());
        let stats = f.evolution.stats().await.unwrap();
        assert_eq!(stats.tracked_instances, 0);
        assert_eq!(stats.total_evaluations, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sweep_skips_first_tick_and_survives_errors() {
        let f = fixture(MemoryConfig {
            working_sweep_interval_secs: 300,
            ..Default::default()
        });
        f.maintenance.unreachable.store(true, Ordering::SeqCst);
        let shutdown = CancellationToken::new();
        let handles = f.manager.start(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.maintenance.purge_calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(f.maintenance.purge_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(f.maintenance.purge_calls.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
