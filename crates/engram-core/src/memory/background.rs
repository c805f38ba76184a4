//! Background analysis queue.
//!
//! Successful stores enqueue pattern analysis and evolution evaluation on a
//! bounded `mpsc` channel drained by a single worker task. The store call
//! never waits for the worker: a full queue drops the job with a warning.
//! Job failures are logged and never retried. Jobs whose instance was
//! retired (cleared) after they were queued are skipped.

use std::sync::Arc;

use engram_types::memory::{MemoryContext, MemoryMetadata, StoredMemory};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::evolution::BoxMemoryEvolution;
use super::instance::MemoryInstance;
use super::stats::MemoryStats;

/// What a successful store hands to the background analyzers.
#[derive(Debug)]
pub struct StoredContent {
    pub content: Value,
    pub context: MemoryContext,
    pub metadata: MemoryMetadata,
    pub results: Vec<StoredMemory>,
}

#[derive(Debug)]
pub enum BackgroundJob {
    AnalyzeNewMemory {
        instance: Arc<MemoryInstance>,
        stored: Arc<StoredContent>,
    },
    EvaluateEvolution {
        instance: Arc<MemoryInstance>,
        stored: Arc<StoredContent>,
    },
}

impl BackgroundJob {
    fn name(&self) -> &'static str {
        match self {
            BackgroundJob::AnalyzeNewMemory { .. } => "analyze_new_memory",
            BackgroundJob::EvaluateEvolution { .. } => "evaluate_evolution",
        }
    }
}

/// Sending half of the background queue.
#[derive(Clone)]
pub struct BackgroundQueue {
    tx: mpsc::Sender<BackgroundJob>,
    stats: Arc<MemoryStats>,
}

impl BackgroundQueue {
    /// Enqueue without waiting. Returns `false` when the job was dropped.
    pub fn submit(&self, job: BackgroundJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.stats.record_dropped_job();
                warn!(job = job.name(), "background queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.stats.record_dropped_job();
                warn!(job = job.name(), "background worker stopped, dropping job");
                false
            }
        }
    }
}

/// Receiving half: runs every job to completion, one at a time.
pub struct BackgroundWorker {
    rx: mpsc::Receiver<BackgroundJob>,
    evolution: Arc<BoxMemoryEvolution>,
    stats: Arc<MemoryStats>,
}

/// Create a bounded queue and the worker that drains it.
pub fn background_channel(
    capacity: usize,
    evolution: Arc<BoxMemoryEvolution>,
    stats: Arc<MemoryStats>,
) -> (BackgroundQueue, BackgroundWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BackgroundQueue {
            tx,
            stats: Arc::clone(&stats),
        },
        BackgroundWorker {
            rx,
            evolution,
            stats,
        },
    )
}

impl BackgroundWorker {
    /// Process jobs until `shutdown` fires or every sender is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.process(job).await;
        }
        debug!("background worker stopped");
    }

    async fn process(&self, job: BackgroundJob) {
        let instance = match &job {
            BackgroundJob::AnalyzeNewMemory { instance, .. }
            | BackgroundJob::EvaluateEvolution { instance, .. } => instance,
        };
        if instance.is_retired() {
            debug!(instance = %instance.key, job = job.name(), "instance retired, skipping job");
            return;
        }

        match job {
            BackgroundJob::AnalyzeNewMemory { instance, stored } => {
                match instance
                    .patterns
                    .analyze_new_memory(
                        &stored.content,
                        &stored.context,
                        &stored.metadata,
                        &stored.results,
                    )
                    .await
                {
                    Ok(count) => {
                        self.stats.record_patterns(count);
                        debug!(instance = %instance.key, patterns = count, "pattern analysis done");
                    }
                    Err(e) => {
                        warn!(instance = %instance.key, error = %e, "pattern analysis failed");
                    }
                }
            }
            BackgroundJob::EvaluateEvolution { instance, stored } => {
                match self
                    .evolution
                    .evaluate(
                        &instance,
                        &stored.content,
                        &stored.context,
                        &stored.metadata,
                        &stored.results,
                    )
                    .await
                {
                    Ok(events) if !events.is_empty() => {
                        debug!(instance = %instance.key, events = events.len(), "memory evolution observed");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(instance = %instance.key, error = %e, "evolution evaluation failed");
                    }
                }
            }
        }
    }
}
