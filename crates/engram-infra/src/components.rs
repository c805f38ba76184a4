//! Assembles the SQLite-backed collaborators of a `MemoryService`.

use std::sync::Arc;

use engram_core::memory::caption::BoxCaptioner;
use engram_core::memory::evolution::{BoxMemoryEvolution, EvolutionTracker};
use engram_core::memory::maintenance::BoxMemoryMaintenance;
use engram_core::memory::pattern::BoxPatternDiscovery;
use engram_core::memory::service::MemoryComponents;
use engram_types::config::MemoryConfig;
use secrecy::SecretString;

use crate::caption::anthropic::AnthropicCaptioner;
use crate::sqlite::maintenance::SqliteMemoryMaintenance;
use crate::sqlite::memory_store::SqliteStoreFactory;
use crate::sqlite::patterns::SqlitePatternDiscovery;
use crate::sqlite::pool::DatabasePool;

/// Build every port over `pool`. Without an API key, or when the HTTP
/// client cannot be created, captioning is disabled.
pub fn sqlite_components(
    pool: &DatabasePool,
    config: &MemoryConfig,
    caption_api_key: Option<SecretString>,
) -> MemoryComponents {
    let captioner = caption_api_key.and_then(|key| {
        match AnthropicCaptioner::new(key, &config.caption) {
            Ok(captioner) => {
                tracing::info!(model = %captioner.model(), "screenshot captioning enabled");
                Some(BoxCaptioner::new(captioner))
            }
            Err(e) => {
                tracing::warn!(error = %e, "screenshot captioning disabled");
                None
            }
        }
    });
    if captioner.is_none() {
        tracing::debug!("no captioner configured, visual memories use fallback captions");
    }

    MemoryComponents {
        stores: Arc::new(SqliteStoreFactory::new(pool.clone(), config.working_ttl())),
        maintenance: BoxMemoryMaintenance::new(SqliteMemoryMaintenance::new(pool.clone())),
        patterns: BoxPatternDiscovery::new(SqlitePatternDiscovery::new(pool.clone())),
        evolution: BoxMemoryEvolution::new(EvolutionTracker::new()),
        captioner,
    }
}
