//! Application state wiring the memory service to its SQLite backing.
//!
//! AppState is shared by the CLI commands and the REST handlers. Background
//! tasks (the analysis worker and, for `serve`, the lifecycle loops) stop
//! when the shared shutdown token is cancelled.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use engram_core::memory::service::MemoryService;
use engram_infra::components::sqlite_components;
use engram_infra::config::{caption_api_key, load_memory_config, resolve_data_dir};
use engram_infra::sqlite::pool::{DatabasePool, database_url};
use engram_types::config::MemoryConfig;
use secrecy::SecretString;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub memory: Arc<MemoryService>,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    pub shutdown: CancellationToken,
}

/// Handles of the tasks spawned for an [`AppState`].
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn extend(&mut self, handles: Vec<JoinHandle<()>>) {
        self.handles.extend(handles);
    }

    /// Wait for every task to finish.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
    }
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, and open the database.
    pub async fn init() -> anyhow::Result<(Self, BackgroundTasks)> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;
        let config = load_memory_config(&data_dir).await;
        Self::open(&data_dir, config, caption_api_key()).await
    }

    /// Open the database under `data_dir` and start the memory service.
    pub async fn open(
        data_dir: &Path,
        config: MemoryConfig,
        caption_api_key: Option<SecretString>,
    ) -> anyhow::Result<(Self, BackgroundTasks)> {
        let db_url = format!("{}?mode=rwc", database_url(data_dir));
        let db_pool = DatabasePool::new(&db_url).await?;
        tracing::debug!(data_dir = %data_dir.display(), "database ready");

        let components = sqlite_components(&db_pool, &config, caption_api_key);
        let shutdown = CancellationToken::new();
        let (memory, worker) = MemoryService::start(components, config, shutdown.clone());

        let mut tasks = BackgroundTasks {
            handles: Vec::new(),
        };
        tasks.push(worker);

        let state = Self {
            memory: Arc::new(memory),
            data_dir: data_dir.to_path_buf(),
            db_pool,
            shutdown,
        };
        Ok((state, tasks))
    }

    /// Start the periodic sweep, eviction, and stats loops.
    pub fn start_lifecycle(&self, tasks: &mut BackgroundTasks) {
        tasks.extend(self.memory.lifecycle().start(self.shutdown.clone()));
    }

    /// Cancel background work, wait for it, and close the database.
    pub async fn close(self, tasks: BackgroundTasks) {
        self.shutdown.cancel();
        tasks.join().await;
        self.db_pool.close().await;
    }
}
