//! Configuration loader for Engram.
//!
//! Reads `config.toml` from the data directory (`~/.engram/` by default)
//! into [`MemoryConfig`]. A missing or malformed file falls back to the
//! defaults; the service always starts.

use std::path::{Path, PathBuf};

use engram_types::config::MemoryConfig;
use secrecy::SecretString;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "ENGRAM_DATA_DIR";

/// Environment variable holding the captioning provider API key.
pub const CAPTION_API_KEY_ENV: &str = "ENGRAM_CAPTION_API_KEY";

/// Resolve the data directory.
///
/// Priority:
/// 1. `ENGRAM_DATA_DIR` environment variable
/// 2. `~/.engram`
/// 3. `.engram` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".engram");
    }
    PathBuf::from(".engram")
}

/// Load `{data_dir}/config.toml`, falling back to [`MemoryConfig::default()`].
pub async fn load_memory_config(data_dir: &Path) -> MemoryConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return MemoryConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return MemoryConfig::default();
        }
    };

    match toml::from_str::<MemoryConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            MemoryConfig::default()
        }
    }
}

/// Captioning API key from the environment, if set and non-blank.
pub fn caption_api_key() -> Option<SecretString> {
    match std::env::var(CAPTION_API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => Some(SecretString::from(key.trim().to_string())),
        _ => None,
    }
}
