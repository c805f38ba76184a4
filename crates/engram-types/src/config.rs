//! Configuration types for the memory service.
//!
//! `MemoryConfig` represents the top-level `config.toml` that controls
//! instance lifetimes, sweep intervals, retrieval defaults, and the
//! screenshot captioning provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the memory service.
///
/// Loaded from `~/.engram/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Instances idle longer than this are evicted.
    #[serde(default = "default_instance_idle_timeout_secs")]
    pub instance_idle_timeout_secs: u64,

    /// How often the eviction sweep runs.
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    /// How often expired working memory is deleted.
    #[serde(default = "default_working_sweep_interval_secs")]
    pub working_sweep_interval_secs: u64,

    /// How often a statistics snapshot is logged.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// Lifetime of a working memory row.
    #[serde(default = "default_working_ttl_secs")]
    pub working_ttl_secs: u64,

    /// Result count when a retrieval does not specify one.
    #[serde(default = "default_retrieve_limit")]
    pub default_retrieve_limit: usize,

    /// Bound of the background analysis queue.
    #[serde(default = "default_background_queue_capacity")]
    pub background_queue_capacity: usize,

    #[serde(default)]
    pub caption: CaptionConfig,
}

fn default_instance_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_eviction_interval_secs() -> u64 {
    30 * 60
}

fn default_working_sweep_interval_secs() -> u64 {
    5 * 60
}

fn default_stats_interval_secs() -> u64 {
    5 * 60
}

fn default_working_ttl_secs() -> u64 {
    60 * 60
}

fn default_retrieve_limit() -> usize {
    10
}

fn default_background_queue_capacity() -> usize {
    256
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            instance_idle_timeout_secs: default_instance_idle_timeout_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
            working_sweep_interval_secs: default_working_sweep_interval_secs(),
            stats_interval_secs: default_stats_interval_secs(),
            working_ttl_secs: default_working_ttl_secs(),
            default_retrieve_limit: default_retrieve_limit(),
            background_queue_capacity: default_background_queue_capacity(),
            caption: CaptionConfig::default(),
        }
    }
}

impl MemoryConfig {
    pub fn instance_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.instance_idle_timeout_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }

    pub fn working_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.working_sweep_interval_secs.max(1))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    pub fn working_ttl(&self) -> Duration {
        Duration::from_secs(self.working_ttl_secs)
    }
}

/// Screenshot captioning provider settings.
///
/// The API key is not part of the file; it comes from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    #[serde(default = "default_caption_model")]
    pub model: String,
    #[serde(default = "default_caption_base_url")]
    pub base_url: String,
    #[serde(default = "default_caption_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_caption_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_caption_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_caption_timeout_secs() -> u64 {
    60
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            model: default_caption_model(),
            base_url: default_caption_base_url(),
            timeout_secs: default_caption_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_default_values() {
        let config = MemoryConfig::default();
        assert_eq!(config.instance_idle_timeout_secs, 1800);
        assert_eq!(config.eviction_interval_secs, 1800);
        assert_eq!(config.working_sweep_interval_secs, 300);
        assert_eq!(config.stats_interval_secs, 300);
        assert_eq!(config.default_retrieve_limit, 10);
        assert_eq!(config.caption.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn test_memory_config_deserialize_with_defaults() {
        let config: MemoryConfig = toml::from_str("").unwrap();
        assert_eq!(config.working_ttl_secs, 3600);
        assert_eq!(config.background_queue_capacity, 256);
    }

    #[test]
    fn test_memory_config_deserialize_with_values() {
        let toml_str = r#"
instance_idle_timeout_secs = 60
working_ttl_secs = 120

[caption]
model = "claude-sonnet-4-20250514"
timeout_secs = 15
"#;
        let config: MemoryConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.instance_idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.working_ttl(), Duration::from_secs(120));
        assert_eq!(config.caption.model, "claude-sonnet-4-20250514");
        assert_eq!(config.caption.timeout_secs, 15);
        assert_eq!(config.caption.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let config = MemoryConfig {
            stats_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.stats_interval(), Duration::from_secs(1));
    }
}
