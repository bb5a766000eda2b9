// src/config/file.rs
// File-based configuration from ~/.kiro-recall/config.toml

use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Top-level config structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct RecallConfig {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Conversation source configuration section
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SourcesConfig {
    #[serde(default)]
    pub cli: CliSourceConfig,
    #[serde(default)]
    pub ide: IdeSourceConfig,
}

/// CLI conversation store (SQLite) source
#[derive(Debug, Deserialize, Clone)]
pub struct CliSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Explicit store paths; empty means the platform default location.
    #[serde(default)]
    pub paths: Vec<String>,
}

impl Default for CliSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            paths: Vec::new(),
        }
    }
}

impl CliSourceConfig {
    /// Store paths to probe, tilde-expanded; platform default when unset.
    pub fn resolved_paths(&self) -> Vec<PathBuf> {
        if !self.paths.is_empty() {
            return self
                .paths
                .iter()
                .map(|p| crate::utils::expand_tilde(p))
                .collect();
        }
        dirs::data_local_dir()
            .map(|d| vec![d.join("kiro-cli").join("data.sqlite3")])
            .unwrap_or_default()
    }
}

/// IDE chat document source
#[derive(Debug, Deserialize, Clone)]
pub struct IdeSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Glob patterns; empty means the default chat directory.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for IdeSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: Vec::new(),
        }
    }
}

impl IdeSourceConfig {
    /// Glob patterns to scan, tilde-expanded; default when unset.
    pub fn resolved_patterns(&self) -> Vec<String> {
        if !self.patterns.is_empty() {
            return self
                .patterns
                .iter()
                .map(|p| crate::utils::expand_tilde(p).to_string_lossy().into_owned())
                .collect();
        }
        dirs::home_dir()
            .map(|h| {
                vec![
                    h.join(".kiro")
                        .join("chats")
                        .join("*")
                        .join("*.chat")
                        .to_string_lossy()
                        .into_owned(),
                ]
            })
            .unwrap_or_default()
    }
}

/// Embedding model configuration section
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Model identifier; also versions the on-disk cache.
    #[serde(default = "EmbeddingConfig::default_model")]
    pub model: String,
    /// Base URL of an OpenAI-compatible /v1/embeddings endpoint.
    #[serde(default = "EmbeddingConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "EmbeddingConfig::default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "EmbeddingConfig::default_batch_size")]
    pub batch_size: usize,
    /// Cache directory; defaults to the user cache dir.
    pub cache_dir: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: Self::default_model(),
            endpoint: Self::default_endpoint(),
            dimensions: Self::default_dimensions(),
            batch_size: Self::default_batch_size(),
            cache_dir: None,
        }
    }
}

impl EmbeddingConfig {
    fn default_model() -> String {
        "all-minilm".to_string()
    }
    fn default_endpoint() -> String {
        "http://localhost:11434".to_string()
    }
    fn default_dimensions() -> usize {
        384
    }
    fn default_batch_size() -> usize {
        64
    }

    /// Resolved cache directory for the persisted index artifact.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => crate::utils::expand_tilde(dir),
            None => dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("kiro-recall"),
        }
    }
}

/// Search defaults section
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "SearchConfig::default_threshold")]
    pub default_threshold: f32,
    #[serde(default = "SearchConfig::default_max_results")]
    pub default_max_results: usize,
    #[serde(default = "SearchConfig::default_context_window")]
    pub default_context_window: usize,
    /// Messages longer than this are dropped at load time.
    #[serde(default = "SearchConfig::default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_threshold: Self::default_threshold(),
            default_max_results: Self::default_max_results(),
            default_context_window: Self::default_context_window(),
            max_content_chars: Self::default_max_content_chars(),
        }
    }
}

impl SearchConfig {
    fn default_threshold() -> f32 {
        0.2
    }
    fn default_max_results() -> usize {
        10
    }
    fn default_context_window() -> usize {
        3
    }
    fn default_max_content_chars() -> usize {
        8192
    }
}

/// Memory budget section
#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    /// Fraction of physical RAM the index may use (ignored when limit_mb set).
    #[serde(default = "MemoryConfig::default_fraction")]
    pub fraction: f64,
    /// Explicit limit in megabytes; takes precedence over fraction.
    pub limit_mb: Option<u64>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            fraction: Self::default_fraction(),
            limit_mb: None,
        }
    }
}

impl MemoryConfig {
    fn default_fraction() -> f64 {
        0.33
    }
}

fn default_true() -> bool {
    true
}

impl RecallConfig {
    /// Load config from ~/.kiro-recall/config.toml
    pub fn load() -> Self {
        let path = Self::config_path();

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kiro-recall")
            .join("config.toml")
    }
}
