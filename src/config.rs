//! Configuration system for xlens.
//!
//! Provides layered configuration from multiple sources:
//!
//! 1. **Compiled defaults** - Sensible defaults built into the binary
//! 2. **User config file** - `~/.config/xlens/config.toml`
//! 3. **Environment variables** - `XLENS_*` prefix
//! 4. **CLI arguments** - Highest priority, always wins
//!
//! # Example Configuration File
//!
//! ```toml
//! [store]
//! backend = "http"
//! base_url = "https://archive.example.com/users"
//! timeout_secs = 30
//! cached_blobs = 64
//!
//! [artifacts]
//! tweets = "clustered_tweets_df.parquet"
//!
//! [projection]
//! max_iterations = 200
//! tolerance = 1e-9
//!
//! [output]
//! pretty = true
//! colors = true
//! ```

use crate::avatar::PLACEHOLDER_AVATAR;
use crate::error::{LensError, Result};
use crate::projection::ProjectionParams;
use crate::store::{DEFAULT_CACHED_BLOBS, FsStore, HttpStore, ObjectStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main configuration structure for xlens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where artifacts are read from.
    pub store: StoreConfig,
    /// Artifact file names within an account prefix.
    pub artifacts: ArtifactsConfig,
    /// Embedding projection tuning.
    pub projection: ProjectionConfig,
    /// Output formatting configuration.
    pub output: OutputConfig,
    /// Avatar fallback.
    pub avatars: AvatarsConfig,
}

/// Store backend kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Fs,
    Http,
}

/// Object store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Environment variable: `XLENS_BACKEND`
    pub backend: Backend,

    /// Root directory holding one subdirectory per account.
    /// Environment variable: `XLENS_ROOT`
    pub root: PathBuf,

    /// Base URL for the HTTP backend.
    /// Environment variable: `XLENS_BASE_URL`
    pub base_url: Option<String>,

    /// Per-request timeout for the HTTP backend.
    pub timeout_secs: u64,

    /// Fetched artifacts kept in memory; least recently used go first.
    pub cached_blobs: usize,
}

/// Artifact file names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub tweets: String,
    pub hierarchy: String,
    pub trees: String,
    pub incomplete_trees: String,
    pub group_results: String,
    pub clustering_params: String,
    pub ontology: String,
    pub labels: String,
    pub local_ids: String,
    pub embeddings: String,
}

/// Power iteration limits for the embedding projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Environment variable: `XLENS_MAX_ITERATIONS`
    pub max_iterations: usize,
    pub tolerance: f64,
}

/// Output formatting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Pretty-print JSON output.
    pub pretty: bool,

    /// Enable colored output.
    pub colors: bool,
}

/// Avatar configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarsConfig {
    /// URL used when an account has no resolved avatar.
    pub placeholder_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Fs,
            root: PathBuf::from("./data"),
            base_url: None,
            timeout_secs: 30,
            cached_blobs: DEFAULT_CACHED_BLOBS,
        }
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            tweets: "clustered_tweets_df.parquet".to_string(),
            hierarchy: "labeled_cluster_hierarchy.parquet".to_string(),
            trees: "trees.pkl".to_string(),
            incomplete_trees: "incomplete_trees.pkl".to_string(),
            group_results: "group_results.json".to_string(),
            clustering_params: "clustering_params.json".to_string(),
            ontology: "cluster_ontology_items.json".to_string(),
            labels: "cluster_labels.json".to_string(),
            local_ids: "local_tweet_id_maps.json".to_string(),
            embeddings: "embeddings.npy".to_string(),
        }
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        let params = ProjectionParams::default();
        Self {
            max_iterations: params.max_iterations,
            tolerance: params.tolerance,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            colors: true,
        }
    }
}

impl Default for AvatarsConfig {
    fn default() -> Self {
        Self {
            placeholder_url: PLACEHOLDER_AVATAR.to_string(),
        }
    }
}

impl ProjectionConfig {
    #[must_use]
    pub const fn params(&self) -> ProjectionParams {
        ProjectionParams {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. User config file (~/.config/xlens/config.toml)
    /// 3. Compiled defaults
    #[must_use]
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        config.apply_env_overrides();

        debug!("Configuration loaded: {:?}", config);
        config
    }

    /// Load an explicitly requested config file on top of the defaults,
    /// then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`LensError::ConfigError`] if the file cannot be read or parsed.
    pub fn load_with_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LensError::ConfigError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let file: Self = toml::from_str(&content).map_err(|e| LensError::ConfigError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!("Loaded config from: {}", path.display());

        let mut config = Self::default();
        config.merge(file);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file, if it exists and parses.
    #[must_use]
    pub fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            debug!("Config file not found: {}", path.display());
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    info!("Loaded config from: {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Get the path to the user configuration file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("xlens").join("config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("XLENS_ROOT") {
            self.store.root = PathBuf::from(root);
        }
        if let Ok(url) = std::env::var("XLENS_BASE_URL") {
            self.store.base_url = Some(url);
            self.store.backend = Backend::Http;
        }
        if let Ok(backend) = std::env::var("XLENS_BACKEND") {
            match backend.to_lowercase().as_str() {
                "fs" => self.store.backend = Backend::Fs,
                "http" => self.store.backend = Backend::Http,
                other => warn!("Ignoring unknown XLENS_BACKEND '{}'", other),
            }
        }
        if let Ok(iterations) = std::env::var("XLENS_MAX_ITERATIONS") {
            if let Ok(n) = iterations.parse() {
                self.projection.max_iterations = n;
            }
        }
        if std::env::var("XLENS_NO_COLOR").is_ok() || std::env::var("NO_COLOR").is_ok() {
            self.output.colors = false;
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Self) {
        self.store.backend = other.store.backend;
        self.store.root = other.store.root;
        if other.store.base_url.is_some() {
            self.store.base_url = other.store.base_url;
        }
        self.store.timeout_secs = other.store.timeout_secs;
        self.store.cached_blobs = other.store.cached_blobs;

        self.artifacts = other.artifacts;
        self.projection = other.projection;
        self.output = other.output;
        if !other.avatars.placeholder_url.is_empty() {
            self.avatars = other.avatars;
        }
    }

    /// Build the configured store backend.
    ///
    /// # Errors
    ///
    /// Returns [`LensError::ConfigError`] when the HTTP backend has no base
    /// URL, or the client error if it cannot be built.
    pub fn open_store(&self) -> Result<Arc<dyn ObjectStore>> {
        match self.store.backend {
            Backend::Fs => Ok(Arc::new(FsStore::new(&self.store.root))),
            Backend::Http => {
                let base_url = self.store.base_url.clone().ok_or_else(|| LensError::ConfigError {
                    path: Self::user_config_path().unwrap_or_default(),
                    reason: "store.backend is \"http\" but store.base_url is not set".to_string(),
                })?;
                let store = HttpStore::new(
                    base_url,
                    self.artifacts.tweets.clone(),
                    Duration::from_secs(self.store.timeout_secs),
                )?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Generate a default configuration file content.
    #[must_use]
    pub fn default_config_content() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.backend, Backend::Fs);
        assert_eq!(config.artifacts.tweets, "clustered_tweets_df.parquet");
        assert_eq!(config.projection.max_iterations, 200);
        assert!(config.output.colors);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str("[store]\nbackend = \"http\"\n").unwrap();
        assert_eq!(parsed.store.backend, Backend::Http);
        assert_eq!(parsed.store.timeout_secs, 30);
        assert_eq!(parsed.store.cached_blobs, DEFAULT_CACHED_BLOBS);
        assert_eq!(parsed.artifacts.embeddings, "embeddings.npy");
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.store.base_url = Some("https://example.com".to_string());
        other.projection.max_iterations = 50;

        base.merge(other);

        assert_eq!(base.projection.max_iterations, 50);
        assert_eq!(base.store.base_url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_http_backend_requires_base_url() {
        let mut config = Config::default();
        config.store.backend = Backend::Http;
        assert!(config.open_store().is_err());
    }

    #[test]
    fn test_load_with_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store\nbroken").unwrap();
        let err = Config::load_with_file(&path).unwrap_err();
        assert!(matches!(err, LensError::ConfigError { .. }));
    }

    #[test]
    fn test_default_config_content() {
        let content = Config::default_config_content();
        assert!(content.contains("[store]"));
        assert!(content.contains("[artifacts]"));
        assert!(content.contains("[projection]"));
        assert!(content.contains("[output]"));
    }
}
