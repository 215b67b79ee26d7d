//! Configuration loading and validation.
//!
//! Configuration is resolved with the following precedence (highest wins):
//!
//! 1. Environment variables (`FATHOM_*`)
//! 2. Data-dir config (`<data>/config.toml`)
//! 3. User config (`~/.config/fathom/config.toml`)
//! 4. Compiled-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FathomError, FathomResult};
use crate::types::{ProviderIdentity, ProviderKind};

/// Top-level configuration for Fathom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the database, container sidecars, and model cache.
    pub data_dir: PathBuf,

    /// Indexing configuration.
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Reranker configuration.
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Watcher configuration.
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Indexing-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Extensions that are never extracted (binary formats without text).
    #[serde(default = "IndexingConfig::default_excluded_extensions")]
    pub excluded_extensions: Vec<String>,

    /// Maximum file size to index (in bytes). Larger files are skipped.
    #[serde(default = "IndexingConfig::default_max_file_size")]
    pub max_file_size: u64,

    /// Worker pool size for extraction; 0 means the CPU count.
    #[serde(default)]
    pub extract_concurrency: usize,

    /// Whether to append git commit history to files inside a working tree.
    #[serde(default = "IndexingConfig::default_git_enrichment")]
    pub git_enrichment: bool,

    /// Whether to run OCR on image files.
    #[serde(default = "IndexingConfig::default_ocr_enabled")]
    pub ocr_enabled: bool,

    /// Name of the per-root ignore file, honored alongside .gitignore.
    #[serde(default = "IndexingConfig::default_ignore_file")]
    pub ignore_file: String,

    /// Bounded retry count for provider failures.
    #[serde(default = "IndexingConfig::default_max_retries")]
    pub max_retries: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            excluded_extensions: Self::default_excluded_extensions(),
            max_file_size: Self::default_max_file_size(),
            extract_concurrency: 0,
            git_enrichment: Self::default_git_enrichment(),
            ocr_enabled: Self::default_ocr_enabled(),
            ignore_file: Self::default_ignore_file(),
            max_retries: Self::default_max_retries(),
        }
    }
}

impl IndexingConfig {
    fn default_excluded_extensions() -> Vec<String> {
        [
            "exe", "dll", "so", "dylib", "a", "o", "bin", "class", "pyc", "wasm", "zip", "tar",
            "gz", "bz2", "xz", "zst", "7z", "rar", "mp3", "mp4", "mov", "avi", "mkv", "wav",
            "flac", "ogg", "woff", "woff2", "ttf", "otf", "ico", "db", "sqlite", "lock",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
    }

    fn default_max_file_size() -> u64 {
        5 * 1024 * 1024 // 5MB
    }

    fn default_git_enrichment() -> bool {
        true
    }

    fn default_ocr_enabled() -> bool {
        true
    }

    fn default_ignore_file() -> String {
        ".fathomignore".into()
    }

    fn default_max_retries() -> usize {
        3
    }

    /// Resolved extraction worker count.
    pub fn workers(&self) -> usize {
        if self.extract_concurrency > 0 {
            self.extract_concurrency
        } else {
            std::thread::available_parallelism().map_or(2, std::num::NonZeroUsize::get)
        }
    }
}

/// Chunk size and overlap policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target fragment size for code, in bytes.
    #[serde(default = "ChunkingConfig::default_code_bytes")]
    pub code_bytes: usize,

    /// Target fragment size for prose/markup, in bytes.
    #[serde(default = "ChunkingConfig::default_doc_bytes")]
    pub doc_bytes: usize,

    /// Target fragment size for configuration formats, in bytes.
    #[serde(default = "ChunkingConfig::default_config_bytes")]
    pub config_bytes: usize,

    /// Hard cap no fragment may exceed, in bytes.
    #[serde(default = "ChunkingConfig::default_hard_cap_bytes")]
    pub hard_cap_bytes: usize,

    /// Overlap between consecutive window-split fragments, in bytes.
    /// Never applied to structural splits.
    #[serde(default = "ChunkingConfig::default_overlap_bytes")]
    pub overlap_bytes: usize,

    /// Global size override replacing the per-kind targets when set.
    #[serde(default)]
    pub size_override: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            code_bytes: Self::default_code_bytes(),
            doc_bytes: Self::default_doc_bytes(),
            config_bytes: Self::default_config_bytes(),
            hard_cap_bytes: Self::default_hard_cap_bytes(),
            overlap_bytes: Self::default_overlap_bytes(),
            size_override: None,
        }
    }
}

impl ChunkingConfig {
    fn default_code_bytes() -> usize { 1200 }
    fn default_doc_bytes() -> usize { 800 }
    fn default_config_bytes() -> usize { 600 }
    fn default_hard_cap_bytes() -> usize { 2000 }
    fn default_overlap_bytes() -> usize { 150 }

    /// Target size for a given chunk family, honoring the global override.
    pub fn target_for(&self, language: crate::types::Language) -> usize {
        if let Some(size) = self.size_override {
            return size.min(self.hard_cap_bytes);
        }
        let target = if language.is_code() {
            self.code_bytes
        } else if language.is_config() {
            self.config_bytes
        } else {
            self.doc_bytes
        };
        target.min(self.hard_cap_bytes)
    }
}

/// Embedding model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Local or remote inference for new containers.
    #[serde(default = "EmbeddingConfig::default_kind")]
    pub kind: ProviderKind,

    /// Model name; resolves the local cache directory or the remote model field.
    #[serde(default = "EmbeddingConfig::default_model")]
    pub model: String,

    /// Output embedding dimension.
    #[serde(default = "EmbeddingConfig::default_dimension")]
    pub dimension: usize,

    /// Batch size for embedding inference.
    #[serde(default = "EmbeddingConfig::default_batch_size")]
    pub batch_size: usize,

    /// Maximum sequence length for the tokenizer.
    #[serde(default = "EmbeddingConfig::default_max_seq_length")]
    pub max_seq_length: usize,

    /// Override path to a local ONNX model file.
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Remote endpoint URL (remote kind only).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token for the remote endpoint (remote kind only).
    #[serde(default)]
    pub api_key: Option<String>,

    /// Remote request timeout in seconds.
    #[serde(default = "EmbeddingConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            kind: Self::default_kind(),
            model: Self::default_model(),
            dimension: Self::default_dimension(),
            batch_size: Self::default_batch_size(),
            max_seq_length: Self::default_max_seq_length(),
            model_path: None,
            endpoint: None,
            api_key: None,
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    fn default_kind() -> ProviderKind { ProviderKind::Local }
    fn default_model() -> String { "all-MiniLM-L6-v2".into() }
    fn default_dimension() -> usize { 384 }
    fn default_batch_size() -> usize { 32 }
    fn default_max_seq_length() -> usize { 512 }
    fn default_timeout_secs() -> u64 { 30 }

    /// The provider identity new containers snapshot at creation.
    pub fn identity(&self) -> ProviderIdentity {
        ProviderIdentity {
            kind: self.kind,
            model: self.model.clone(),
            dimension: self.dimension,
        }
    }
}

/// Cross-encoder reranker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Whether reranking runs at all.
    #[serde(default = "RerankerConfig::default_enabled")]
    pub enabled: bool,

    /// Maximum number of candidates to pass to the reranker.
    #[serde(default = "RerankerConfig::default_max_candidates")]
    pub max_candidates: usize,

    /// Batch size for reranker inference.
    #[serde(default = "RerankerConfig::default_batch_size")]
    pub batch_size: usize,

    /// Maximum sequence length for the reranker tokenizer.
    #[serde(default = "RerankerConfig::default_max_seq_length")]
    pub max_seq_length: usize,

    /// Budget for the rerank step; on expiry the fused order is kept.
    #[serde(default = "RerankerConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_candidates: Self::default_max_candidates(),
            batch_size: Self::default_batch_size(),
            max_seq_length: Self::default_max_seq_length(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl RerankerConfig {
    fn default_enabled() -> bool { true }
    fn default_max_candidates() -> usize { 50 }
    fn default_batch_size() -> usize { 16 }
    fn default_max_seq_length() -> usize { 512 }
    fn default_timeout_ms() -> u64 { 4000 }
}

/// File watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Debounce window in milliseconds; bursts per path are coalesced.
    #[serde(default = "WatcherConfig::default_debounce_ms")]
    pub debounce_ms: u64,

    /// Cap for the busy-backoff requeue, in milliseconds.
    #[serde(default = "WatcherConfig::default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Interval between full rescans (seconds) recovering dropped events.
    #[serde(default = "WatcherConfig::default_rescan_interval_secs")]
    pub rescan_interval_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
            backoff_cap_ms: Self::default_backoff_cap_ms(),
            rescan_interval_secs: Self::default_rescan_interval_secs(),
        }
    }
}

impl WatcherConfig {
    fn default_debounce_ms() -> u64 { 500 }
    fn default_backoff_cap_ms() -> u64 { 8000 }
    fn default_rescan_interval_secs() -> u64 { 300 }
}

/// Search-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results to return.
    #[serde(default = "SearchConfig::default_top_k")]
    pub default_top_k: usize,

    /// Hard cap on requested top_k.
    #[serde(default = "SearchConfig::default_max_top_k")]
    pub max_top_k: usize,

    /// RRF constant (k parameter).
    #[serde(default = "SearchConfig::default_rrf_k")]
    pub rrf_k: u32,

    /// Dense candidate pool is `max(top_k * dense_multiplier, dense_floor)`.
    #[serde(default = "SearchConfig::default_dense_multiplier")]
    pub dense_multiplier: usize,

    /// Floor for the dense candidate pool.
    #[serde(default = "SearchConfig::default_dense_floor")]
    pub dense_floor: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: Self::default_top_k(),
            max_top_k: Self::default_max_top_k(),
            rrf_k: Self::default_rrf_k(),
            dense_multiplier: Self::default_dense_multiplier(),
            dense_floor: Self::default_dense_floor(),
        }
    }
}

impl SearchConfig {
    fn default_top_k() -> usize { 10 }
    fn default_max_top_k() -> usize { 50 }
    fn default_rrf_k() -> u32 { 60 }
    fn default_dense_multiplier() -> usize { 4 }
    fn default_dense_floor() -> usize { 50 }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Whether to output logs as JSON.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".into()
    }
}

impl Config {
    /// Load configuration from defaults, then overlay user and data-dir config.
    pub fn load() -> FathomResult<Self> {
        let data_dir = default_data_dir();
        Self::load_from(&data_dir)
    }

    /// Load configuration rooted at an explicit data directory.
    pub fn load_from(data_dir: &Path) -> FathomResult<Self> {
        let mut config = Self::defaults(data_dir);

        // User config: ~/.config/fathom/config.toml
        if let Some(user_config_dir) = dirs::config_dir() {
            let user_config_path = user_config_dir.join("fathom").join("config.toml");
            if user_config_path.exists() {
                config.merge_from_file(&user_config_path)?;
            }
        }

        // Data-dir config: <data>/config.toml
        let local_config_path = data_dir.join("config.toml");
        if local_config_path.exists() {
            config.merge_from_file(&local_config_path)?;
        }

        // Environment overrides
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration rooted at the given data directory.
    pub fn defaults(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            indexing: IndexingConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            reranker: RerankerConfig::default(),
            watcher: WatcherConfig::default(),
            search: SearchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Directory where container sidecars live.
    pub fn containers_dir(&self) -> PathBuf {
        self.data_dir.join("containers")
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("index.db")
    }

    /// Merge values from a TOML config file (non-destructive overlay).
    fn merge_from_file(&mut self, path: &Path) -> FathomResult<()> {
        let content = std::fs::read_to_string(path)?;
        let overlay: toml::Value = toml::from_str(&content).map_err(|e| FathomError::Config {
            details: format!("invalid TOML in {}: {e}", path.display()),
        })?;

        macro_rules! overlay_section {
            ($key:literal, $field:ident, $ty:ty) => {
                if let Some(section) = overlay.get($key) {
                    if let Ok(parsed) = section.clone().try_into::<$ty>() {
                        self.$field = parsed;
                    }
                }
            };
        }

        overlay_section!("indexing", indexing, IndexingConfig);
        overlay_section!("chunking", chunking, ChunkingConfig);
        overlay_section!("embedding", embedding, EmbeddingConfig);
        overlay_section!("reranker", reranker, RerankerConfig);
        overlay_section!("watcher", watcher, WatcherConfig);
        overlay_section!("search", search, SearchConfig);
        overlay_section!("logging", logging, LoggingConfig);

        Ok(())
    }

    /// Apply environment variable overrides (FATHOM_* prefix).
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("FATHOM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(model) = std::env::var("FATHOM_MODEL_PATH") {
            self.embedding.model_path = Some(PathBuf::from(model));
        }
        if let Ok(endpoint) = std::env::var("FATHOM_EMBED_ENDPOINT") {
            self.embedding.endpoint = Some(endpoint);
        }
        if let Ok(key) = std::env::var("FATHOM_EMBED_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if std::env::var("FATHOM_DISABLE_RERANKER").is_ok() {
            self.reranker.enabled = false;
        }
    }

    /// Reject configurations the engine cannot run with.
    fn validate(&self) -> FathomResult<()> {
        if self.embedding.dimension == 0 {
            return Err(FathomError::Config {
                details: "embedding.dimension must be non-zero".into(),
            });
        }
        if self.chunking.hard_cap_bytes < 64 {
            return Err(FathomError::Config {
                details: "chunking.hard_cap_bytes must be at least 64".into(),
            });
        }
        if self.embedding.kind == ProviderKind::Remote && self.embedding.endpoint.is_none() {
            return Err(FathomError::Config {
                details: "embedding.endpoint is required for the remote provider".into(),
            });
        }
        Ok(())
    }
}

/// Platform-default data directory (`~/.local/share/fathom` on Linux).
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fathom")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::defaults(Path::new("/tmp/fathom-test"));
        assert!(config.validate().is_ok());
        assert_eq!(config.indexing.max_file_size, 5 * 1024 * 1024);
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.watcher.debounce_ms, 500);
        assert_eq!(config.search.rrf_k, 60);
    }

    #[test]
    fn test_chunk_targets_honor_override() {
        use crate::types::Language;
        let mut chunking = ChunkingConfig::default();
        assert_eq!(chunking.target_for(Language::Rust), 1200);
        assert_eq!(chunking.target_for(Language::Markdown), 800);
        assert_eq!(chunking.target_for(Language::Toml), 600);

        chunking.size_override = Some(400);
        assert_eq!(chunking.target_for(Language::Rust), 400);
        assert_eq!(chunking.target_for(Language::Toml), 400);

        // Override never pierces the hard cap.
        chunking.size_override = Some(50_000);
        assert_eq!(chunking.target_for(Language::Rust), 2000);
    }

    #[test]
    fn test_remote_without_endpoint_is_rejected() {
        let mut config = Config::defaults(Path::new("/tmp/fathom-test"));
        config.embedding.kind = ProviderKind::Remote;
        assert!(config.validate().is_err());
        config.embedding.endpoint = Some("https://embed.example.com/v1".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_from_file_overlays_sections() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[chunking]\ncode_bytes = 900\n").expect("write");

        let mut config = Config::defaults(dir.path());
        config.merge_from_file(&path).expect("merge");
        assert_eq!(config.chunking.code_bytes, 900);
        // Untouched sections keep defaults.
        assert_eq!(config.search.default_top_k, 10);
    }
}
