//! Configuration management.
//!
//! Precedence, lowest first: compiled defaults, the TOML file
//! (`--config <path>` or `<platform config dir>/memlease/config.toml`), then
//! `.env` and `MEMLEASE_*` environment variables. Invalid override values
//! are ignored with a warning.

mod backends;

pub use backends::{CacheKind, EmbeddingBackend, LedgerBackend, LogFormat, VectorBackend};

use crate::embedding::DEFAULT_DIMENSIONS;
use crate::storage::StorageResilienceConfig;
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Retrieval ranking and limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    /// Cosine floor applied natively by the index and re-checked afterwards.
    pub similarity_threshold: f32,
    /// Results returned when the caller gives no limit.
    pub default_limit: usize,
    /// Largest accepted limit.
    pub max_limit: usize,
    /// Chunk candidates fetched per requested memory.
    pub candidate_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            default_limit: 5,
            max_limit: 50,
            candidate_multiplier: 2,
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone)]
pub struct VectorConfig {
    /// Backend selector.
    pub backend: VectorBackend,
    /// Embedding dimensionality, fixed system-wide.
    pub dimensions: usize,
    /// Qdrant URL.
    pub url: String,
    /// Qdrant API key.
    pub api_key: Option<SecretString>,
    /// Qdrant collection.
    pub collection: String,
    /// Maximum characters per chunk payload.
    pub max_chunk_chars: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Flat,
            dimensions: DEFAULT_DIMENSIONS,
            url: "http://localhost:6333".to_string(),
            api_key: None,
            collection: "memory_chunks".to_string(),
            max_chunk_chars: 800,
        }
    }
}

/// Lease cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Backend selector.
    pub backend: CacheKind,
    /// LRU capacity.
    pub capacity: usize,
    /// Redis URL.
    pub url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheKind::Memory,
            capacity: 10_000,
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Ledger settings.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Backend selector.
    pub backend: LedgerBackend,
    /// Gateway endpoint.
    pub endpoint: String,
    /// Gateway bearer token.
    pub api_key: Option<SecretString>,
    /// Request timeout.
    pub timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Local,
            endpoint: "http://localhost:8545".to_string(),
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

/// Embedding service settings.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Backend selector.
    pub backend: EmbeddingBackend,
    /// Service endpoint.
    pub endpoint: String,
    /// Service API key.
    pub api_key: Option<SecretString>,
    /// Request timeout.
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Hash,
            endpoint: "http://localhost:8080/embed".to_string(),
            api_key: None,
            timeout_ms: 30_000,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directive, e.g. `info` or `memlease=debug`.
    pub level: String,
    /// Optional log file; stderr otherwise.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder.
    pub enabled: bool,
    /// Push gateway URL flushed on shutdown.
    pub push_gateway: Option<String>,
}

/// Main configuration for memlease.
#[derive(Debug, Clone)]
pub struct MemleaseConfig {
    /// Directory for the database, ledger journal and vector snapshot.
    pub data_dir: PathBuf,
    /// Retrieval settings.
    pub retrieval: RetrievalConfig,
    /// Vector index settings.
    pub vector: VectorConfig,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Ledger settings.
    pub ledger: LedgerConfig,
    /// Embedding settings.
    pub embedding: EmbeddingConfig,
    /// Circuit breaker settings.
    pub resilience: StorageResilienceConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Metrics settings.
    pub metrics: MetricsConfig,
}

impl Default for MemleaseConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retrieval: RetrievalConfig::default(),
            vector: VectorConfig::default(),
            cache: CacheConfig::default(),
            ledger: LedgerConfig::default(),
            embedding: EmbeddingConfig::default(),
            resilience: StorageResilienceConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".memlease"),
        |dirs| dirs.data_dir().join("memlease"),
    )
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Retrieval section.
    pub retrieval: Option<ConfigFileRetrieval>,
    /// Vector section.
    pub vector: Option<ConfigFileVector>,
    /// Cache section.
    pub cache: Option<ConfigFileCache>,
    /// Ledger section.
    pub ledger: Option<ConfigFileService>,
    /// Embedding section.
    pub embedding: Option<ConfigFileService>,
    /// Resilience section.
    pub resilience: Option<StorageResilienceConfig>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
    /// Metrics section.
    pub metrics: Option<ConfigFileMetrics>,
}

/// Retrieval section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRetrieval {
    /// Similarity threshold.
    pub similarity_threshold: Option<f32>,
    /// Default limit.
    pub default_limit: Option<usize>,
    /// Maximum limit.
    pub max_limit: Option<usize>,
    /// Candidate multiplier.
    pub candidate_multiplier: Option<usize>,
}

/// Vector section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileVector {
    /// Backend name.
    pub backend: Option<String>,
    /// Dimensions.
    pub dimensions: Option<usize>,
    /// Qdrant URL.
    pub url: Option<String>,
    /// Qdrant API key (supports `${VAR}`).
    pub api_key: Option<String>,
    /// Collection name.
    pub collection: Option<String>,
    /// Chunk length.
    pub max_chunk_chars: Option<usize>,
}

/// Cache section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCache {
    /// Backend name.
    pub backend: Option<String>,
    /// LRU capacity.
    pub capacity: Option<usize>,
    /// Redis URL.
    pub url: Option<String>,
}

/// Ledger or embedding section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileService {
    /// Backend name.
    pub backend: Option<String>,
    /// Endpoint URL.
    pub endpoint: Option<String>,
    /// API key (supports `${VAR}`).
    pub api_key: Option<String>,
    /// Request timeout.
    pub timeout_ms: Option<u64>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive.
    pub level: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

/// Metrics section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileMetrics {
    /// Enable the recorder.
    pub enabled: Option<bool>,
    /// Push gateway URL.
    pub push_gateway: Option<String>,
}

impl MemleaseConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration with full precedence applied.
    ///
    /// An explicit `path` must exist and parse. Without one, the platform
    /// config file is used when present; a broken default file is logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit config file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // A missing .env is the normal case.
        let _ = dotenvy::dotenv();

        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default(),
        };
        Ok(config.with_env_overrides(&|name| std::env::var(name).ok()))
    }

    /// Loads configuration from a file path, without env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has unknown keys.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self::from_config_file(file))
    }

    /// Loads `<platform config dir>/memlease/config.toml` if it exists.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = Self::default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from_file(&path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
            Self::default()
        })
    }

    /// Returns the platform config file location.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("memlease").join("config.toml"))
    }

    /// Converts a `ConfigFile` to `MemleaseConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = expand_home(&data_dir);
        }
        if let Some(retrieval) = file.retrieval {
            if let Some(v) = retrieval.similarity_threshold {
                config.retrieval.similarity_threshold = v;
            }
            if let Some(v) = retrieval.default_limit {
                config.retrieval.default_limit = v;
            }
            if let Some(v) = retrieval.max_limit {
                config.retrieval.max_limit = v;
            }
            if let Some(v) = retrieval.candidate_multiplier {
                config.retrieval.candidate_multiplier = v;
            }
        }
        if let Some(vector) = file.vector {
            if let Some(backend) = vector.backend {
                config.vector.backend = parse_or_keep(
                    "vector.backend",
                    &backend,
                    VectorBackend::parse,
                    config.vector.backend,
                );
            }
            if let Some(v) = vector.dimensions {
                config.vector.dimensions = v;
            }
            if let Some(v) = vector.url {
                config.vector.url = v;
            }
            config.vector.api_key = vector.api_key.as_deref().and_then(resolve_secret);
            if let Some(v) = vector.collection {
                config.vector.collection = v;
            }
            if let Some(v) = vector.max_chunk_chars {
                config.vector.max_chunk_chars = v;
            }
        }
        if let Some(cache) = file.cache {
            if let Some(backend) = cache.backend {
                config.cache.backend = parse_or_keep(
                    "cache.backend",
                    &backend,
                    CacheKind::parse,
                    config.cache.backend,
                );
            }
            if let Some(v) = cache.capacity {
                config.cache.capacity = v;
            }
            if let Some(v) = cache.url {
                config.cache.url = v;
            }
        }
        if let Some(ledger) = file.ledger {
            if let Some(backend) = ledger.backend {
                config.ledger.backend = parse_or_keep(
                    "ledger.backend",
                    &backend,
                    LedgerBackend::parse,
                    config.ledger.backend,
                );
            }
            if let Some(v) = ledger.endpoint {
                config.ledger.endpoint = v;
            }
            config.ledger.api_key = ledger.api_key.as_deref().and_then(resolve_secret);
            if let Some(v) = ledger.timeout_ms {
                config.ledger.timeout_ms = v;
            }
        }
        if let Some(embedding) = file.embedding {
            if let Some(backend) = embedding.backend {
                config.embedding.backend = parse_or_keep(
                    "embedding.backend",
                    &backend,
                    EmbeddingBackend::parse,
                    config.embedding.backend,
                );
            }
            if let Some(v) = embedding.endpoint {
                config.embedding.endpoint = v;
            }
            config.embedding.api_key = embedding.api_key.as_deref().and_then(resolve_secret);
            if let Some(v) = embedding.timeout_ms {
                config.embedding.timeout_ms = v;
            }
        }
        if let Some(resilience) = file.resilience {
            config.resilience = resilience;
        }
        if let Some(logging) = file.logging {
            if let Some(format) = logging.format {
                config.logging.format = parse_or_keep(
                    "logging.format",
                    &format,
                    LogFormat::parse,
                    config.logging.format,
                );
            }
            if let Some(v) = logging.level {
                config.logging.level = v;
            }
            config.logging.file = logging.file.map(|f| expand_home(&f));
        }
        if let Some(metrics) = file.metrics {
            if let Some(v) = metrics.enabled {
                config.metrics.enabled = v;
            }
            config.metrics.push_gateway = metrics.push_gateway;
        }

        config
    }

    /// Applies `MEMLEASE_*` overrides read through `lookup`.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: &impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("MEMLEASE_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.data_dir = expand_home(&v);
        }
        if let Some(v) = parse_override::<f32>(lookup, "MEMLEASE_SIMILARITY_THRESHOLD") {
            self.retrieval.similarity_threshold = v;
        }
        if let Some(v) = lookup("MEMLEASE_VECTOR_BACKEND") {
            self.vector.backend = parse_or_keep(
                "MEMLEASE_VECTOR_BACKEND",
                &v,
                VectorBackend::parse,
                self.vector.backend,
            );
        }
        if let Some(v) = lookup("MEMLEASE_VECTOR_URL") {
            self.vector.url = v;
        }
        if let Some(v) = lookup("MEMLEASE_CACHE_BACKEND") {
            self.cache.backend = parse_or_keep(
                "MEMLEASE_CACHE_BACKEND",
                &v,
                CacheKind::parse,
                self.cache.backend,
            );
        }
        if let Some(v) = lookup("MEMLEASE_REDIS_URL") {
            self.cache.url = v;
        }
        if let Some(v) = lookup("MEMLEASE_LEDGER_BACKEND") {
            self.ledger.backend = parse_or_keep(
                "MEMLEASE_LEDGER_BACKEND",
                &v,
                LedgerBackend::parse,
                self.ledger.backend,
            );
        }
        if let Some(v) = lookup("MEMLEASE_LEDGER_ENDPOINT") {
            self.ledger.endpoint = v;
        }
        if let Some(v) = lookup("MEMLEASE_LEDGER_API_KEY").filter(|v| !v.is_empty()) {
            self.ledger.api_key = Some(SecretString::from(v));
        }
        if let Some(v) = lookup("MEMLEASE_EMBEDDING_BACKEND") {
            self.embedding.backend = parse_or_keep(
                "MEMLEASE_EMBEDDING_BACKEND",
                &v,
                EmbeddingBackend::parse,
                self.embedding.backend,
            );
        }
        if let Some(v) = lookup("MEMLEASE_EMBEDDING_ENDPOINT") {
            self.embedding.endpoint = v;
        }
        if let Some(v) = lookup("MEMLEASE_EMBEDDING_API_KEY").filter(|v| !v.is_empty()) {
            self.embedding.api_key = Some(SecretString::from(v));
        }
        if let Some(v) = lookup("MEMLEASE_LOG_FORMAT") {
            self.logging.format = parse_or_keep(
                "MEMLEASE_LOG_FORMAT",
                &v,
                LogFormat::parse,
                self.logging.format,
            );
        }
        if let Some(v) = lookup("MEMLEASE_LOG").filter(|v| !v.trim().is_empty()) {
            self.logging.level = v;
        }
        if let Some(v) = parse_override::<bool>(lookup, "MEMLEASE_METRICS_ENABLED") {
            self.metrics.enabled = v;
        }
        if let Some(v) = lookup("MEMLEASE_METRICS_PUSH_GATEWAY").filter(|v| !v.is_empty()) {
            self.metrics.push_gateway = Some(v);
        }
        self.resilience = self.resilience.with_env_overrides(lookup);
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.retrieval.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidInput(format!(
                "similarity_threshold must be within [-1, 1], got {threshold}"
            )));
        }
        let retrieval = &self.retrieval;
        if retrieval.default_limit == 0 || retrieval.default_limit > retrieval.max_limit {
            return Err(Error::InvalidInput(format!(
                "default_limit must be within 1..={}, got {}",
                self.retrieval.max_limit, self.retrieval.default_limit
            )));
        }
        if self.retrieval.candidate_multiplier == 0 {
            return Err(Error::InvalidInput(
                "candidate_multiplier must be at least 1".to_string(),
            ));
        }
        if self.vector.dimensions == 0 {
            return Err(Error::InvalidInput(
                "vector dimensions must be positive".to_string(),
            ));
        }
        if self.vector.max_chunk_chars == 0 {
            return Err(Error::InvalidInput(
                "max_chunk_chars must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the `SQLite` database.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("memlease.db")
    }

    /// Path of the local ledger journal.
    #[must_use]
    pub fn ledger_journal_path(&self) -> PathBuf {
        self.data_dir.join("ledger.jsonl")
    }

    /// Path of the flat vector index snapshot.
    #[must_use]
    pub fn vector_snapshot_path(&self) -> PathBuf {
        self.data_dir.join("vectors.json")
    }
}

/// Parses an override variable, warning on invalid values.
pub(crate) fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring invalid environment override");
            None
        },
    }
}

fn parse_or_keep<T: Copy>(name: &str, raw: &str, parse: fn(&str) -> Option<T>, current: T) -> T {
    parse(raw).unwrap_or_else(|| {
        tracing::warn!(setting = name, value = %raw, "Ignoring unknown backend");
        current
    })
}

/// Resolves `${VAR}` references; literal values pass through.
fn resolve_secret(raw: &str) -> Option<SecretString> {
    let value = match raw.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
        Some(var) => std::env::var(var).ok()?,
        None => raw.to_string(),
    };
    (!value.is_empty()).then(|| SecretString::from(value))
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(raw)
}
