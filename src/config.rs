//! Configuration for the impmail engine
//!
//! Every threshold the classifier, ranker and digest engine use is a named,
//! overridable value. Configuration is layered: built-in defaults, then an
//! optional TOML file, then `IMPMAIL__SECTION__KEY` environment variables.

use crate::error::{ImpMailError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpMailConfig {
    pub classifier: ClassifierConfig,
    pub ranking: RankingConfig,
    pub digest: DigestConfig,
    pub preferences: PreferenceConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub sweep: SweepConfig,
    pub vector_store: VectorStoreConfig,
    pub cache: CacheConfig,
}

/// Thresholds and pacing for the tiered classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Similarity at or above which an email is important without escalation
    pub high_threshold: f32,

    /// Similarity at or below which an email is not important without escalation
    pub low_threshold: f32,

    /// Prototype/LLM decisions below this confidence are flagged for review
    pub review_cutoff: f32,

    /// Confidence assigned to keyword fallback decisions
    pub fallback_confidence: f32,

    /// Emails per batched LLM call
    pub llm_batch_size: usize,

    /// Pause between batched LLM calls
    #[serde(with = "serde_duration_millis")]
    pub llm_batch_delay: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.80,
            low_threshold: 0.60,
            review_cutoff: 0.5,
            fallback_confidence: 0.3,
            llm_batch_size: 10,
            llm_batch_delay: Duration::from_millis(1000),
        }
    }
}

/// Limits for the similarity ranker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// k for the k-NN candidate pool used by top-similar
    pub candidate_pool: usize,

    /// Most recent emails considered by prototype scores
    pub scan_limit: usize,

    /// Result size when the caller does not pass one
    pub default_limit: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            candidate_pool: 500,
            scan_limit: 2000,
            default_limit: 20,
        }
    }
}

/// Digest window and selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Window length when the user has never received a digest
    pub window_hours: i64,

    /// Minimum similarity for a thread to enter the digest
    pub threshold: f32,

    /// Threads kept when nothing passes the threshold
    pub min_items: usize,

    /// Cap on emails fetched from the window
    pub max_emails: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            threshold: 0.6,
            min_items: 3,
            max_emails: 200,
        }
    }
}

/// Dual-centroid preference classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceConfig {
    /// Minimum liked and minimum disliked selections
    pub min_examples: usize,

    /// Margin beyond which a preference label is assigned
    pub margin_threshold: f32,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            min_examples: 5,
            margin_threshold: 0.05,
        }
    }
}

/// Which embedding gateway to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Deterministic feature hashing, no network
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint
    Remote,
    /// fastembed model (requires the `local-embeddings` feature)
    Local,
}

/// Embedding gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub dimensions: usize,

    /// Input is silently truncated to this many characters before embedding
    pub max_input_chars: usize,

    /// Model cache directory for local embeddings
    pub cache_dir: PathBuf,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: env::var("IMPMAIL_EMBEDDING_API_KEY").unwrap_or_default(),
            dimensions: 384,
            max_input_chars: 8000,
            cache_dir: PathBuf::from(".fastembed_cache"),
        }
    }
}

/// LLM classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Disable the LLM tier entirely
    pub enabled: bool,

    /// Anthropic API key
    pub api_key: String,

    /// Model to use
    pub model: String,

    pub base_url: String,

    /// Max tokens for responses
    pub max_tokens: usize,

    /// Temperature for sampling
    pub temperature: f32,

    /// Email bodies are truncated to this many characters before prompting
    pub max_body_chars: usize,

    #[serde(with = "serde_duration_millis")]
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: env::var("IMPMAIL_LLM_API_KEY")
                .or_else(|_| env::var("ANTHROPIC_API_KEY"))
                .unwrap_or_default(),
            model: "claude-3-5-haiku-20241022".to_string(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            max_body_chars: 2000,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Incremental classification sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Emails classified per batch
    pub batch_size: usize,

    /// Cap on unclassified emails selected per pass
    pub max_per_pass: usize,

    /// Pause between passes when running continuously
    #[serde(with = "serde_duration_millis")]
    pub interval: Duration,

    /// Emails from a failed batch are skipped until this much time has passed
    #[serde(with = "serde_duration_millis")]
    pub retry_failed_after: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_per_pass: 1000,
            interval: Duration::from_secs(60),
            retry_failed_after: Duration::from_secs(3600),
        }
    }
}

/// Vector store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorStoreBackend {
    Memory,
    Sqlite,
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub backend: VectorStoreBackend,
    pub path: PathBuf,
    pub pool_size: usize,

    /// Cap on vectors returned by a fetch-all-for-user scan
    pub user_scan_cap: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorStoreBackend::Memory,
            path: PathBuf::from("impmail_vectors.db"),
            pool_size: 8,
            user_scan_cap: 10_000,
        }
    }
}

/// Prototype cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub prototype_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prototype_capacity: 128,
        }
    }
}

impl ImpMailConfig {
    /// Load configuration from an optional TOML file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(config::Environment::with_prefix("IMPMAIL").separator("__"));

        let config: ImpMailConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: ImpMailConfig = toml::from_str(toml_str)
            .map_err(|e| ImpMailError::Config(config::ConfigError::Message(e.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let c = &self.classifier;
        for (name, value) in [
            ("classifier.high_threshold", c.high_threshold),
            ("classifier.low_threshold", c.low_threshold),
            ("digest.threshold", self.digest.threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(invalid(format!("{} must be within [-1, 1]", name)));
            }
        }

        if c.low_threshold >= c.high_threshold {
            return Err(invalid(
                "classifier.low_threshold must be below classifier.high_threshold".to_string(),
            ));
        }

        for (name, value) in [
            ("classifier.review_cutoff", c.review_cutoff),
            ("classifier.fallback_confidence", c.fallback_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{} must be within [0, 1]", name)));
            }
        }

        for (name, value) in [
            ("classifier.llm_batch_size", c.llm_batch_size),
            ("ranking.candidate_pool", self.ranking.candidate_pool),
            ("ranking.scan_limit", self.ranking.scan_limit),
            ("ranking.default_limit", self.ranking.default_limit),
            ("digest.max_emails", self.digest.max_emails),
            ("preferences.min_examples", self.preferences.min_examples),
            ("sweep.batch_size", self.sweep.batch_size),
            ("vector_store.pool_size", self.vector_store.pool_size),
            ("vector_store.user_scan_cap", self.vector_store.user_scan_cap),
            ("cache.prototype_capacity", self.cache.prototype_capacity),
            ("embedding.max_input_chars", self.embedding.max_input_chars),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be greater than 0", name)));
            }
        }

        if self.digest.window_hours <= 0 {
            return Err(invalid("digest.window_hours must be positive".to_string()));
        }

        if !(0.0..=1.0).contains(&self.preferences.margin_threshold) {
            return Err(invalid(
                "preferences.margin_threshold must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

fn invalid(message: String) -> ImpMailError {
    ImpMailError::Config(config::ConfigError::Message(message))
}

// Durations serialize as milliseconds
mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
