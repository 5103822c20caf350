use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub layout: LayoutConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory holding the blob containers.
    pub root: PathBuf,
    #[serde(default = "default_upload_container")]
    pub upload_container: String,
    #[serde(default = "default_chunk_container")]
    pub chunk_container: String,
    #[serde(default = "default_artifact_container")]
    pub artifact_container: String,
    /// Key for signing short-lived read URLs.
    pub signing_key: String,
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: i64,
    /// Maximum names per batch-delete call.
    #[serde(default = "default_delete_batch_max")]
    pub delete_batch_max: usize,
}

fn default_upload_container() -> String {
    "uploads".to_string()
}
fn default_chunk_container() -> String {
    "chunks".to_string()
}
fn default_artifact_container() -> String {
    "artifacts".to_string()
}
fn default_signed_url_ttl() -> i64 {
    3600
}
fn default_delete_batch_max() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Seconds a received message stays invisible before redelivery.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

fn default_visibility_timeout() -> i64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    /// Minimum fraction of tokens that must be dictionary words for a text
    /// element to be included in a chunk.
    #[serde(default = "default_real_word_threshold")]
    pub real_word_threshold: f64,
    /// Optional newline-separated word list supplementing the built-in
    /// dictionary.
    #[serde(default)]
    pub dictionary_path: Option<PathBuf>,
}

fn default_target_tokens() -> usize {
    750
}
fn default_real_word_threshold() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Bounds of the randomized enqueue delay spreading bulk-upload fan-out.
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: i64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: default_min_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

fn default_min_delay() -> i64 {
    1
}
fn default_max_delay() -> i64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LayoutConfig {
    /// Base URL of the layout-analysis service.
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Fixed delay before the first poll, giving the service a head start.
    #[serde(default = "default_head_start")]
    pub poll_head_start_secs: i64,
    /// Backoff factor K in `rand(K·n, K·n²)`.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor_secs: i64,
    #[serde(default = "default_max_submit_retries")]
    pub max_submit_retries: u32,
    #[serde(default = "default_max_poll_retries")]
    pub max_poll_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_head_start() -> i64 {
    60
}
fn default_backoff_factor() -> i64 {
    30
}
fn default_max_submit_retries() -> u32 {
    10
}
fn default_max_poll_retries() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranslationConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    /// Maximum characters of chunk content fed to language detection.
    #[serde(default = "default_detect_prefix_chars")]
    pub detect_prefix_chars: usize,
    #[serde(default = "default_enrich_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor_secs: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            target_language: default_target_language(),
            detect_prefix_chars: default_detect_prefix_chars(),
            max_retries: default_enrich_retries(),
            backoff_factor_secs: default_backoff_factor(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_target_language() -> String {
    "en".to_string()
}
fn default_detect_prefix_chars() -> usize {
    4096
}
fn default_enrich_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Whether the configured region supports caption models. When false,
    /// analysis degrades to objects/tags/OCR only.
    #[serde(default = "default_true")]
    pub captions_supported: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            captions_supported: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            endpoint: None,
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SearchConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_index_name")]
    pub index: String,
    #[serde(default = "default_upload_batch_size")]
    pub upload_batch_size: usize,
}

fn default_index_name() -> String {
    "chunks".to_string()
}
fn default_upload_batch_size() -> usize {
    500
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl SearchConfig {
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}

impl TranslationConfig {
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.target_tokens == 0 {
        anyhow::bail!("chunking.target_tokens must be > 0");
    }

    if !(0.0..=1.0).contains(&config.chunking.real_word_threshold) {
        anyhow::bail!("chunking.real_word_threshold must be in [0.0, 1.0]");
    }

    if config.dispatch.min_delay_secs < 0
        || config.dispatch.max_delay_secs < config.dispatch.min_delay_secs
    {
        anyhow::bail!("dispatch delay bounds must satisfy 0 <= min <= max");
    }

    if config.storage.signing_key.is_empty() {
        anyhow::bail!("storage.signing_key must not be empty");
    }

    if config.storage.delete_batch_max == 0 {
        anyhow::bail!("storage.delete_batch_max must be > 0");
    }

    if config.layout.backoff_factor_secs < 1 {
        anyhow::bail!("layout.backoff_factor_secs must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
