use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Open the database without file locking. Needed on network shares that
    /// do not support byte-range locks.
    #[serde(default)]
    pub nolock: bool,
}

fn default_connect_retries() -> u32 {
    5
}
fn default_retry_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_index_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Accepted for compatibility; chunk overlap is fixed by the half-split rule.
    #[serde(default = "default_overlap")]
    #[allow(dead_code)]
    pub overlap_tokens: usize,
    #[serde(default)]
    pub noise_keywords: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            noise_keywords: Vec::new(),
        }
    }
}

fn default_max_tokens() -> usize {
    1500
}
fn default_overlap() -> usize {
    250
}

/// Embedding backends chatmem knows how to talk to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Disabled,
    Ollama,
    OpenAI,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
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
            provider: EmbeddingProviderKind::Disabled,
            model: None,
            url: None,
            batch_size: 32,
            max_retries: 3,
            timeout_secs: 60,
        }
    }
}

fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != EmbeddingProviderKind::Disabled
    }

    /// The embedding version recorded alongside every vector.
    pub fn version(&self) -> &str {
        self.model.as_deref().unwrap_or("disabled")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Minutes between automatic sync runs; 0 disables auto-sync.
    #[serde(default = "default_interval_mins")]
    pub interval_mins: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_mins: default_interval_mins(),
        }
    }
}

fn default_interval_mins() -> u64 {
    30
}

impl Config {
    /// A config rooted in `data_dir` with embeddings disabled. Used by tests
    /// and as the base for programmatic setups.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: data_dir.join("chatmem.sqlite"),
                connect_retries: default_connect_retries(),
                retry_backoff_ms: default_retry_backoff_ms(),
                nolock: false,
            },
            index: IndexConfig {
                path: data_dir.join("index.sqlite"),
                timeout_secs: default_index_timeout_secs(),
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.db.connect_retries == 0 {
        anyhow::bail!("db.connect_retries must be > 0");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{:?}'",
            config.embedding.provider
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse(
            r#"
            [db]
            path = "/tmp/chatmem.sqlite"

            [index]
            path = "/tmp/index.sqlite"
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.max_tokens, 1500);
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.index.timeout_secs, 15);
        assert_eq!(config.db.connect_retries, 5);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.scheduler.interval_mins, 30);
    }

    #[test]
    fn test_provider_requires_model() {
        let err = parse(
            r#"
            [db]
            path = "a.sqlite"
            [index]
            path = "b.sqlite"
            [embedding]
            provider = "ollama"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = parse(
            r#"
            [db]
            path = "a.sqlite"
            [index]
            path = "b.sqlite"
            [embedding]
            provider = "word2vec"
            model = "x"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_noise_keywords_and_provider() {
        let config = parse(
            r#"
            [db]
            path = "a.sqlite"
            [index]
            path = "b.sqlite"
            [chunking]
            max_tokens = 800
            noise_keywords = ["joined the group", "pinned a message"]
            [embedding]
            provider = "openai"
            model = "text-embedding-3-small"
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.noise_keywords.len(), 2);
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::OpenAI);
        assert_eq!(config.embedding.version(), "text-embedding-3-small");
    }

    #[test]
    fn test_zero_max_tokens_rejected() {
        let result = parse(
            r#"
            [db]
            path = "a.sqlite"
            [index]
            path = "b.sqlite"
            [chunking]
            max_tokens = 0
            "#,
        );
        assert!(result.is_err());
    }
}
