//! TOML configuration parsing and validation.
//!
//! Docs Assistant is configured via a TOML file (default:
//! `config/docs-assistant.toml`). Only `[db]` is required; every other
//! section falls back to defaults. API credentials are never read from the
//! file: the OpenAI clients take `OPENAI_API_KEY` from the environment.
//!
//! ```toml
//! [db]
//! path = "./data/docs.sqlite"
//!
//! [retrieval]
//! default_limit = 5
//! context_limit = 3
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-ada-002"
//! dims = 1536
//!
//! [completion]
//! provider = "openai"
//! model = "gpt-3.5-turbo"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docs_assistant_core::completion::GenerationParams;
use docs_assistant_core::orchestrator::OrchestratorSettings;
use docs_assistant_core::retriever::MAX_RESULTS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Result limit for search requests that don't specify one.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Documents retrieved as context for chat requests.
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    /// Minimum query length, in characters, accepted by the search endpoint.
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            context_limit: default_context_limit(),
            min_query_chars: default_min_query_chars(),
        }
    }
}

fn default_limit() -> usize {
    5
}
fn default_context_limit() -> usize {
    3
}
fn default_min_query_chars() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            api_base: default_api_base(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    /// Longest silence tolerated between two stream deltas.
    #[serde(default = "default_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_completion_model(),
            api_base: default_api_base(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_completion_timeout_secs(),
            stream_idle_timeout_secs: default_timeout_secs(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_completion_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_completion_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    /// Orchestrator settings derived from `[retrieval]` and `[completion]`.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            context_limit: self.retrieval.context_limit,
            generation: GenerationParams {
                temperature: self.completion.temperature,
                max_tokens: self.completion.max_tokens,
            },
        }
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check value ranges and provider names.
pub fn validate(config: &Config) -> Result<()> {
    let range = 1..=MAX_RESULTS;
    if !range.contains(&config.retrieval.default_limit) {
        bail!("retrieval.default_limit must be in [1, {}]", MAX_RESULTS);
    }
    if !range.contains(&config.retrieval.context_limit) {
        bail!("retrieval.context_limit must be in [1, {}]", MAX_RESULTS);
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.completion.temperature) {
        bail!("completion.temperature must be in [0.0, 2.0]");
    }
    if config.completion.max_tokens == 0 {
        bail!("completion.max_tokens must be > 0");
    }
    if config.completion.stream_idle_timeout_secs == 0 {
        bail!("completion.stream_idle_timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let config: Config = toml::from_str(&format!(
            "[db]\npath = \"/tmp/docs.sqlite\"\n{}",
            extra
        ))?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.retrieval.default_limit, 5);
        assert_eq!(config.retrieval.context_limit, 3);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.completion.model, "gpt-3.5-turbo");
        assert_eq!(config.server.bind, "127.0.0.1:8080");

        let settings = config.orchestrator_settings();
        assert_eq!(settings.context_limit, 3);
        assert_eq!(settings.generation.max_tokens, 1000);
    }

    #[test]
    fn test_limits_validated() {
        assert!(parse("[retrieval]\ncontext_limit = 0").is_err());
        assert!(parse("[retrieval]\ndefault_limit = 11").is_err());
        assert!(parse("[retrieval]\ndefault_limit = 10").is_ok());
    }

    #[test]
    fn test_openai_embedding_requires_model_and_dims() {
        assert!(parse("[embedding]\nprovider = \"openai\"").is_err());
        assert!(parse("[embedding]\nprovider = \"openai\"\nmodel = \"m\"").is_err());
        assert!(parse("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8").is_ok());
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(parse("[embedding]\nprovider = \"local\"").is_err());
        assert!(parse("[completion]\nprovider = \"anthropic\"").is_err());
    }

    #[test]
    fn test_temperature_range() {
        assert!(parse("[completion]\ntemperature = 2.5").is_err());
        assert!(parse("[completion]\ntemperature = 0.0").is_ok());
    }
}
