use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::Document;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// JSON file holding an array of `{id, text}` documents.
    #[serde(default)]
    pub documents_path: Option<PathBuf>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl Config {
    /// All defaults; used by commands that can run without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }
}

/// Which flow `POST /api/chat` runs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    /// Raw question plus system prompt, with tools attached.
    #[default]
    Tools,
    /// Retrieve a context document and answer from it, no tools.
    Rag,
}

/// How the answer is delivered to the client.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// `text/plain` body relayed fragment by fragment.
    #[default]
    Stream,
    /// `application/json` body `{"answer": ...}`.
    Json,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStrategy {
    #[default]
    Keyword,
    Embedding,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub pipeline: Pipeline,
    #[serde(default)]
    pub response: ResponseMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            pipeline: Pipeline::default(),
            response: ResponseMode::default(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Human-readable provider name, used in the missing-key message.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            base_url: default_generation_base_url(),
            model: default_generation_model(),
            api_key_env: default_generation_key_env(),
            system_prompt: default_system_prompt(),
            max_steps: default_max_steps(),
            timeout_secs: default_generation_timeout_secs(),
            temperature: None,
        }
    }
}

impl GenerationConfig {
    pub fn credential(&self) -> Credential {
        Credential::Env(self.api_key_env.clone())
    }
}

fn default_generation_provider() -> String {
    "Mistral".to_string()
}
fn default_generation_base_url() -> String {
    "https://api.mistral.ai/v1".to_string()
}
fn default_generation_model() -> String {
    "mistral-large-latest".to_string()
}
fn default_generation_key_env() -> String {
    "MISTRAL_API_KEY".to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.\n\
     Always answer in a concise summary.\n\
     Maximum 3 lines only.\n\
     \n\
     If the user asks about weather or temperature,\n\
     you MUST call the getWeather tool.\n\
     Return only the tool result."
        .to_string()
}
fn default_max_steps() -> usize {
    3
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key_env: default_embedding_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn credential(&self) -> Credential {
        Credential::Env(self.api_key_env.clone())
    }
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub strategy: RetrievalStrategy,
    #[serde(default = "default_fallback_context")]
    pub fallback_context: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::default(),
            fallback_context: default_fallback_context(),
        }
    }
}

fn default_fallback_context() -> String {
    "Sorry, I have no information on this.".to_string()
}

/// Where an API key comes from.
///
/// Resolved on every use, so a key exported after startup is picked up and
/// a key that was never set is reported before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Read from the named environment variable.
    Env(String),
    /// Fixed value (or fixed absence), for embedding and tests.
    Static(Option<String>),
}

impl Credential {
    /// Returns the key, treating an empty or whitespace value as absent.
    pub fn resolve(&self) -> Option<String> {
        let value = match self {
            Credential::Env(name) => std::env::var(name).ok(),
            Credential::Static(value) => value.clone(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// Label used in error messages (the variable name, or `"static"`).
    pub fn source_name(&self) -> &str {
        match self {
            Credential::Env(name) => name,
            Credential::Static(_) => "static",
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

fn validate(config: &Config) -> Result<()> {
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    if config.generation.max_steps == 0 {
        anyhow::bail!("generation.max_steps must be >= 1");
    }
    if config.generation.timeout_secs == 0 {
        anyhow::bail!("generation.timeout_secs must be > 0");
    }
    if config.generation.model.trim().is_empty() {
        anyhow::bail!("generation.model must not be empty");
    }

    if config.embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }
    if config.embedding.model.trim().is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }

    if !config.documents.is_empty() && config.documents_path.is_some() {
        anyhow::bail!("set either [[documents]] or documents_path, not both");
    }

    Ok(())
}
