use clap::{Args, ValueEnum};
use pdf_chat_core::IngestionOptions;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is not a valid url: {source}")]
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VectorBackend {
    Qdrant,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingBackend {
    Openai,
    Local,
}

/// Raw settings as read from flags, environment and `.env`.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Shared secret expected in the PDF-CHAT-API-KEY header
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Address the HTTP gateway binds to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: String,

    /// Directory for uploads awaiting indexing
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploaded_pdfs")]
    pub upload_dir: PathBuf,

    /// Largest accepted upload in bytes
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = MAX_FILE_SIZE)]
    pub max_file_size: usize,

    /// Vector store backend
    #[arg(long, env = "VECTOR_STORE", value_enum, default_value_t = VectorBackend::Qdrant)]
    pub vector_store: VectorBackend,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    pub qdrant_url: String,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,

    /// Collection replaced on every ingest
    #[arg(long, env = "COLLECTION_NAME", default_value = "pdf_chat")]
    pub collection_name: String,

    /// Embedding backend
    #[arg(long, env = "EMBEDDING_PROVIDER", value_enum, default_value_t = EmbeddingBackend::Openai)]
    pub embedding_provider: EmbeddingBackend,

    /// Embedding model identifier
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "openai/text-embedding-3-small")]
    pub embedding_model: String,

    /// Vector size produced by the embedding model
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = 1536)]
    pub embedding_dimensions: usize,

    /// OpenAI-compatible API base used for embeddings and chat
    #[arg(long, env = "LLM_BASE_URL", default_value = "https://openrouter.ai/api/v1")]
    pub llm_base_url: String,

    /// Bearer key for the model API
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Chat model identifier
    #[arg(long, env = "CHAT_MODEL", default_value = "upstage/solar-pro-3:free")]
    pub chat_model: String,

    /// Sampling temperature
    #[arg(long, env = "TEMPERATURE", default_value_t = 0.2)]
    pub temperature: f32,

    /// Chunks retrieved per question
    #[arg(long, env = "RETRIEVAL_TOP_K", default_value_t = 4)]
    pub top_k: usize,

    /// Target chunk size in characters
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 1000)]
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks
    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = 200)]
    pub chunk_overlap: usize,

    /// Timeout for embedding, vector store and model calls
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Oldest turns are evicted beyond this many per session; unset keeps everything
    #[arg(long, env = "MAX_TURNS_PER_SESSION")]
    pub max_turns_per_session: Option<usize>,

    #[arg(long, env = "INGEST_RATE_PER_MINUTE", default_value_t = 5)]
    pub ingest_rate_per_minute: u32,

    #[arg(long, env = "CHAT_RATE_PER_MINUTE", default_value_t = 30)]
    pub chat_rate_per_minute: u32,

    #[arg(long, env = "STREAM_RATE_PER_MINUTE", default_value_t = 20)]
    pub stream_rate_per_minute: u32,

    #[arg(long, env = "SESSION_RATE_PER_MINUTE", default_value_t = 20)]
    pub session_rate_per_minute: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub ingest: NonZeroU32,
    pub chat: NonZeroU32,
    pub stream: NonZeroU32,
    pub session: NonZeroU32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ingest: NonZeroU32::MIN.saturating_add(4),
            chat: NonZeroU32::MIN.saturating_add(29),
            stream: NonZeroU32::MIN.saturating_add(19),
            session: NonZeroU32::MIN.saturating_add(19),
        }
    }
}

/// Validated configuration, assembled once at startup and handed to components.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub bind_addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub max_file_size: usize,
    pub vector_store: VectorBackend,
    pub qdrant_url: Url,
    pub qdrant_api_key: Option<String>,
    pub collection_name: String,
    pub embedding_provider: EmbeddingBackend,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub llm_base_url: Url,
    pub llm_api_key: Option<String>,
    pub chat_model: String,
    pub temperature: f32,
    pub top_k: usize,
    pub ingestion: IngestionOptions,
    pub request_timeout: Duration,
    pub max_turns_per_session: Option<usize>,
    pub rate_limits: RateLimitConfig,
}

impl AppConfig {
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        let bind_addr = settings
            .bind_addr
            .parse::<SocketAddr>()
            .map_err(|error| ConfigError::Invalid(format!("BIND_ADDR: {error}")))?;
        let qdrant_url = Url::parse(&settings.qdrant_url).map_err(|source| {
            ConfigError::InvalidUrl {
                name: "QDRANT_URL",
                source,
            }
        })?;
        let llm_base_url = Url::parse(&settings.llm_base_url).map_err(|source| {
            ConfigError::InvalidUrl {
                name: "LLM_BASE_URL",
                source,
            }
        })?;

        if settings.max_file_size == 0 {
            return Err(ConfigError::Invalid("MAX_FILE_SIZE must be positive".to_string()));
        }
        if settings.collection_name.trim().is_empty() {
            return Err(ConfigError::Missing("COLLECTION_NAME"));
        }
        if settings.embedding_dimensions == 0 {
            return Err(ConfigError::Invalid(
                "EMBEDDING_DIMENSIONS must be positive".to_string(),
            ));
        }
        if settings.top_k == 0 {
            return Err(ConfigError::Invalid("RETRIEVAL_TOP_K must be positive".to_string()));
        }
        if settings.chunk_size == 0 || settings.chunk_overlap >= settings.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "CHUNK_OVERLAP ({}) must be smaller than a positive CHUNK_SIZE ({})",
                settings.chunk_overlap, settings.chunk_size
            )));
        }
        if !(0.0..=2.0).contains(&settings.temperature) {
            return Err(ConfigError::Invalid(format!(
                "TEMPERATURE {} is outside 0.0..=2.0",
                settings.temperature
            )));
        }
        if settings.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "REQUEST_TIMEOUT_SECS must be positive".to_string(),
            ));
        }

        let rate = |name: &str, value: u32| {
            NonZeroU32::new(value)
                .ok_or_else(|| ConfigError::Invalid(format!("{name} must be positive")))
        };
        let rate_limits = RateLimitConfig {
            ingest: rate("INGEST_RATE_PER_MINUTE", settings.ingest_rate_per_minute)?,
            chat: rate("CHAT_RATE_PER_MINUTE", settings.chat_rate_per_minute)?,
            stream: rate("STREAM_RATE_PER_MINUTE", settings.stream_rate_per_minute)?,
            session: rate("SESSION_RATE_PER_MINUTE", settings.session_rate_per_minute)?,
        };

        Ok(Self {
            api_key: non_blank(settings.api_key),
            bind_addr,
            upload_dir: settings.upload_dir,
            max_file_size: settings.max_file_size,
            vector_store: settings.vector_store,
            qdrant_url,
            qdrant_api_key: non_blank(settings.qdrant_api_key),
            collection_name: settings.collection_name,
            embedding_provider: settings.embedding_provider,
            embedding_model: settings.embedding_model,
            embedding_dimensions: settings.embedding_dimensions,
            llm_base_url,
            llm_api_key: non_blank(settings.llm_api_key),
            chat_model: settings.chat_model,
            temperature: settings.temperature,
            top_k: settings.top_k,
            ingestion: IngestionOptions {
                chunk_size: settings.chunk_size,
                chunk_overlap: settings.chunk_overlap,
            },
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            max_turns_per_session: settings.max_turns_per_session,
            rate_limits,
        })
    }

    /// The gateway refuses to start without a shared secret.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::Missing("API_KEY"))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
