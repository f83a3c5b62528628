//! Tuning constants and environment-driven settings.
//!
//! Non-secret tuning values are plain `pub const`s next to the modules that
//! use them. Secrets and per-deployment endpoints are read once at startup
//! into [`Settings`].

use crate::error::AppError;
use std::env;

// Text chunker (§4.2).
pub const DEFAULT_CHUNK_SIZE: usize = 1500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

// Source fetcher (§4.1).
pub const DEFAULT_FETCH_CONCURRENCY: usize = 5;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

// Embeddings / vector store (§4.4, §6).
pub const EMBEDDING_DIM: usize = 1536;
pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const AGENT_KNOWLEDGE_BASE_COLLECTION: &str = "agent_knowledge_base";
pub const AGENT_WEB_CATALOG_COLLECTION: &str = "agent_web_catalog";

// Retrieval Engine (§4.5).
pub const WEB_CATALOG_LIMIT: usize = 10;
pub const SOURCE_BASED_KNOWLEDGE_LIMIT: usize = 15;
pub const DIRECT_KNOWLEDGE_LIMIT: usize = 15;

// Chat Orchestrator (§4.6).
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const MAX_HISTORY_LIMIT: usize = 50;

// Caching (§5).
pub const OWNER_CACHE_TTL_SECS: u64 = 60 * 60 * 24 * 3;

/// Environment-driven settings read once at process start.
///
/// All fields are required per §6 unless noted; missing required values
/// fail fast with a `Validation` error rather than panicking inside a
/// request handler.
#[derive(Clone, Debug)]
pub struct Settings {
    pub database_uri: String,
    pub database_name: String,
    pub cache_host: String,
    pub cache_port: u16,
    pub cache_db: u8,
    pub vector_db_endpoint: String,
    pub vector_db_api_key: String,
    pub object_store_bucket: String,
    pub object_store_region: String,
    pub llm_api_key: String,
    pub token_signing_secret: String,
    pub admin_passkey: String,
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub environment: String,
    pub create_indexes_on_startup: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            database_uri: required("DATABASE_URI")?,
            database_name: required("DATABASE_NAME")?,
            cache_host: env::var("CACHE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            cache_port: optional_parse("CACHE_PORT", 6379)?,
            cache_db: optional_parse("CACHE_DB", 0)?,
            vector_db_endpoint: required("VECTOR_DB_ENDPOINT")?,
            vector_db_api_key: required("VECTOR_DB_API_KEY")?,
            object_store_bucket: env::var("OBJECT_STORE_BUCKET").unwrap_or_default(),
            object_store_region: env::var("OBJECT_STORE_REGION").unwrap_or_default(),
            llm_api_key: required("LLM_API_KEY")?,
            token_signing_secret: required("TOKEN_SIGNING_SECRET")?,
            admin_passkey: required("ADMIN_PASSKEY")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: optional_parse("PORT", 8080)?,
            workers: optional_parse("WORKERS", 4)?,
            environment: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            create_indexes_on_startup: env::var("CREATE_INDEXES_ON_STARTUP")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
        })
    }
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::Validation(format!("missing required environment variable {key}")))
}

fn optional_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| AppError::Validation(format!("invalid value for environment variable {key}"))),
        Err(_) => Ok(default),
    }
}

/// LLM family: reasoning models ignore `temperature`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelMode {
    Reasoning,
    NonReasoning,
}

/// Closed registry of supported LLM models, mirroring the fixed mapping the
/// source treats as configuration rather than as a pluggable handler chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmModel {
    Gpt4oMini,
    Gpt4o,
    Gpt41Mini,
    Gpt41Nano,
    O3Mini,
}

pub const DEFAULT_MODEL: LlmModel = LlmModel::Gpt4oMini;

impl LlmModel {
    pub fn name(self) -> &'static str {
        match self {
            LlmModel::Gpt4oMini => "gpt-4o-mini",
            LlmModel::Gpt4o => "gpt-4o",
            LlmModel::Gpt41Mini => "gpt-4.1-mini",
            LlmModel::Gpt41Nano => "gpt-4.1-nano",
            LlmModel::O3Mini => "o3-mini",
        }
    }

    pub fn mode(self) -> ModelMode {
        match self {
            LlmModel::O3Mini => ModelMode::Reasoning,
            _ => ModelMode::NonReasoning,
        }
    }

    /// Resolve a model name to a registry entry, falling back to the
    /// configured default for unknown names rather than erroring — an
    /// agent configured with a retired model name must still be able to chat.
    pub fn resolve(name: &str) -> LlmModel {
        match name {
            "gpt-4o-mini" => LlmModel::Gpt4oMini,
            "gpt-4o" => LlmModel::Gpt4o,
            "gpt-4.1-mini" => LlmModel::Gpt41Mini,
            "gpt-4.1-nano" => LlmModel::Gpt41Nano,
            "o3-mini" => LlmModel::O3Mini,
            _ => {
                tracing::warn!(model = name, "unknown model name, falling back to default");
                DEFAULT_MODEL
            }
        }
    }
}
