//! Runtime configuration for Courtside services.
//!
//! Every option the service understands is a named field on [`Settings`].
//! Options load from the process environment, or from a JSON file when
//! `COURTSIDE_CONFIG` points at one. Unknown keys are rejected at startup in
//! both cases, so a typo'd option fails loudly instead of silently falling
//! back to a default.

use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Environment variables the loader recognizes under the `COURTSIDE_` prefix.
const KNOWN_PREFIXED_KEYS: &[&str] = &["COURTSIDE_CONFIG", "COURTSIDE_APP_NAME"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Fully-resolved runtime settings.
///
/// Constructed once at startup in the composition root and shared by
/// reference; nothing reads the environment after load.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Display name injected into prompt templates.
    pub app_name: String,

    pub server_host: String,
    pub server_port: u16,

    /// Dimensionality of the embedding space; the loaded index must match.
    pub embedding_dim: usize,
    /// Opaque provider id for the embedding model.
    pub embedding_model: String,
    /// Opaque provider id for the chat model.
    pub chat_model: String,
    pub chat_temperature: f32,
    pub generation_max_tokens: u32,

    /// OpenAI-compatible provider endpoint.
    pub provider_base_url: String,
    pub provider_api_key: String,

    /// Conversation store connection string.
    pub database_url: String,
    /// Statistics store connection string; falls back to `database_url`.
    pub stats_database_url: String,
    pub stats_pool_size: u32,

    pub vector_matrix_path: String,
    pub vector_chunks_path: String,

    pub sql_timeout: Duration,
    pub sql_row_cap: usize,
    pub conversation_history_turns: usize,
    pub request_deadline: Duration,
    pub quality_threshold: f64,
    pub retrieval_oversample: usize,
}

/// On-disk form of [`Settings`]. Every field optional so a file may override
/// only part of the environment; unknown keys are a hard error.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    app_name: Option<String>,
    server_host: Option<String>,
    server_port: Option<u16>,
    embedding_dim: Option<usize>,
    embedding_model: Option<String>,
    chat_model: Option<String>,
    chat_temperature: Option<f32>,
    generation_max_tokens: Option<u32>,
    provider_base_url: Option<String>,
    provider_api_key: Option<String>,
    database_url: Option<String>,
    stats_database_url: Option<String>,
    stats_pool_size: Option<u32>,
    vector_matrix_path: Option<String>,
    vector_chunks_path: Option<String>,
    sql_timeout_ms: Option<u64>,
    sql_row_cap: Option<usize>,
    conversation_history_turns: Option<usize>,
    request_deadline_ms: Option<u64>,
    quality_threshold: Option<f64>,
    retrieval_oversample: Option<usize>,
}

impl Settings {
    /// Load settings from the environment, layering a JSON file on top when
    /// `COURTSIDE_CONFIG` is set. File values win over environment values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::reject_unknown_prefixed_vars()?;

        let file = match env::var("COURTSIDE_CONFIG") {
            Ok(path) => Self::read_file(&path)?,
            Err(_) => SettingsFile::default(),
        };

        Self::resolve(file)
    }

    /// Load settings from an explicit JSON file path, ignoring
    /// `COURTSIDE_CONFIG`.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::resolve(Self::read_file(path)?)
    }

    fn read_file(path: &str) -> Result<SettingsFile, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// A `COURTSIDE_`-prefixed variable the loader does not recognize is a
    /// startup error, not a silent no-op.
    fn reject_unknown_prefixed_vars() -> Result<(), ConfigError> {
        let known: HashSet<&str> = KNOWN_PREFIXED_KEYS.iter().copied().collect();
        for (key, _) in env::vars() {
            if key.starts_with("COURTSIDE_") && !known.contains(key.as_str()) {
                return Err(ConfigError::UnknownKey(key));
            }
        }
        Ok(())
    }

    fn resolve(file: SettingsFile) -> Result<Self, ConfigError> {
        let database_url = file
            .database_url
            .or_else(|| env::var("DATABASE_URL").ok())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let stats_database_url = file
            .stats_database_url
            .or_else(|| env::var("STATS_DATABASE_URL").ok())
            .unwrap_or_else(|| database_url.clone());

        let settings = Self {
            app_name: file
                .app_name
                .or_else(|| env::var("COURTSIDE_APP_NAME").ok())
                .unwrap_or_else(|| "Courtside".to_string()),
            server_host: file
                .server_host
                .or_else(|| env::var("SERVER_HOST").ok())
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: file
                .server_port
                .map(Ok)
                .unwrap_or_else(|| parse_env("SERVER_PORT", 8090))?,
            embedding_dim: file
                .embedding_dim
                .map(Ok)
                .unwrap_or_else(|| require_parsed("EMBEDDING_DIM"))?,
            embedding_model: file
                .embedding_model
                .or_else(|| env::var("EMBEDDING_MODEL").ok())
                .ok_or(ConfigError::Missing("EMBEDDING_MODEL"))?,
            chat_model: file
                .chat_model
                .or_else(|| env::var("CHAT_MODEL").ok())
                .ok_or(ConfigError::Missing("CHAT_MODEL"))?,
            chat_temperature: file
                .chat_temperature
                .map(Ok)
                .unwrap_or_else(|| parse_env("CHAT_TEMPERATURE", 0.1))?,
            generation_max_tokens: file
                .generation_max_tokens
                .map(Ok)
                .unwrap_or_else(|| parse_env("GENERATION_MAX_TOKENS", 2048))?,
            provider_base_url: file
                .provider_base_url
                .or_else(|| env::var("OPENAI_API_BASE").ok())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            provider_api_key: file
                .provider_api_key
                .or_else(|| env::var("OPENAI_API_KEY").ok())
                .ok_or(ConfigError::Missing("OPENAI_API_KEY"))?,
            database_url,
            stats_database_url,
            stats_pool_size: file
                .stats_pool_size
                .map(Ok)
                .unwrap_or_else(|| parse_env("STATS_POOL_SIZE", 8))?,
            vector_matrix_path: file
                .vector_matrix_path
                .or_else(|| env::var("VECTOR_MATRIX_PATH").ok())
                .ok_or(ConfigError::Missing("VECTOR_MATRIX_PATH"))?,
            vector_chunks_path: file
                .vector_chunks_path
                .or_else(|| env::var("VECTOR_CHUNKS_PATH").ok())
                .ok_or(ConfigError::Missing("VECTOR_CHUNKS_PATH"))?,
            sql_timeout: Duration::from_millis(
                file.sql_timeout_ms
                    .map(Ok)
                    .unwrap_or_else(|| parse_env("SQL_TIMEOUT_MS", 2_000))?,
            ),
            sql_row_cap: file
                .sql_row_cap
                .map(Ok)
                .unwrap_or_else(|| parse_env("SQL_ROW_CAP", 1_000))?,
            conversation_history_turns: file
                .conversation_history_turns
                .map(Ok)
                .unwrap_or_else(|| parse_env("CONVERSATION_HISTORY_TURNS", 5))?,
            request_deadline: Duration::from_millis(
                file.request_deadline_ms
                    .map(Ok)
                    .unwrap_or_else(|| parse_env("REQUEST_DEADLINE_MS", 60_000))?,
            ),
            quality_threshold: file
                .quality_threshold
                .map(Ok)
                .unwrap_or_else(|| parse_env("QUALITY_THRESHOLD", 0.5))?,
            retrieval_oversample: file
                .retrieval_oversample
                .map(Ok)
                .unwrap_or_else(|| parse_env("RETRIEVAL_OVERSAMPLE", 3))?,
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid {
                key: "EMBEDDING_DIM",
                message: "must be greater than zero".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.chat_temperature) {
            return Err(ConfigError::Invalid {
                key: "CHAT_TEMPERATURE",
                message: format!("{} outside [0, 2]", self.chat_temperature),
            });
        }
        if self.sql_row_cap == 0 {
            return Err(ConfigError::Invalid {
                key: "SQL_ROW_CAP",
                message: "must be greater than zero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(ConfigError::Invalid {
                key: "QUALITY_THRESHOLD",
                message: format!("{} outside [0, 1]", self.quality_threshold),
            });
        }
        if self.retrieval_oversample == 0 {
            return Err(ConfigError::Invalid {
                key: "RETRIEVAL_OVERSAMPLE",
                message: "must be greater than zero".into(),
            });
        }
        if self.stats_pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "STATS_POOL_SIZE",
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn require_parsed<T: std::str::FromStr>(key: &'static str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).map_err(|_| ConfigError::Missing(key))?;
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_file() -> SettingsFile {
        serde_json::from_str(
            r#"{
                "embedding_dim": 1536,
                "embedding_model": "text-embedding-3-small",
                "chat_model": "gpt-4o-mini",
                "provider_api_key": "sk-test",
                "database_url": "postgres://localhost/courtside",
                "vector_matrix_path": "index/vectors.bin",
                "vector_chunks_path": "index/chunks.json"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn file_settings_resolve_with_defaults() {
        let settings = Settings::resolve(full_file()).unwrap();
        assert_eq!(settings.app_name, "Courtside");
        assert_eq!(settings.embedding_dim, 1536);
        assert_eq!(settings.sql_timeout, Duration::from_millis(2_000));
        assert_eq!(settings.sql_row_cap, 1_000);
        assert_eq!(settings.conversation_history_turns, 5);
        assert_eq!(settings.request_deadline, Duration::from_millis(60_000));
        assert_eq!(settings.retrieval_oversample, 3);
        assert_eq!(settings.stats_pool_size, 8);
        // Stats store falls back to the conversation store URL.
        assert_eq!(settings.stats_database_url, settings.database_url);
    }

    #[test]
    fn unknown_file_key_is_rejected() {
        let err = serde_json::from_str::<SettingsFile>(r#"{"embeding_dim": 768}"#);
        assert!(err.is_err());
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let mut file = full_file();
        file.embedding_dim = Some(0);
        let err = Settings::resolve(file).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "EMBEDDING_DIM", .. }));
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let mut file = full_file();
        file.chat_temperature = Some(3.5);
        let err = Settings::resolve(file).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CHAT_TEMPERATURE", .. }));
    }
}
