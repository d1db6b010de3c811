//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub data_dir: PathBuf,
    pub log_level: Level,
    pub frontend_origin: String,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub analysis_model: String,
    pub stt_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub speech_language: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Storage Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let frontend_origin = std::env::var("FRONTEND_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:5173".to_string());

        // --- Load the API Key (as optional; the gateway reports its absence) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        // --- Load Adapter-specific Settings ---
        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let analysis_model =
            std::env::var("ANALYSIS_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let stt_model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let tts_model = std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1-hd".to_string());
        let tts_voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| "nova".to_string());
        let speech_language =
            std::env::var("SPEECH_LANGUAGE").unwrap_or_else(|_| "de-DE".to_string());

        Ok(Self {
            bind_address,
            data_dir,
            log_level,
            frontend_origin,
            openai_api_key,
            chat_model,
            analysis_model,
            stt_model,
            tts_model,
            tts_voice,
            speech_language,
        })
    }
}
