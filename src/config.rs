//! Configuration management for the verification bot
//!
//! Loads settings from environment variables (.env file)

use std::env;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token
    pub discord_token: String,
    /// Optional guild ID for development (faster command sync)
    pub guild_id: Option<u64>,
    /// Path of the JSON settings document
    pub settings_file: PathBuf,
    /// Port for the hosting platform's health check
    pub health_port: u16,
    /// Maximum voice reconnect attempts before a session is given up
    pub voice_max_retries: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let discord_token = env::var("DISCORD_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("DISCORD_BOT_TOKEN".to_string()))?;

        let guild_id = env::var("GUILD_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|_| ConfigError::InvalidValue("GUILD_ID".to_string(), s))
            })
            .transpose()?;

        let settings_file = env::var("SETTINGS_FILE")
            .unwrap_or_else(|_| "data/settings.json".to_string())
            .into();

        let health_port = env::var("PORT")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u16>()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string(), s))
            })
            .transpose()?
            .unwrap_or(3000);

        let voice_max_retries = env::var("VOICE_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            discord_token,
            guild_id,
            settings_file,
            health_port,
            voice_max_retries,
        })
    }
}
