//! verify_bot
//!
//! A Discord bot that verifies members against a Minecraft username: grants
//! the Verified role, sets nicknames, moderates the verify channel, and keeps
//! an optional voice channel presence alive across disconnects and restarts.

mod bot;
mod commands;
mod config;
mod health;
mod policy;
mod store;
mod voice;

use config::Config;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,verify_bot=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("verify_bot starting...");

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Please ensure DISCORD_BOT_TOKEN is set in the environment or .env file");
            std::process::exit(1);
        }
    };

    if let Some(guild_id) = config.guild_id {
        info!("Development mode: Commands will be registered to guild {}", guild_id);
    }

    // Make sure the settings file's directory exists
    if let Some(parent) = config.settings_file.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("Failed to create settings directory: {}", e);
                std::process::exit(1);
            }
        }
    }

    // Hosting platform health check
    let port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(port).await {
            error!("Health server error: {}", e);
        }
    });

    // Run the bot
    if let Err(e) = bot::run(config).await {
        error!("Bot error: {}", e);
        std::process::exit(1);
    }
}
