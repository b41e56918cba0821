//! Berserker
//!
//! A Discord bot that moderates guild messages and cleans up temporary voice
//! rooms once their creator has left.

mod bot;
mod config;
mod database;
mod filter;
mod guild;
mod platform;
mod room;
mod router;

use config::{Config, ConfigStore};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,berserker=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Berserker starting...");

    let store = ConfigStore::from_env();
    let config = match Config::load(&store) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Please check {}", store.path().display());
            std::process::exit(1);
        }
    };

    info!("Configuration loaded from {}", store.path().display());

    if let Err(e) = bot::run(config).await {
        error!("Bot error: {}", e);
        std::process::exit(1);
    }
}
