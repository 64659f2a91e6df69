mod access;
mod config;
mod fetcher;
mod mail;
mod platform;
mod relay;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use secrecy::ExposeSecret;
use teloxide::Bot;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::fetcher::TelegramFetcher;
use crate::mail::smtp::SmtpTransport;
use crate::mail::RelayMailer;
use crate::platform::telegram::{self, TelegramReplier};
use crate::relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kindle_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // SMTP TLS needs a process-wide crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    // Variables from ./.env fill in whatever the process environment lacks
    match config::load_env_file(Path::new(".env")) {
        Ok(true) => info!("Loaded environment from .env"),
        Ok(false) => {}
        Err(e) => warn!("Ignoring .env: {:#}", e),
    }

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);
    info!(
        "  SMTP: {}:{} ({})",
        config.smtp.host, config.smtp.port, config.smtp.security
    );
    info!("  Recipient: {}", config.delivery.recipient);
    info!("  Subject: {}", config.delivery.subject.subject());
    info!("  Max file size: {} bytes", config.delivery.max_file_bytes);

    let gate = config.gate();
    if gate.is_empty() {
        warn!("Allowlist is empty: every sender will be rejected");
    }
    info!("Bot ready for {} authorized users", gate.len());

    let bot = Bot::new(config.telegram.bot_token.expose_secret());

    let relay = Arc::new(Relay::new(
        gate,
        TelegramFetcher::new(
            bot.clone(),
            config.delivery.max_file_bytes,
            config.delivery.temp_dir.clone(),
        ),
        RelayMailer::new(
            config.mail_settings(),
            SmtpTransport::new(config.smtp_settings()),
        ),
        TelegramReplier::new(bot.clone()),
        config.relay_timeouts(),
    ));

    telegram::run(bot, relay).await?;

    info!("Bot stopped");
    Ok(())
}
