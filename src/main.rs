mod bot;
mod cli;
mod config;
mod data;
mod engine;
mod error;
mod web;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use teloxide::prelude::*;

use crate::cli::{Cli, Commands, WebhookAction};
use crate::config::{Config, Mode};
use crate::engine::dispatcher::BotDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cryptorank_bot=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::from_env()?;
    let bot = Bot::new(&cfg.telegram_bot_token);

    match cli.command.unwrap_or(Commands::Run { mode: None }) {
        Commands::Run { mode } => {
            if let Some(mode) = mode {
                cfg.mode = mode.into();
            }
            run(cfg, bot).await
        }
        Commands::Webhook { action } => manage_webhook(&cfg, &bot, action).await,
    }
}

async fn run(cfg: Config, bot: Bot) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .timeout(cfg.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    if cfg.cryptorank_api_key.is_none() {
        tracing::warn!("CRYPTORANK_API_KEY not set; market data commands will reply with setup guidance");
    }
    tracing::info!(
        mode = ?cfg.mode,
        llm = cfg.llm_enabled(),
        cache_ttl_secs = cfg.cache_ttl.as_secs(),
        "CryptoRank bot starting..."
    );

    let outbox = Arc::new(bot::notifier::TelegramOutbox::new(bot.clone()));
    let dispatcher = Arc::new(BotDispatcher::new(&cfg, http, outbox));

    match cfg.mode {
        Mode::Polling => bot::commands::run_polling(bot, dispatcher).await,
        Mode::Webhook => {
            let state = web::AppState::new(&cfg, bot, dispatcher);
            web::serve(&cfg, state).await
        }
    }
}

async fn manage_webhook(cfg: &Config, bot: &Bot, action: WebhookAction) -> anyhow::Result<()> {
    match action {
        WebhookAction::Set { url } => {
            let url = url
                .or_else(|| web::setup::webhook_url(cfg.public_url.as_deref(), None, "/webhook"))
                .context("No webhook URL: pass --url or set PUBLIC_URL")?;
            web::setup::set_webhook(bot, &url, cfg.webhook_secret.as_deref()).await?;
            println!("Webhook set to {url}");
        }
        WebhookAction::Info => {
            let info = web::setup::webhook_info(bot).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        WebhookAction::Remove => {
            web::setup::remove_webhook(bot).await?;
            println!("Webhook removed");
        }
    }
    Ok(())
}
