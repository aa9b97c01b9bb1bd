pub mod setup;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::bot::{self, commands::Command};
use crate::config::Config;
use crate::engine::dispatcher::BotDispatcher;

const WEBHOOK_PATH: &str = "/webhook";
const API_WEBHOOK_PATH: &str = "/api/webhook";

#[derive(Clone)]
pub struct AppState {
    pub bot: Bot,
    pub dispatcher: Arc<BotDispatcher>,
    pub public_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub cryptorank_configured: bool,
    pub model_configured: bool,
}

impl AppState {
    pub fn new(cfg: &Config, bot: Bot, dispatcher: Arc<BotDispatcher>) -> Self {
        Self {
            bot,
            dispatcher,
            public_url: cfg.public_url.clone(),
            webhook_secret: cfg.webhook_secret.clone(),
            cryptorank_configured: cfg.cryptorank_api_key.is_some(),
            model_configured: cfg.llm_enabled(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetupQuery {
    action: Option<String>,
}

type Reply = (StatusCode, Json<Value>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/setup", get(setup_route))
        .route(API_WEBHOOK_PATH, post(webhook))
        .route("/set_webhook", get(set_webhook))
        .route("/webhook_info", get(webhook_info))
        .route(WEBHOOK_PATH, post(webhook))
        .with_state(state)
}

/// Webhook mode: bind, register the webhook when a public URL is known,
/// serve until ctrl-c.
pub async fn serve(cfg: &Config, state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", cfg.bind_addr, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    match setup::webhook_url(cfg.public_url.as_deref(), None, WEBHOOK_PATH) {
        Some(url) => {
            if let Err(e) = setup::set_webhook(&state.bot, &url, state.webhook_secret.as_deref()).await {
                tracing::error!(error = %e, "Webhook registration failed; use /set_webhook once reachable");
            }
        }
        None => tracing::warn!("PUBLIC_URL not set, skipping webhook registration"),
    }
    if state.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET not set; webhook POSTs are not authenticated");
    }
    if let Err(e) = bot::commands::register_commands(&state.bot).await {
        tracing::warn!(error = %e, "Continuing without command menu");
    }

    tracing::info!(%addr, "Listening for webhook updates");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let commands: Vec<String> = Command::bot_commands()
        .into_iter()
        .map(|c| format!("/{}", c.command.trim_start_matches('/')))
        .collect();
    Json(json!({
        "status": "ok",
        "bot": "DobbyXBT Bot",
        "config": {
            "telegram_bot_token": true,
            "cryptorank_api_key": state.cryptorank_configured,
            "model_api_key": state.model_configured,
        },
        "endpoints": {
            "health": "/",
            "setup": "/api/setup?action=set|info|remove",
            "webhook": API_WEBHOOK_PATH,
            "set_webhook": "/set_webhook",
            "webhook_info": "/webhook_info",
        },
        "commands": commands,
    }))
}

fn host(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|v| v.to_str().ok())
}

fn error(status: StatusCode, message: impl std::fmt::Display) -> Reply {
    (status, Json(json!({"status": "error", "message": message.to_string()})))
}

async fn register(state: &AppState, headers: &HeaderMap, path: &str) -> Reply {
    let Some(url) = setup::webhook_url(state.public_url.as_deref(), host(headers), path) else {
        return error(StatusCode::BAD_REQUEST, "Cannot work out the public URL; set PUBLIC_URL");
    };
    match setup::set_webhook(&state.bot, &url, state.webhook_secret.as_deref()).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok", "action": "set", "url": url}))),
        Err(e) => {
            tracing::error!(error = %e, "setWebhook failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        }
    }
}

async fn info(state: &AppState) -> Reply {
    match setup::webhook_info(&state.bot).await {
        Ok(info) => (StatusCode::OK, Json(json!({"status": "ok", "action": "info", "webhook": info}))),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    }
}

async fn setup_route(State(state): State<AppState>, Query(query): Query<SetupQuery>, headers: HeaderMap) -> Reply {
    match query.action.as_deref() {
        Some("set") => register(&state, &headers, API_WEBHOOK_PATH).await,
        Some("info") => info(&state).await,
        Some("remove") => match setup::remove_webhook(&state.bot).await {
            Ok(()) => (StatusCode::OK, Json(json!({"status": "ok", "action": "remove"}))),
            Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
        },
        _ => (StatusCode::OK, Json(setup::setup_help())),
    }
}

async fn set_webhook(State(state): State<AppState>, headers: HeaderMap) -> Reply {
    register(&state, &headers, WEBHOOK_PATH).await
}

async fn webhook_info(State(state): State<AppState>) -> Reply {
    info(&state).await
}

/// Acknowledge at once and answer on a separate task so Telegram never
/// waits on CryptoRank.
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<teloxide::types::Update>, JsonRejection>,
) -> Reply {
    let presented = headers.get(setup::SECRET_HEADER).and_then(|v| v.to_str().ok());
    if !setup::secret_matches(state.webhook_secret.as_deref(), presented) {
        tracing::warn!("Rejected webhook POST with missing or wrong secret token");
        return error(StatusCode::UNAUTHORIZED, "Invalid secret token");
    }
    let update = match body {
        Ok(Json(update)) => update,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected webhook body");
            return error(StatusCode::BAD_REQUEST, "Invalid update");
        }
    };
    if let Some(update) = bot::from_telegram(update) {
        let dispatcher = state.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.handle(update).await;
        });
    }
    (StatusCode::OK, Json(json!({"status": "ok"})))
}
