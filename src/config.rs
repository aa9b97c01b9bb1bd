use anyhow::{bail, Context, Result};
use std::time::Duration;

pub const DEFAULT_CRYPTORANK_URL: &str = "https://api.cryptorank.io/v2";
pub const DEFAULT_MODEL_URL: &str = "https://api.fireworks.ai/inference/v1";
pub const DEFAULT_MODEL_NAME: &str =
    "accounts/sentientfoundation/models/dobby-unhinged-llama-3-3-70b-new";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Long-poll `getUpdates` through the teloxide dispatcher.
    Polling,
    /// Serve the webhook and setup routes over HTTP.
    Webhook,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub cryptorank_api_key: Option<String>,
    pub cryptorank_base_url: String,
    pub model_api_key: Option<String>,
    pub model_base_url: String,
    pub model_name: String,
    pub mode: Mode,
    pub bind_addr: String,
    pub port: u16,
    pub public_url: Option<String>,
    /// Sent to Telegram on `setWebhook` and required back on every webhook POST.
    pub webhook_secret: Option<String>,
    pub http_timeout: Duration,
    pub max_retries: u32,
    pub cache_ttl: Duration,
    pub display_limit: usize,
    pub rate_limit_per_minute: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN not set")?;

        let mode = match get("BOT_MODE").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("polling") => Mode::Polling,
            Some("webhook") => Mode::Webhook,
            Some(other) => bail!("BOT_MODE must be 'polling' or 'webhook', got '{other}'"),
        };

        let webhook_secret = get("WEBHOOK_SECRET");
        if let Some(secret) = &webhook_secret {
            let valid = secret.len() <= 256
                && secret.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                bail!("WEBHOOK_SECRET must be 1-256 characters of A-Z, a-z, 0-9, '_' or '-'");
            }
        }

        Ok(Self {
            telegram_bot_token,
            cryptorank_api_key: get("CRYPTORANK_API_KEY"),
            cryptorank_base_url: get("CRYPTORANK_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CRYPTORANK_URL.into())
                .trim_end_matches('/')
                .to_string(),
            model_api_key: get("MODEL_API_KEY"),
            model_base_url: get("MODEL_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MODEL_URL.into())
                .trim_end_matches('/')
                .to_string(),
            model_name: get("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.into()),
            mode,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(get("PORT"), "PORT", 5000)?,
            public_url: get("PUBLIC_URL")
                .or_else(|| get("RENDER_EXTERNAL_URL"))
                .map(|u| u.trim_end_matches('/').to_string()),
            webhook_secret,
            http_timeout: Duration::from_secs(parse_or(get("HTTP_TIMEOUT_SECS"), "HTTP_TIMEOUT_SECS", 10)?),
            max_retries: parse_or(get("CRYPTORANK_MAX_RETRIES"), "CRYPTORANK_MAX_RETRIES", 3)?,
            cache_ttl: Duration::from_secs(parse_or(get("CACHE_TTL_SECS"), "CACHE_TTL_SECS", 60)?),
            display_limit: parse_or(get("DISPLAY_LIMIT"), "DISPLAY_LIMIT", 10)?,
            rate_limit_per_minute: parse_or(get("RATE_LIMIT_PER_MINUTE"), "RATE_LIMIT_PER_MINUTE", 20)?,
        })
    }

    pub fn llm_enabled(&self) -> bool {
        self.model_api_key.is_some()
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(s) => s.parse().ok().with_context(|| format!("{key} has an invalid value: '{s}'")),
        None => Ok(default),
    }
}
