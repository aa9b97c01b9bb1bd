use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::bot::messages::{self, Formatter, OutboundMessage};
use crate::bot::notifier::{self, Outbox};
use crate::config::Config;
use crate::data::fetcher::{CryptoRankClient, RetryPolicy};
use crate::data::llm::LlmClient;
use crate::data::parser::Payload;
use crate::engine::intent::{Intent, IntentResolver};
use crate::engine::limiter::RateLimiter;
use crate::error::Failure;

/// One inbound chat event, whichever transport delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub chat_id: i64,
    pub sender_id: Option<u64>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Set when the update came from an inline button press.
    pub callback_id: Option<String>,
}

/// Pipeline position of an update, used in logs and as the outcome of `handle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Resolved,
    Fetched,
    Formatted,
    Sent,
    /// Every send attempt failed.
    Dropped,
}

fn send_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(2),
    }
}

pub struct BotDispatcher {
    resolver: IntentResolver,
    client: CryptoRankClient,
    formatter: Formatter,
    outbox: Arc<dyn Outbox>,
    limiter: RateLimiter,
    send_policy: RetryPolicy,
    display_limit: usize,
}

impl BotDispatcher {
    pub fn new(cfg: &Config, http: reqwest::Client, outbox: Arc<dyn Outbox>) -> Self {
        let llm = LlmClient::from_config(http.clone(), cfg);
        Self {
            resolver: IntentResolver::new(llm, cfg.http_timeout),
            client: CryptoRankClient::new(http, cfg),
            formatter: Formatter::new(cfg.display_limit),
            outbox,
            limiter: RateLimiter::per_minute(cfg.rate_limit_per_minute),
            send_policy: send_policy(),
            display_limit: cfg.display_limit,
        }
    }

    #[cfg(test)]
    pub fn with_client(mut self, client: CryptoRankClient) -> Self {
        self.client = client;
        self
    }

    #[cfg(test)]
    pub fn with_send_policy(mut self, policy: RetryPolicy) -> Self {
        self.send_policy = policy;
        self
    }

    /// Answer one update with exactly one outbound message. Never fails;
    /// an undeliverable reply is logged and dropped.
    pub async fn handle(&self, update: Update) -> Stage {
        debug!(chat_id = update.chat_id, stage = ?Stage::Received, at = %update.timestamp, text = %update.text, "Update");

        if let Some(id) = &update.callback_id {
            if let Err(e) = self.outbox.acknowledge(id).await {
                tracing::warn!(chat_id = update.chat_id, error = %e, "Failed to acknowledge button press");
            }
        }

        let reply = self.respond(&update).await;
        if notifier::deliver(self.outbox.as_ref(), update.chat_id, &reply, &self.send_policy).await {
            debug!(chat_id = update.chat_id, stage = ?Stage::Sent, "Update");
            Stage::Sent
        } else {
            error!(chat_id = update.chat_id, stage = ?Stage::Dropped, "Reply undeliverable, dropping update");
            Stage::Dropped
        }
    }

    /// Build the reply for an update without sending it.
    pub async fn respond(&self, update: &Update) -> OutboundMessage {
        if let Some(sender) = update.sender_id {
            if !self.limiter.check(sender) {
                info!(chat_id = update.chat_id, sender, "Rate limited");
                return OutboundMessage::text(messages::slow_down_message());
            }
        }

        let intent = self.resolver.resolve(&update.text).await;
        debug!(chat_id = update.chat_id, stage = ?Stage::Resolved, intent = intent.name(), "Update");

        let result = self.fetch(&intent).await;
        match &result {
            Ok(_) => debug!(chat_id = update.chat_id, stage = ?Stage::Fetched, "Update"),
            Err(e) => info!(chat_id = update.chat_id, intent = intent.name(), failure = e.kind(), "Fetch failed"),
        }

        let reply = self.formatter.format(&intent, &result);
        debug!(chat_id = update.chat_id, stage = ?Stage::Formatted, chars = reply.text.len(), "Update");
        reply
    }

    async fn fetch(&self, intent: &Intent) -> Result<Payload, Failure> {
        match intent {
            Intent::Price { symbols } if symbols.is_empty() => Ok(Payload::Nothing),
            Intent::Price { symbols } => self.client.fetch_prices(symbols).await.map(Payload::Prices),
            Intent::Trending { filter } => self
                .client
                .fetch_trending(*filter, self.display_limit)
                .await
                .map(|quotes| Payload::Movers { filter: *filter, quotes }),
            Intent::Funds { tier } => self.client.fetch_funds(*tier).await.map(Payload::Funds),
            Intent::Drophunting { status, active_only } => self
                .client
                .fetch_drophunting(*active_only, status.as_deref())
                .await
                .map(Payload::Activities),
            Intent::Help | Intent::Start | Intent::Unknown => Ok(Payload::Nothing),
        }
    }
}
