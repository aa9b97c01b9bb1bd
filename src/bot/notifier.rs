use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::bot::messages::{Button, OutboundMessage};
use crate::data::fetcher::RetryPolicy;

/// Where replies go. Telegram in production, a recorder in tests.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send(&self, chat_id: i64, msg: &OutboundMessage) -> Result<()>;

    /// Stop the client-side spinner on an inline button press.
    async fn acknowledge(&self, _callback_id: &str) -> Result<()> {
        Ok(())
    }
}

pub struct TelegramOutbox {
    bot: Bot,
}

impl TelegramOutbox {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

pub fn keyboard_markup(rows: &[Vec<Button>]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.data.clone()))
            .collect::<Vec<_>>()
    }))
}

#[async_trait]
impl Outbox for TelegramOutbox {
    async fn send(&self, chat_id: i64, msg: &OutboundMessage) -> Result<()> {
        let mut req = self.bot.send_message(ChatId(chat_id), msg.text.clone());
        if !msg.keyboard.is_empty() {
            req = req.reply_markup(keyboard_markup(&msg.keyboard));
        }
        req.await?;
        Ok(())
    }

    async fn acknowledge(&self, callback_id: &str) -> Result<()> {
        self.bot.answer_callback_query(callback_id.to_string()).await?;
        Ok(())
    }
}

/// Send with bounded retries. Returns false when every attempt failed; the
/// caller drops the update.
pub async fn deliver(outbox: &dyn Outbox, chat_id: i64, msg: &OutboundMessage, policy: &RetryPolicy) -> bool {
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        match outbox.send(chat_id, msg).await {
            Ok(()) => return true,
            Err(e) => {
                // Blocked or kicked: retrying will not help.
                if e.to_string().contains("Forbidden") {
                    tracing::warn!(chat_id, error = %e, "Chat refuses messages");
                    return false;
                }
                tracing::warn!(chat_id, attempt = attempt + 1, error = %e, "Failed to send reply");
                if attempt + 1 < attempts {
                    tokio::time::sleep(policy.delay(attempt, None)).await;
                }
            }
        }
    }
    false
}
