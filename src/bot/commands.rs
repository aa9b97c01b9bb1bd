use std::sync::Arc;

use anyhow::Context;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::bot::callbacks;
use crate::engine::dispatcher::{self, BotDispatcher};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Commands advertised in the Telegram client menu. Parsing itself goes
/// through the intent resolver so free text and commands share one path.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "DobbyXBT Bot commands:")]
pub enum Command {
    #[command(description = "welcome message and main menu")]
    Start,
    #[command(description = "show all commands")]
    Help,
    #[command(description = "current price, e.g. /price BTC,ETH")]
    Price(String),
    #[command(description = "market leaders, or: gainers | losers")]
    Trending(String),
    #[command(description = "top crypto investors, optionally by tier")]
    Funds(String),
    #[command(description = "airdrop activities, optionally by status or all")]
    Drophunting(String),
}

pub fn to_update(msg: &Message) -> Option<dispatcher::Update> {
    let text = msg.text()?;
    Some(dispatcher::Update {
        chat_id: msg.chat.id.0,
        sender_id: msg.from.as_ref().map(|u| u.id.0),
        text: text.to_string(),
        timestamp: msg.date,
        callback_id: None,
    })
}

async fn on_message(msg: Message, handler: Arc<BotDispatcher>) -> HandlerResult {
    if let Some(update) = to_update(&msg) {
        handler.handle(update).await;
    }
    Ok(())
}

async fn on_callback(q: CallbackQuery, handler: Arc<BotDispatcher>) -> HandlerResult {
    if let Some(update) = callbacks::to_update(&q) {
        handler.handle(update).await;
    }
    Ok(())
}

pub async fn register_commands(bot: &Bot) -> anyhow::Result<()> {
    bot.set_my_commands(Command::bot_commands())
        .await
        .context("Failed to register bot commands")?;
    Ok(())
}

/// Long-poll mode. Clears any webhook first since Telegram refuses
/// getUpdates while one is set.
pub async fn run_polling(bot: Bot, handler: Arc<BotDispatcher>) -> anyhow::Result<()> {
    bot.delete_webhook().await.context("Failed to clear webhook before polling")?;
    if let Err(e) = register_commands(&bot).await {
        tracing::warn!(error = %e, "Continuing without command menu");
    }

    let tree = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    tracing::info!("Polling for updates");
    Dispatcher::builder(bot, tree)
        .dependencies(dptree::deps![handler])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::intent::parse_command;

    #[test]
    fn advertised_commands_are_understood() {
        let commands = Command::bot_commands();
        assert_eq!(commands.len(), 6);
        for cmd in commands {
            let name = cmd.command.trim_start_matches('/');
            assert!(parse_command(&format!("/{name}")).is_some(), "{name} not recognised");
        }
    }

    #[test]
    fn text_message_becomes_update() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "message_id": 1,
            "date": 1700000000,
            "chat": {"id": 99, "type": "private", "first_name": "Ann"},
            "from": {"id": 5, "is_bot": false, "first_name": "Ann"},
            "text": "/price btc"
        }))
        .unwrap();
        let update = to_update(&msg).unwrap();
        assert_eq!(update.chat_id, 99);
        assert_eq!(update.sender_id, Some(5));
        assert_eq!(update.text, "/price btc");
        assert_eq!(update.timestamp.timestamp(), 1700000000);
    }
}
