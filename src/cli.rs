use clap::{Parser, Subcommand, ValueEnum};

use crate::config::Mode;

#[derive(Parser, Debug)]
#[command(name = "cryptorank-bot")]
#[command(about = "Telegram bot for CryptoRank market data", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot (default). Mode comes from BOT_MODE unless given here.
    Run {
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// One-shot webhook management against the Bot API.
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum WebhookAction {
    /// Register the webhook. Defaults to PUBLIC_URL + /webhook.
    Set {
        #[arg(long)]
        url: Option<String>,
    },
    Info,
    Remove,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Polling,
    Webhook,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Polling => Mode::Polling,
            ModeArg::Webhook => Mode::Webhook,
        }
    }
}
