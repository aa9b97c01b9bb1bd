use crate::bot::callbacks;
use crate::data::fetcher::TrendFilter;
use crate::data::parser::{AirdropActivity, FundRecord, MarketSnapshot, Payload, Quote};
use crate::engine::intent::Intent;
use crate::error::Failure;

/// Telegram's message cap, counted in UTF-16 code units.
pub const MAX_MESSAGE_UNITS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: &str, data: &str) -> Self {
        Self { label: label.into(), data: data.into() }
    }
}

/// Rendered reply: plain text plus an optional inline keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub keyboard: Vec<Vec<Button>>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: clamp(text.into()), keyboard: Vec::new() }
    }

    pub fn with_keyboard(mut self, keyboard: Vec<Vec<Button>>) -> Self {
        self.keyboard = keyboard;
        self
    }
}

fn clamp(text: String) -> String {
    if text.encode_utf16().count() <= MAX_MESSAGE_UNITS {
        return text;
    }
    // Leave one unit for the ellipsis.
    let budget = MAX_MESSAGE_UNITS - 1;
    let mut used = 0;
    let mut cut = String::with_capacity(text.len());
    for c in text.chars() {
        used += c.len_utf16();
        if used > budget {
            break;
        }
        cut.push(c);
    }
    cut.push('\u{2026}');
    cut
}

/// Turns an intent and its fetch result into reply text. Holds no state
/// besides the list length cap, so equal inputs render identically.
#[derive(Debug, Clone, Copy)]
pub struct Formatter {
    display_limit: usize,
}

impl Formatter {
    pub fn new(display_limit: usize) -> Self {
        Self { display_limit: display_limit.max(1) }
    }

    pub fn format(&self, intent: &Intent, result: &Result<Payload, Failure>) -> OutboundMessage {
        match result {
            Err(failure) => OutboundMessage::text(failure_message(intent, failure)),
            Ok(Payload::Prices(snapshot)) => OutboundMessage::text(format_prices(snapshot)),
            Ok(Payload::Movers { filter, quotes }) => {
                OutboundMessage::text(self.format_trending(*filter, quotes))
            }
            Ok(Payload::Funds(funds)) => OutboundMessage::text(self.format_funds(funds)),
            Ok(Payload::Activities(acts)) => OutboundMessage::text(self.format_activities(acts)),
            Ok(Payload::Nothing) => match intent {
                Intent::Start => OutboundMessage::text(welcome_message()).with_keyboard(callbacks::main_menu()),
                Intent::Help | Intent::Unknown => OutboundMessage::text(help_message()),
                Intent::Price { .. } => OutboundMessage::text(price_usage()),
                Intent::Trending { .. } | Intent::Funds { .. } | Intent::Drophunting { .. } => {
                    OutboundMessage::text(GENERIC_FAILURE)
                }
            },
        }
    }

    fn format_trending(&self, filter: Option<TrendFilter>, quotes: &[Quote]) -> String {
        let title = match filter {
            None => "\u{1f525} Trending Cryptocurrencies".to_string(),
            Some(TrendFilter::Gainers) => format!("\u{1f680} {} (24h)", TrendFilter::Gainers.label()),
            Some(TrendFilter::Losers) => format!("\u{1f53b} {} (24h)", TrendFilter::Losers.label()),
        };
        let mut lines = vec![title, String::new()];
        for (i, q) in quotes.iter().take(self.display_limit).enumerate() {
            lines.push(format!("{}. {} {}  {}", i + 1, coin_emoji(&q.symbol), q.symbol, fmt_usd(q.price)));
            let mut detail = vec![change_str(q.change_24h)];
            if let Some(cap) = q.market_cap {
                detail.push(format!("MCap {}", fmt_compact(cap)));
            }
            lines.push(format!("   {}", detail.join(" | ")));
        }
        lines.extend(more_line(quotes.len(), self.display_limit));
        lines.push(String::new());
        lines.push(FOOTER.into());
        lines.join("\n")
    }

    fn format_funds(&self, funds: &[FundRecord]) -> String {
        let mut lines = vec!["\u{1f3e6} Top Crypto Investors & Funds".to_string(), String::new()];
        for (i, f) in funds.iter().take(self.display_limit).enumerate() {
            lines.push(format!("{}. {}", i + 1, f.name));
            let tier = match f.tier {
                Some(t) => format!("Tier {t}"),
                None => "Unrated".to_string(),
            };
            lines.push(format!("   {} {} \u{00b7} {}", tier_emoji(f.tier), tier, f.category));
        }
        lines.extend(more_line(funds.len(), self.display_limit));
        lines.push(String::new());
        lines.push(FOOTER.into());
        lines.join("\n")
    }

    fn format_activities(&self, acts: &[AirdropActivity]) -> String {
        let mut lines = vec!["\u{1f3af} Drophunting Activities".to_string(), String::new()];
        for (i, a) in acts.iter().take(self.display_limit).enumerate() {
            lines.push(format!("{}. {}", i + 1, a.name));
            lines.push(format!("   \u{1f381} Reward: {}", a.reward_type));
            lines.push(format!("   \u{1f4ca} Status: {}", a.status));
            if let Some(raised) = a.total_raised.filter(|r| *r > 0.0) {
                lines.push(format!("   \u{1f4b0} Raised: {}", fmt_compact(raised)));
            }
            if let Some(score) = a.x_score {
                lines.push(format!("   \u{1f4f1} X Score: {score:.0}"));
            }
            if let Some(subs) = a.subscriber_count {
                lines.push(format!("   \u{1f465} Followers: {}", group_thousands(&subs.to_string())));
            }
        }
        lines.extend(more_line(acts.len(), self.display_limit));
        lines.push(String::new());
        lines.push(FOOTER.into());
        lines.join("\n")
    }
}

const FOOTER: &str = "Data: CryptoRank | /help for commands";

const GENERIC_FAILURE: &str = "\u{274c} Something went wrong fetching that data. Please try again in a moment.";

fn more_line(total: usize, limit: usize) -> Option<String> {
    (total > limit).then(|| format!("\u{2026}and {} more", total - limit))
}

pub fn format_prices(snapshot: &MarketSnapshot) -> String {
    let mut lines = vec!["\u{1f4b0} Current Prices".to_string()];
    for q in &snapshot.quotes {
        lines.push(String::new());
        let mut head = format!("{} {}", coin_emoji(&q.symbol), q.symbol);
        if let Some(name) = &q.name {
            head.push_str(&format!(" ({name})"));
        }
        if let Some(rank) = q.rank {
            head.push_str(&format!(" #{rank}"));
        }
        lines.push(head);
        lines.push(format!("{}  {}", fmt_usd(q.price), change_str(q.change_24h)));
        if let Some(cap) = q.market_cap {
            lines.push(format!("Market Cap: {}", fmt_compact(cap)));
        }
    }
    if !snapshot.missing.is_empty() {
        lines.push(String::new());
        lines.push(format!("\u{26a0}\u{fe0f} No data for: {}", snapshot.missing.join(", ")));
    }
    lines.push(String::new());
    lines.push(format!("Updated {} UTC | {}", snapshot.fetched_at.format("%H:%M"), FOOTER));
    lines.join("\n")
}

/// User-facing text for a failed fetch. Internal detail never reaches the chat.
pub fn failure_message(intent: &Intent, failure: &Failure) -> String {
    match failure {
        Failure::ConfigMissing(var) => format!(
            "\u{2699}\u{fe0f} Market data is not configured yet.\n\n\
             The bot owner needs to set the {var} environment variable and restart the bot."
        ),
        Failure::Unauthorized => "\u{1f511} CryptoRank rejected the API key.\n\n\
             The bot owner should check that CRYPTORANK_API_KEY is valid and active."
            .to_string(),
        Failure::PlanRestricted => "\u{1f4b8} The developer is too broke to afford the paid version of this \
             CryptoRank endpoint!\n\n\
             \u{1f4a1} This data requires a paid CryptoRank API subscription."
            .to_string(),
        Failure::NotFound(subject) => match intent {
            Intent::Price { .. } => format!(
                "\u{1f50d} No data for symbol {subject}.\n\nCheck the ticker and try again, e.g. /price BTC"
            ),
            _ => format!("\u{1f50d} No {subject} found right now."),
        },
        Failure::Timeout | Failure::Network(_) => {
            "\u{23f3} CryptoRank is not responding right now. Please try again in a moment.".to_string()
        }
        Failure::Upstream(_) | Failure::Parse(_) => GENERIC_FAILURE.to_string(),
    }
}

// ── Number formatting ──

fn group_thousands(int_part: &str) -> String {
    let digits: Vec<char> = int_part.chars().collect();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(*c);
    }
    out
}

fn rounded(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// `$65,000.00`, `$0.5000`, `$0.00001234`. The precision bucket is picked
/// from the rounded value, so 0.999996 prints as `$1.00`.
pub fn fmt_usd(value: f64) -> String {
    let abs = value.abs();
    let decimals = if abs == 0.0 || rounded(abs, 4) >= 1.0 {
        2
    } else if rounded(abs, 8) >= 0.01 {
        4
    } else {
        8
    };
    let raw = format!("{:.*}", decimals, abs);
    let (int_part, frac) = raw.split_once('.').unwrap_or((raw.as_str(), ""));
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}${}.{frac}", group_thousands(int_part))
}

const COMPACT_UNITS: [(f64, &str); 4] = [(1e12, "T"), (1e9, "B"), (1e6, "M"), (1e3, "K")];

/// `$1.28T`, `$845.20B`, `$12.40M`, `$9.50K`. Uses the largest unit whose
/// rounded mantissa reaches 1, so 999.996B prints as `$1.00T`.
pub fn fmt_compact(value: f64) -> String {
    let abs = value.abs();
    let sign = if value < 0.0 { "-" } else { "" };
    for (size, suffix) in COMPACT_UNITS {
        let scaled = rounded(abs / size, 2);
        if scaled >= 1.0 {
            return format!("{sign}${scaled:.2}{suffix}");
        }
    }
    fmt_usd(value)
}

fn change_str(change: Option<f64>) -> String {
    match change {
        Some(c) if c > 0.0 => format!("\u{1f4c8} {c:+.2}% (24h)"),
        Some(c) if c < 0.0 => format!("\u{1f4c9} {c:+.2}% (24h)"),
        Some(_) => "\u{2796} 0.00% (24h)".to_string(),
        None => "\u{1f4ca} n/a (24h)".to_string(),
    }
}

pub fn coin_emoji(symbol: &str) -> &'static str {
    match symbol {
        "BTC" => "\u{20bf}",
        "ETH" => "\u{039e}",
        "USDT" | "USDC" | "DAI" => "\u{1f4b5}",
        _ => "\u{1fa99}",
    }
}

fn tier_emoji(tier: Option<u8>) -> &'static str {
    match tier {
        Some(1) => "\u{1f947}",
        Some(2) => "\u{1f948}",
        _ => "\u{1f949}",
    }
}

// ── Static templates ──

pub fn welcome_message() -> &'static str {
    "\u{1f680} Welcome to DobbyXBT Bot!\n\n\
     I'm your cryptocurrency assistant. I can help you with:\n\n\
     \u{1f4b0} Price Tracking \u{2014} real-time crypto prices\n\
     \u{1f525} Trending Assets \u{2014} market leaders, gainers and losers\n\
     \u{1f3e6} Investment Data \u{2014} top crypto investors and funds\n\
     \u{1f3af} Drophunting \u{2014} airdrop activities and rewards\n\n\
     Use the buttons below or just type your request!"
}

pub fn help_message() -> &'static str {
    "\u{1f198} DobbyXBT Bot \u{2014} Commands\n\n\
     \u{1f4cb} Main:\n\
     /start \u{2014} Welcome message and main menu\n\
     /help \u{2014} Show this help message\n\n\
     \u{1f4b0} Prices:\n\
     /price BTC \u{2014} Current price\n\
     /price BTC,ETH \u{2014} Compare prices\n\n\
     \u{1f525} Market:\n\
     /trending \u{2014} Largest assets by market cap\n\
     /trending gainers \u{2014} Top gainers (24h)\n\
     /trending losers \u{2014} Top losers (24h)\n\n\
     \u{1f3e6} Investors:\n\
     /funds \u{2014} Top crypto investors and funds\n\
     /funds 1 \u{2014} Tier 1 funds only\n\n\
     \u{1f3af} Drophunting:\n\
     /drophunting \u{2014} Active airdrop activities\n\
     /drophunting POTENTIAL \u{2014} Filter by status\n\
     /drophunting all \u{2014} Include finished activities\n\n\
     \u{1f4ac} Or just ask:\n\
     \u{2022} What's the price of Bitcoin?\n\
     \u{2022} Show me trending cryptocurrencies\n\
     \u{2022} Top crypto investors and funds\n\
     \u{2022} Show me airdrop activities"
}

pub fn price_usage() -> &'static str {
    "\u{1f4b0} Price Check\n\n\
     Usage: /price BTC or /price BTC,ETH\n\
     Or ask: What's the price of Bitcoin?"
}

pub fn slow_down_message() -> &'static str {
    "\u{1f6a6} You're sending messages too quickly. Please wait a minute and try again."
}
