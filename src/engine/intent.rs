use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::data::fetcher::TrendFilter;
use crate::data::llm::{ChatMessage, LlmClient};

/// What an inbound message is asking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Quotes for these tickers. Empty means the user sent a bare `/price`.
    Price { symbols: Vec<String> },
    Trending { filter: Option<TrendFilter> },
    Funds { tier: Option<u8> },
    Drophunting { status: Option<String>, active_only: bool },
    Help,
    Start,
    Unknown,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Price { .. } => "price",
            Self::Trending { .. } => "trending",
            Self::Funds { .. } => "funds",
            Self::Drophunting { .. } => "drophunting",
            Self::Help => "help",
            Self::Start => "start",
            Self::Unknown => "unknown",
        }
    }
}

// ── Vocabulary ──

const COIN_NAMES: &[(&str, &str)] = &[
    ("bitcoin", "BTC"),
    ("ethereum", "ETH"),
    ("ether", "ETH"),
    ("solana", "SOL"),
    ("cardano", "ADA"),
    ("polkadot", "DOT"),
    ("ripple", "XRP"),
    ("dogecoin", "DOGE"),
    ("polygon", "MATIC"),
    ("avalanche", "AVAX"),
    ("chainlink", "LINK"),
    ("uniswap", "UNI"),
    ("litecoin", "LTC"),
    ("tron", "TRX"),
    ("toncoin", "TON"),
    ("binance", "BNB"),
    ("tether", "USDT"),
    ("cosmos", "ATOM"),
];

const KNOWN_TICKERS: &[&str] = &[
    "BTC", "ETH", "SOL", "ADA", "DOT", "XRP", "DOGE", "MATIC", "AVAX", "LINK", "UNI", "AAVE", "LTC",
    "TRX", "TON", "SHIB", "BNB", "USDT", "USDC", "SUI", "ARB", "OP", "ATOM", "NEAR", "APT", "PEPE",
];

// Tickers that double as ordinary words; free text must write them upper-case.
const AMBIGUOUS_TICKERS: &[&str] = &["DOT", "LINK", "UNI", "SOL", "OP", "TON", "NEAR", "ATOM", "ARB", "SUI", "APT"];

const PRICE_WORDS: &[&str] = &["price", "prices", "cost", "value", "worth", "quote", "trading"];
const TREND_WORDS: &[&str] = &[
    "trending", "trend", "hot", "popular", "movers", "gainers", "gainer", "gaining", "losers", "loser", "losing",
    "pumping", "dumping",
];
const GAIN_WORDS: &[&str] = &["gainers", "gainer", "gaining", "pumping"];
const LOSS_WORDS: &[&str] = &["losers", "loser", "losing", "dumping"];
const FUND_WORDS: &[&str] = &["funds", "fund", "investors", "investor", "vc", "vcs", "hedge", "capital", "investment"];
const DROP_WORDS: &[&str] = &["drophunting", "airdrop", "airdrops", "rewards", "activities", "drops"];
const HELP_WORDS: &[&str] = &["help", "commands", "usage"];
const GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "gm", "start"];

static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^/([A-Za-z_]+)(?:@[A-Za-z0-9_]+)?(?:\s+(.*))?$").expect("valid regex"));
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$?[A-Za-z0-9]+").expect("valid regex"));

/// Map a user-supplied token (`btc`, `Bitcoin`, `$eth`) to a ticker.
pub fn normalize_symbol(token: &str) -> Option<String> {
    let t = token.trim().trim_start_matches('$');
    if t.is_empty() || t.len() > 12 || !t.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let lower = t.to_ascii_lowercase();
    if let Some((_, ticker)) = COIN_NAMES.iter().find(|(name, _)| *name == lower) {
        return Some(ticker.to_string());
    }
    Some(t.to_ascii_uppercase())
}

fn push_unique(out: &mut Vec<String>, symbol: String) {
    if !out.contains(&symbol) {
        out.push(symbol);
    }
}

/// Tickers mentioned in free text: cashtags, coin names and known tickers.
fn symbols_in_text(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for m in TOKEN_RE.find_iter(text) {
        let raw = m.as_str();
        if let Some(tag) = raw.strip_prefix('$') {
            if (2..=10).contains(&tag.len()) && tag.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
                push_unique(&mut out, tag.to_ascii_uppercase());
            }
            continue;
        }
        let lower = raw.to_ascii_lowercase();
        if let Some((_, ticker)) = COIN_NAMES.iter().find(|(name, _)| *name == lower) {
            push_unique(&mut out, ticker.to_string());
            continue;
        }
        let upper = raw.to_ascii_uppercase();
        if KNOWN_TICKERS.contains(&upper.as_str()) && (raw == upper || !AMBIGUOUS_TICKERS.contains(&upper.as_str())) {
            push_unique(&mut out, upper);
        }
    }
    out
}

fn split_args(args: &str) -> Vec<&str> {
    args.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_tier(token: &str) -> Option<u8> {
    let lower = token.to_ascii_lowercase();
    lower.trim_start_matches("tier").trim_start_matches(['-', '_']).parse().ok()
}

fn trend_filter(word: &str) -> Option<TrendFilter> {
    match word.to_ascii_lowercase().as_str() {
        "gainers" | "gainer" | "up" => Some(TrendFilter::Gainers),
        "losers" | "loser" | "down" => Some(TrendFilter::Losers),
        _ => None,
    }
}

fn drophunting(status: Option<&str>) -> Intent {
    match status {
        None => Intent::Drophunting { status: None, active_only: true },
        Some(s) if s.eq_ignore_ascii_case("all") => Intent::Drophunting { status: None, active_only: false },
        Some(s) => Intent::Drophunting { status: Some(s.to_ascii_uppercase()), active_only: false },
    }
}

/// Exact slash-command match. Command names are case-insensitive and may
/// carry a `@botname` suffix; arguments split on whitespace and commas.
pub fn parse_command(text: &str) -> Option<Intent> {
    let caps = COMMAND_RE.captures(text.trim())?;
    let name = caps.get(1)?.as_str().to_ascii_lowercase();
    let args = split_args(caps.get(2).map_or("", |m| m.as_str()));

    let intent = match name.as_str() {
        "start" => Intent::Start,
        "help" => Intent::Help,
        "price" => {
            let mut symbols = Vec::new();
            for sym in args.iter().filter_map(|a| normalize_symbol(a)) {
                push_unique(&mut symbols, sym);
            }
            Intent::Price { symbols }
        }
        "trending" => Intent::Trending { filter: args.first().and_then(|a| trend_filter(a)) },
        "funds" => Intent::Funds { tier: args.first().and_then(|a| parse_tier(a)) },
        "drophunting" => drophunting(args.first().copied()),
        _ => return None,
    };
    Some(intent)
}

/// Keyword scan over free text. `None` when nothing recognizable is present.
pub fn scan_keywords(text: &str) -> Option<Intent> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has = |set: &[&str]| words.iter().any(|w| set.contains(w));
    let symbols = symbols_in_text(text);

    if has(PRICE_WORDS) || lower.contains("how much") {
        let symbols = if symbols.is_empty() { vec!["BTC".to_string()] } else { symbols };
        return Some(Intent::Price { symbols });
    }
    if has(TREND_WORDS) {
        let filter = if has(GAIN_WORDS) {
            Some(TrendFilter::Gainers)
        } else if has(LOSS_WORDS) {
            Some(TrendFilter::Losers)
        } else {
            None
        };
        return Some(Intent::Trending { filter });
    }
    if has(FUND_WORDS) {
        let tier = words
            .windows(2)
            .find(|w| w[0] == "tier")
            .and_then(|w| w[1].parse().ok())
            .or_else(|| words.iter().find(|w| w.starts_with("tier")).and_then(|w| parse_tier(w)));
        return Some(Intent::Funds { tier });
    }
    if has(DROP_WORDS) {
        return Some(drophunting(None));
    }
    if has(HELP_WORDS) {
        return Some(Intent::Help);
    }
    if !symbols.is_empty() {
        return Some(Intent::Price { symbols });
    }
    if has(GREETING_WORDS) {
        return Some(Intent::Start);
    }
    None
}

const INTENT_PROMPT: &str = "You classify messages sent to a cryptocurrency Telegram bot. \
Reply with one JSON object and nothing else, shaped like \
{\"intent\": \"price\", \"symbols\": [\"BTC\"], \"filter\": null, \"tier\": null, \"status\": null}. \
intent is one of price, trending, funds, drophunting, help, start, unknown. \
symbols are upper-case tickers (only for price). \
filter is gainers or losers (only for trending). \
tier is a number (only for funds). \
status is an airdrop status such as POTENTIAL or CONFIRMED (only for drophunting). \
Use unknown when the message is not about crypto market data.";

#[derive(Deserialize)]
struct LlmIntent {
    intent: String,
    #[serde(default)]
    symbols: Vec<String>,
    #[serde(default)]
    filter: Option<String>,
    #[serde(default)]
    tier: Option<u8>,
    #[serde(default)]
    status: Option<String>,
}

/// Pull the JSON object out of a model reply, tolerating code fences and prose.
fn parse_llm_reply(raw: &str) -> Option<Intent> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: LlmIntent = serde_json::from_str(&raw[start..=end]).ok()?;

    let intent = match parsed.intent.trim().to_ascii_lowercase().as_str() {
        "price" => {
            let mut symbols = Vec::new();
            for sym in parsed.symbols.iter().filter_map(|s| normalize_symbol(s)) {
                push_unique(&mut symbols, sym);
            }
            if symbols.is_empty() {
                symbols.push("BTC".to_string());
            }
            Intent::Price { symbols }
        }
        "trending" => Intent::Trending { filter: parsed.filter.as_deref().and_then(trend_filter) },
        "funds" => Intent::Funds { tier: parsed.tier },
        "drophunting" => drophunting(parsed.status.as_deref().filter(|s| !s.trim().is_empty())),
        "help" => Intent::Help,
        "start" => Intent::Start,
        _ => Intent::Unknown,
    };
    Some(intent)
}

/// Classifies messages: commands first, then keywords, then the optional
/// model. Always yields an intent; `Unknown` is the floor.
pub struct IntentResolver {
    llm: Option<LlmClient>,
    timeout: Duration,
}

impl IntentResolver {
    pub fn new(llm: Option<LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn resolve(&self, text: &str) -> Intent {
        let text = text.trim();
        if text.is_empty() {
            return Intent::Unknown;
        }
        if let Some(intent) = parse_command(text) {
            return intent;
        }
        if let Some(intent) = scan_keywords(text) {
            return intent;
        }
        match &self.llm {
            Some(llm) => self.ask_model(llm, text).await,
            None => Intent::Unknown,
        }
    }

    async fn ask_model(&self, llm: &LlmClient, text: &str) -> Intent {
        let messages = [ChatMessage::system(INTENT_PROMPT), ChatMessage::user(text)];
        match tokio::time::timeout(self.timeout, llm.complete(&messages)).await {
            Ok(Ok(reply)) => parse_llm_reply(&reply).unwrap_or_else(|| {
                tracing::warn!(reply = %reply, "Model reply was not a usable intent");
                Intent::Unknown
            }),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Model intent lookup failed");
                Intent::Unknown
            }
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "Model intent lookup timed out");
                Intent::Unknown
            }
        }
    }
}
