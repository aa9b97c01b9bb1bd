use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

use crate::data::fetcher::TrendFilter;
use crate::error::Failure;

/// One asset row from `/currencies`.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub name: Option<String>,
    pub price: f64,
    pub change_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub rank: Option<u32>,
}

/// Prices for a requested symbol set. Symbols the API had no row for are
/// listed in `missing`; at least one quote is always present.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub quotes: Vec<Quote>,
    pub missing: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    #[cfg(test)]
    pub fn get(&self, symbol: &str) -> Option<&Quote> {
        self.quotes.iter().find(|q| q.symbol.eq_ignore_ascii_case(symbol))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FundRecord {
    pub name: String,
    pub category: String,
    pub tier: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AirdropActivity {
    pub name: String,
    pub reward_type: String,
    pub status: String,
    pub total_raised: Option<f64>,
    pub x_score: Option<f64>,
    pub subscriber_count: Option<u64>,
}

/// Data fetched for one update, ready for formatting.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Prices(MarketSnapshot),
    Movers { filter: Option<TrendFilter>, quotes: Vec<Quote> },
    Funds(Vec<FundRecord>),
    Activities(Vec<AirdropActivity>),
    /// The intent needs no external data.
    Nothing,
}

// ── Wire shapes ──

/// CryptoRank sends most numbers as strings; accept either.
fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(f64),
        Str(String),
    }
    match Option::<NumOrStr>::deserialize(d)? {
        None => Ok(None),
        Some(NumOrStr::Num(n)) => Ok(Some(n)),
        Some(NumOrStr::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(NumOrStr::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize, Default)]
struct PercentChange {
    #[serde(default, alias = "24h", deserialize_with = "lenient_f64")]
    h24: Option<f64>,
}

#[derive(Deserialize)]
struct RawCurrency {
    symbol: Option<String>,
    name: Option<String>,
    // Required key; a null value is tolerated and the row skipped.
    #[serde(deserialize_with = "lenient_f64")]
    price: Option<f64>,
    #[serde(default, rename = "change24h", deserialize_with = "lenient_f64")]
    change_24h: Option<f64>,
    #[serde(default, rename = "percentChange")]
    percent_change: Option<PercentChange>,
    #[serde(default, rename = "marketCap", deserialize_with = "lenient_f64")]
    market_cap: Option<f64>,
    #[serde(default)]
    rank: Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CurrencyPayload {
    Listing { data: Vec<RawCurrency> },
    BySymbol(HashMap<String, RawCurrency>),
}

#[derive(Deserialize)]
struct Listing<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct RawFund {
    name: String,
    #[serde(default, rename = "type")]
    category: Option<String>,
    #[serde(default)]
    tier: Option<u8>,
}

#[derive(Deserialize)]
struct RawActivity {
    name: String,
    #[serde(default, rename = "rewardType")]
    reward_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "totalRaised", deserialize_with = "lenient_f64")]
    total_raised: Option<f64>,
    #[serde(default, rename = "xScore", deserialize_with = "lenient_f64")]
    x_score: Option<f64>,
    #[serde(default, rename = "subscriberCount")]
    subscriber_count: Option<u64>,
}

impl RawCurrency {
    fn into_quote(self, key: Option<&str>) -> Option<Quote> {
        let symbol = self.symbol.or_else(|| key.map(str::to_string))?.to_ascii_uppercase();
        let price = self.price.filter(|p| p.is_finite())?;
        let change_24h = self
            .change_24h
            .or_else(|| self.percent_change.and_then(|pc| pc.h24));
        Some(Quote {
            symbol,
            name: self.name,
            price,
            change_24h,
            market_cap: self.market_cap,
            rank: self.rank,
        })
    }
}

/// Parse a `/currencies` body. Accepts the `{"data": [...]}` listing and a
/// map keyed by symbol. Rows without a usable price are skipped.
pub fn parse_currencies(body: &str) -> Result<Vec<Quote>, Failure> {
    let payload: CurrencyPayload = serde_json::from_str(body)?;
    let quotes = match payload {
        CurrencyPayload::Listing { data } => data.into_iter().filter_map(|c| c.into_quote(None)).collect(),
        CurrencyPayload::BySymbol(map) => {
            let mut quotes: Vec<Quote> = map
                .into_iter()
                .filter_map(|(key, c)| c.into_quote(Some(&key)))
                .collect();
            quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            quotes
        }
    };
    Ok(quotes)
}

pub fn parse_funds(body: &str) -> Result<Vec<FundRecord>, Failure> {
    let listing: Listing<RawFund> = serde_json::from_str(body)?;
    Ok(listing
        .data
        .into_iter()
        .map(|f| FundRecord {
            name: f.name,
            category: f.category.unwrap_or_else(|| "Unknown".into()),
            tier: f.tier,
        })
        .collect())
}

pub fn parse_activities(body: &str) -> Result<Vec<AirdropActivity>, Failure> {
    let listing: Listing<RawActivity> = serde_json::from_str(body)?;
    Ok(listing
        .data
        .into_iter()
        .map(|a| AirdropActivity {
            name: a.name,
            reward_type: a.reward_type.unwrap_or_else(|| "Unknown".into()),
            status: a.status.unwrap_or_else(|| "Unknown".into()),
            total_raised: a.total_raised,
            x_score: a.x_score,
            subscriber_count: a.subscriber_count,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_with_string_numbers() {
        let body = r#"{"data":[
            {"id":1,"symbol":"BTC","name":"Bitcoin","price":"65000.5","marketCap":"1280000000000","rank":1,"percentChange":{"h24":"2.3"}},
            {"id":2,"symbol":"eth","name":"Ethereum","price":3400,"change24h":-1.1,"rank":2}
        ],"status":{"usedCredits":1}}"#;
        let quotes = parse_currencies(body).unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].price, 65000.5);
        assert_eq!(quotes[0].change_24h, Some(2.3));
        assert_eq!(quotes[0].market_cap, Some(1.28e12));
        assert_eq!(quotes[1].symbol, "ETH");
        assert_eq!(quotes[1].change_24h, Some(-1.1));
        assert_eq!(quotes[1].market_cap, None);
    }

    #[test]
    fn symbol_keyed_map() {
        let body = r#"{"BTC": {"price": 65000, "change24h": 2.3}}"#;
        let quotes = parse_currencies(body).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "BTC");
        assert_eq!(quotes[0].price, 65000.0);
    }

    #[test]
    fn null_price_rows_are_skipped() {
        let body = r#"{"data":[{"symbol":"NEW","price":null},{"symbol":"SOL","price":"150"}]}"#;
        let quotes = parse_currencies(body).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "SOL");
    }

    #[test]
    fn schema_mismatch_is_parse_error() {
        assert!(matches!(parse_currencies(r#"{"data":"nope"}"#), Err(Failure::Parse(_))));
        assert!(matches!(parse_currencies(r#"{"status":{"code":1}}"#), Err(Failure::Parse(_))));
        assert!(matches!(parse_funds("[1,2,3]"), Err(Failure::Parse(_))));
        assert!(matches!(parse_activities("not json"), Err(Failure::Parse(_))));
    }

    #[test]
    fn funds_and_activities() {
        let funds = parse_funds(r#"{"data":[{"key":"a16z","name":"a16z crypto","type":"VC","tier":1},{"name":"Anon DAO"}]}"#).unwrap();
        assert_eq!(funds[0].category, "VC");
        assert_eq!(funds[0].tier, Some(1));
        assert_eq!(funds[1].category, "Unknown");
        assert_eq!(funds[1].tier, None);

        let acts = parse_activities(
            r#"{"data":[{"name":"LayerZero","rewardType":"Airdrop","status":"CONFIRMED","totalRaised":"263000000","xScore":812,"subscriberCount":1200}]}"#,
        )
        .unwrap();
        assert_eq!(acts[0].total_raised, Some(263_000_000.0));
        assert_eq!(acts[0].x_score, Some(812.0));
        assert_eq!(acts[0].subscriber_count, Some(1200));
    }
}
