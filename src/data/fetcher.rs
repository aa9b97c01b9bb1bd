use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;

use crate::config::Config;
use crate::data::cache::TtlCache;
use crate::data::parser::{self, AirdropActivity, FundRecord, MarketSnapshot, Quote};
use crate::error::Failure;

/// Gainers/losers lists skip micro caps below this market cap (USD).
pub const MIN_MOVER_MARKET_CAP: f64 = 10_000_000.0;

/// Drophunting statuses that mean the activity is over.
const FINISHED_STATUSES: &[&str] = &["ENDED", "FINISHED", "CLOSED", "DISTRIBUTED", "COMPLETED"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendFilter {
    Gainers,
    Losers,
}

impl TrendFilter {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Gainers => "Top Gainers",
            Self::Losers => "Top Losers",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Currencies,
    Funds,
    Drophunting,
}

impl Endpoint {
    fn path(&self) -> &'static str {
        match self {
            Self::Currencies => "/currencies",
            Self::Funds => "/funds/map",
            Self::Drophunting => "/drophunting/activities",
        }
    }
}

/// Exponential backoff: `base * 2^attempt`, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }

    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        retry_after.unwrap_or(backoff).min(self.max_delay)
    }
}

struct AttemptError {
    failure: Failure,
    retry_after: Option<Duration>,
}

impl From<Failure> for AttemptError {
    fn from(failure: Failure) -> Self {
        Self { failure, retry_after: None }
    }
}

/// CryptoRank v2 REST client with retry and a short-lived response cache.
pub struct CryptoRankClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    cache: TtlCache<String, String>,
}

impl CryptoRankClient {
    pub fn new(http: reqwest::Client, cfg: &Config) -> Self {
        Self {
            http,
            base_url: cfg.cryptorank_base_url.clone(),
            api_key: cfg.cryptorank_api_key.clone(),
            retry: RetryPolicy::new(cfg.max_retries),
            cache: TtlCache::new(cfg.cache_ttl),
        }
    }

    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Latest quotes for the requested tickers, in request order.
    pub async fn fetch_prices(&self, symbols: &[String]) -> Result<MarketSnapshot, Failure> {
        if symbols.is_empty() {
            return Err(Failure::NotFound("an empty symbol list".into()));
        }
        let joined = symbols.join(",");
        let query = [
            ("symbol", joined.clone()),
            ("limit", "100".to_string()),
            ("sortBy", "rank".to_string()),
            ("sortDirection", "ASC".to_string()),
            ("include", "percentChange".to_string()),
        ];
        let rows = self.get(Endpoint::Currencies, &query, &joined, parser::parse_currencies).await?;

        let mut quotes = Vec::new();
        let mut missing = Vec::new();
        for symbol in symbols {
            // Rows arrive rank-ascending, so the first ticker match is the main asset.
            match rows.iter().find(|q| q.symbol.eq_ignore_ascii_case(symbol)) {
                Some(q) => quotes.push(q.clone()),
                None => missing.push(symbol.clone()),
            }
        }
        if quotes.is_empty() {
            return Err(Failure::NotFound(joined));
        }
        Ok(MarketSnapshot { quotes, missing, fetched_at: Utc::now() })
    }

    /// Market-cap leaders, or the biggest 24h movers when a filter is given.
    pub async fn fetch_trending(&self, filter: Option<TrendFilter>, limit: usize) -> Result<Vec<Quote>, Failure> {
        let (sort_by, direction) = match filter {
            None => ("marketCap", "DESC"),
            Some(TrendFilter::Gainers) => ("percentChange", "DESC"),
            Some(TrendFilter::Losers) => ("percentChange", "ASC"),
        };
        let query = [
            ("limit", "100".to_string()),
            ("sortBy", sort_by.to_string()),
            ("sortDirection", direction.to_string()),
            ("include", "percentChange".to_string()),
        ];
        let quotes: Vec<Quote> = self
            .get(Endpoint::Currencies, &query, "trending assets", parser::parse_currencies)
            .await?
            .into_iter()
            .filter(|q| filter.is_none() || q.market_cap.unwrap_or(0.0) >= MIN_MOVER_MARKET_CAP)
            .take(limit.max(1))
            .collect();
        if quotes.is_empty() {
            return Err(Failure::NotFound("trending assets".into()));
        }
        Ok(quotes)
    }

    pub async fn fetch_funds(&self, tier: Option<u8>) -> Result<Vec<FundRecord>, Failure> {
        let subject = match tier {
            Some(t) => format!("tier {t} funds"),
            None => "funds".to_string(),
        };
        let funds: Vec<FundRecord> = self
            .get(Endpoint::Funds, &[], &subject, parser::parse_funds)
            .await?
            .into_iter()
            .filter(|f| tier.is_none() || f.tier == tier)
            .collect();
        if funds.is_empty() {
            return Err(Failure::NotFound(subject));
        }
        Ok(funds)
    }

    pub async fn fetch_drophunting(
        &self,
        active_only: bool,
        status: Option<&str>,
    ) -> Result<Vec<AirdropActivity>, Failure> {
        let mut query = vec![
            ("limit", "20".to_string()),
            ("sortBy", "lastStatusUpdate".to_string()),
            ("sortDirection", "DESC".to_string()),
        ];
        if let Some(s) = status {
            query.push(("status", s.to_ascii_uppercase()));
        }
        let activities: Vec<AirdropActivity> = self
            .get(Endpoint::Drophunting, &query, "drophunting activities", parser::parse_activities)
            .await?
            .into_iter()
            .filter(|a| !active_only || !is_finished(&a.status))
            .collect();
        if activities.is_empty() {
            return Err(Failure::NotFound("drophunting activities".into()));
        }
        Ok(activities)
    }

    /// GET, parse, and cache. Only bodies that parse are cached, and every
    /// parse failure is logged here with its detail.
    async fn get<T>(
        &self,
        endpoint: Endpoint,
        query: &[(&str, String)],
        subject: &str,
        parse: fn(&str) -> Result<T, Failure>,
    ) -> Result<T, Failure> {
        let api_key = self.api_key.as_deref().ok_or(Failure::ConfigMissing("CRYPTORANK_API_KEY"))?;
        let mut url = reqwest::Url::parse(&format!("{}{}", self.base_url, endpoint.path()))
            .map_err(|e| Failure::Network(format!("invalid URL: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        let key = url.to_string();

        let result = match self.cache.get(&key) {
            Some(body) => {
                tracing::debug!(endpoint = endpoint.path(), "Cache hit");
                parse(&body)
            }
            None => match self.get_with_retry(url, api_key, endpoint, subject).await {
                Ok(body) => {
                    let parsed = parse(&body);
                    if parsed.is_ok() {
                        self.cache.insert(key, body);
                    }
                    parsed
                }
                Err(e) => Err(e),
            },
        };
        if let Err(Failure::Parse(detail)) = &result {
            tracing::error!(endpoint = endpoint.path(), detail = %detail, "CryptoRank response did not parse");
        }
        result
    }

    async fn get_with_retry(
        &self,
        url: reqwest::Url,
        api_key: &str,
        endpoint: Endpoint,
        subject: &str,
    ) -> Result<String, Failure> {
        let mut attempt = 0;
        loop {
            match self.get_once(url.clone(), api_key, endpoint, subject).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    attempt += 1;
                    if !e.failure.is_retryable() || attempt >= self.retry.max_attempts {
                        return Err(e.failure);
                    }
                    let wait = self.retry.delay(attempt - 1, e.retry_after);
                    tracing::warn!(
                        attempt,
                        endpoint = endpoint.path(),
                        error = %e.failure,
                        wait_ms = wait.as_millis() as u64,
                        "CryptoRank request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn get_once(
        &self,
        url: reqwest::Url,
        api_key: &str,
        endpoint: Endpoint,
        subject: &str,
    ) -> Result<String, AttemptError> {
        let resp = self
            .http
            .get(url)
            .header("X-Api-Key", api_key)
            .send()
            .await
            .map_err(Failure::from)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp.text().await.map_err(Failure::from)?);
        }

        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = resp.text().await.unwrap_or_default();

        let failure = match status {
            StatusCode::UNAUTHORIZED => Failure::Unauthorized,
            StatusCode::PAYMENT_REQUIRED => Failure::PlanRestricted,
            StatusCode::FORBIDDEN if endpoint == Endpoint::Drophunting || mentions_plan(&body) => {
                Failure::PlanRestricted
            }
            StatusCode::FORBIDDEN => Failure::Unauthorized,
            StatusCode::NOT_FOUND => Failure::NotFound(subject.to_string()),
            other => Failure::Upstream(other.as_u16()),
        };
        Err(AttemptError { failure, retry_after })
    }
}

fn mentions_plan(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    ["plan", "subscription", "upgrade"].iter().any(|w| lower.contains(w))
}

fn is_finished(status: &str) -> bool {
    FINISHED_STATUSES.iter().any(|s| status.eq_ignore_ascii_case(s))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mockito::Matcher;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Accepts connections and never answers. Returns the base URL and a
    /// count of accepted connections.
    pub(crate) async fn silent_server() -> (String, Arc<AtomicU32>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicU32::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });
        (format!("http://{addr}"), accepted)
    }

    /// Log sink for asserting on emitted events.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn test_config(base_url: &str, key: Option<&str>) -> Config {
        let mut vars = vec![
            ("TELEGRAM_BOT_TOKEN".to_string(), "123:test".to_string()),
            ("CRYPTORANK_API_BASE_URL".to_string(), base_url.to_string()),
        ];
        if let Some(k) = key {
            vars.push(("CRYPTORANK_API_KEY".to_string(), k.to_string()));
        }
        Config::from_vars(|k| vars.iter().find(|(n, _)| n == k).map(|(_, v)| v.clone())).unwrap()
    }

    fn client(base_url: &str) -> CryptoRankClient {
        let cfg = test_config(base_url, Some("test-key"));
        CryptoRankClient::new(reqwest::Client::new(), &cfg).with_retry(fast_retry())
    }

    #[tokio::test]
    async fn prices_from_mocked_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/currencies")
            .match_header("x-api-key", "test-key")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTC".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"BTC": {"price": 65000, "change24h": 2.3}}"#)
            .create_async()
            .await;

        let snap = client(&server.url()).fetch_prices(&["BTC".to_string()]).await.unwrap();
        assert_eq!(snap.get("BTC").unwrap().price, 65000.0);
        assert_eq!(snap.get("BTC").unwrap().change_24h, Some(2.3));
        assert!(snap.missing.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn partial_symbol_match_reports_missing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/currencies")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":[{"symbol":"ETH","price":"3400","rank":2}]}"#)
            .create_async()
            .await;

        let snap = client(&server.url())
            .fetch_prices(&["BTC".to_string(), "ETH".to_string()])
            .await
            .unwrap();
        assert_eq!(snap.quotes.len(), 1);
        assert_eq!(snap.missing, vec!["BTC".to_string()]);
    }

    #[tokio::test]
    async fn no_rows_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/currencies")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;

        let err = client(&server.url()).fetch_prices(&["ZZZ".to_string()]).await.unwrap_err();
        assert_eq!(err, Failure::NotFound("ZZZ".into()));
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/currencies")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"message":"Invalid API key"}"#)
            .expect(1)
            .create_async()
            .await;

        let err = client(&server.url()).fetch_prices(&["BTC".to_string()]).await.unwrap_err();
        assert_eq!(err, Failure::Unauthorized);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limited_then_success() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("GET", "/currencies")
            .match_query(Matcher::Any)
            .with_status(429)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/currencies")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":[{"symbol":"BTC","price":"65000"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let snap = client(&server.url()).fetch_prices(&["BTC".to_string()]).await.unwrap();
        assert_eq!(snap.quotes[0].price, 65000.0);
        limited.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_exhaust_retry_budget() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/funds/map")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = client(&server.url()).fetch_funds(None).await.unwrap_err();
        assert_eq!(err, Failure::Upstream(503));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn drophunting_forbidden_is_plan_restricted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/drophunting/activities")
            .match_query(Matcher::Any)
            .with_status(403)
            .create_async()
            .await;

        let err = client(&server.url()).fetch_drophunting(true, None).await.unwrap_err();
        assert_eq!(err, Failure::PlanRestricted);
    }

    #[tokio::test]
    async fn drophunting_active_filter_and_status_param() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/drophunting/activities")
            .match_query(Matcher::UrlEncoded("status".into(), "POTENTIAL".into()))
            .with_status(200)
            .with_body(r#"{"data":[{"name":"A","status":"POTENTIAL"},{"name":"B","status":"ENDED"}]}"#)
            .create_async()
            .await;

        let c = client(&server.url());
        let active = c.fetch_drophunting(true, Some("potential")).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "A");
    }

    #[tokio::test]
    async fn funds_tier_filter() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/funds/map")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":[{"name":"a16z","type":"VC","tier":1},{"name":"Small","type":"Angel","tier":3}]}"#)
            .create_async()
            .await;

        let c = client(&server.url());
        let tier1 = c.fetch_funds(Some(1)).await.unwrap();
        assert_eq!(tier1.len(), 1);
        assert_eq!(tier1[0].name, "a16z");
        assert_eq!(c.fetch_funds(Some(2)).await.unwrap_err(), Failure::NotFound("tier 2 funds".into()));
    }

    #[tokio::test]
    async fn movers_skip_micro_caps() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/currencies")
            .match_query(Matcher::UrlEncoded("sortDirection".into(), "DESC".into()))
            .with_status(200)
            .with_body(
                r#"{"data":[
                {"symbol":"TINY","price":"0.01","marketCap":"5000","percentChange":{"h24":"900"}},
                {"symbol":"SOL","price":"150","marketCap":"70000000000","percentChange":{"h24":"12"}}
            ]}"#,
            )
            .create_async()
            .await;

        let movers = client(&server.url()).fetch_trending(Some(TrendFilter::Gainers), 10).await.unwrap();
        assert_eq!(movers.len(), 1);
        assert_eq!(movers[0].symbol, "SOL");
    }

    #[tokio::test]
    async fn repeated_requests_hit_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/funds/map")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":[{"name":"a16z","type":"VC","tier":1}]}"#)
            .expect(1)
            .create_async()
            .await;

        let c = client(&server.url());
        c.fetch_funds(None).await.unwrap();
        c.fetch_funds(None).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unparseable_body_is_not_cached() {
        let mut server = mockito::Server::new_async().await;
        let broken = server
            .mock("GET", "/funds/map")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error":"maintenance"}"#)
            .expect(1)
            .create_async()
            .await;

        let c = client(&server.url());
        assert!(matches!(c.fetch_funds(None).await, Err(Failure::Parse(_))));
        broken.assert_async().await;
        broken.remove_async().await;

        let healthy = server
            .mock("GET", "/funds/map")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":[{"name":"a16z","type":"VC","tier":1}]}"#)
            .expect(1)
            .create_async()
            .await;
        assert_eq!(c.fetch_funds(None).await.unwrap()[0].name, "a16z");
        healthy.assert_async().await;
    }

    #[tokio::test]
    async fn schema_mismatch_is_logged_with_detail() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/currencies")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":"nope"}"#)
            .create_async()
            .await;

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::ERROR)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let err = client(&server.url()).fetch_prices(&["BTC".to_string()]).await.unwrap_err();
        assert!(matches!(err, Failure::Parse(_)));
        let out = logs.contents();
        assert!(out.contains("ERROR"), "{out}");
        assert!(out.contains("did not parse"), "{out}");
        assert!(out.contains("/currencies"), "{out}");
        assert!(out.contains("did not match any variant"), "{out}");
    }

    #[tokio::test]
    async fn timeouts_are_retried_then_surfaced() {
        let (url, accepted) = silent_server().await;
        let cfg = test_config(&url, Some("test-key"));
        let http = reqwest::Client::builder().timeout(Duration::from_millis(50)).build().unwrap();
        let c = CryptoRankClient::new(http, &cfg).with_retry(fast_retry());

        assert_eq!(c.fetch_funds(None).await.unwrap_err(), Failure::Timeout);
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn missing_key_fails_without_request() {
        let cfg = test_config("http://127.0.0.1:9", None);
        let c = CryptoRankClient::new(reqwest::Client::new(), &cfg);
        let err = c.fetch_funds(None).await.unwrap_err();
        assert_eq!(err, Failure::ConfigMissing("CRYPTORANK_API_KEY"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.delay(0, None), Duration::from_millis(500));
        assert_eq!(policy.delay(1, None), Duration::from_millis(1000));
        assert_eq!(policy.delay(10, None), Duration::from_secs(5));
        assert_eq!(policy.delay(0, Some(Duration::from_secs(60))), Duration::from_secs(5));
    }
}
