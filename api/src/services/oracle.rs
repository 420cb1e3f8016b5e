use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Account, Balances, ChainId, PricePoint, TimeRange, TokenRegistry};
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use resolvers::{BalanceResolver, ResolutionResult};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::repositories::PriceCacheRepository;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("no price known for {0}")]
    Missing(String),
    #[error("price request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("price source returned status {0}")]
    Status(StatusCode),
    #[error("unexpected price payload: {0}")]
    Payload(String),
    #[error("primary: {primary}; fallback: {fallback}")]
    Exhausted { primary: String, fallback: String },
}

pub type OracleResult<T> = Result<T, OracleError>;

/// Spot USD price for a token symbol on a chain.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price_usd(&self, symbol: &str, chain_id: ChainId) -> OracleResult<f64>;
}

/// Registry prices, with configured overrides taking precedence.
#[derive(Clone, Default)]
pub struct StaticPriceOracle {
    prices: HashMap<String, f64>,
}

impl StaticPriceOracle {
    pub fn new(prices: HashMap<String, f64>) -> Self {
        Self {
            prices: prices
                .into_iter()
                .map(|(symbol, price)| (symbol.to_uppercase(), price))
                .collect(),
        }
    }

    pub fn from_registry(registry: &TokenRegistry, overrides: &HashMap<String, f64>) -> Self {
        let mut prices: HashMap<String, f64> = registry
            .all()
            .iter()
            .map(|token| (token.symbol.to_uppercase(), token.price))
            .collect();
        for (symbol, price) in overrides {
            prices.insert(symbol.to_uppercase(), *price);
        }
        Self { prices }
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn price_usd(&self, symbol: &str, _chain_id: ChainId) -> OracleResult<f64> {
        self.prices
            .get(&symbol.to_uppercase())
            .copied()
            .ok_or_else(|| OracleError::Missing(symbol.to_string()))
    }
}

#[derive(Clone, Copy)]
struct CachedQuote {
    price: f64,
    fetched_at: Instant,
}

#[derive(Clone)]
pub struct CoingeckoPriceOracle {
    client: Client,
    api_base: String,
    ids: HashMap<String, String>,
    cache: Arc<RwLock<HashMap<String, CachedQuote>>>,
    ttl: Duration,
}

/// 單次 HTTP 請求上限，避免上游卡住時整條鏈一起等
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client(timeout: Duration) -> Client {
    Client::builder().timeout(timeout).build().unwrap_or_else(|err| {
        warn!(error = %err, "http client build failed, using defaults");
        Client::new()
    })
}

impl CoingeckoPriceOracle {
    pub fn new(api_base: String, ids: HashMap<String, String>, ttl: Duration) -> Self {
        Self {
            client: http_client(DEFAULT_REQUEST_TIMEOUT),
            api_base: api_base.trim_end_matches('/').to_string(),
            ids,
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Caps every request (connect through body) at `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    pub fn coingecko_id(&self, symbol: &str) -> String {
        let upper = symbol.to_uppercase();
        if let Some(mapped) = self.ids.get(&upper) {
            return mapped.clone();
        }
        match upper.as_str() {
            "ETH" | "WETH" => "ethereum".to_string(),
            "BTC" => "bitcoin".to_string(),
            "WBTC" => "wrapped-bitcoin".to_string(),
            "USDC" => "usd-coin".to_string(),
            "USDT" => "tether".to_string(),
            "DAI" => "dai".to_string(),
            "MATIC" => "matic-network".to_string(),
            "ARB" => "arbitrum".to_string(),
            "UNI" => "uniswap".to_string(),
            "LINK" => "chainlink".to_string(),
            _ => upper.to_lowercase(),
        }
    }

    async fn cached(&self, symbol: &str) -> Option<(f64, bool)> {
        let cache = self.cache.read().await;
        cache
            .get(symbol)
            .map(|entry| (entry.price, entry.fetched_at.elapsed() <= self.ttl))
    }

    async fn store(&self, symbol: &str, price: f64) {
        let mut cache = self.cache.write().await;
        cache.insert(
            symbol.to_string(),
            CachedQuote {
                price,
                fetched_at: Instant::now(),
            },
        );
    }

    async fn fetch_spot(&self, symbol: &str) -> OracleResult<f64> {
        let id = self.coingecko_id(symbol);
        let resp = self
            .client
            .get(format!("{}/simple/price", self.api_base))
            .query(&[("ids", id.as_str()), ("vs_currencies", "usd")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(OracleError::Status(resp.status()));
        }
        let body: serde_json::Value = resp.json().await?;
        body.get(&id)
            .and_then(|entry| entry.get("usd"))
            .and_then(|value| value.as_f64())
            .ok_or_else(|| OracleError::Payload(format!("no usd price for {symbol} ({id})")))
    }

    /// Raw `[timestamp_ms, price]` history covering `range`, oldest first.
    pub async fn fetch_market_chart(
        &self,
        symbol: &str,
        range: TimeRange,
    ) -> OracleResult<Vec<PricePoint>> {
        let id = self.coingecko_id(symbol);
        let days = range_days(range).to_string();
        let resp = self
            .client
            .get(format!("{}/coins/{}/market_chart", self.api_base, id))
            .query(&[("vs_currency", "usd"), ("days", days.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(OracleError::Status(resp.status()));
        }
        let body: serde_json::Value = resp.json().await?;
        parse_market_chart(&body)
    }
}

#[async_trait]
impl PriceOracle for CoingeckoPriceOracle {
    async fn price_usd(&self, symbol: &str, _chain_id: ChainId) -> OracleResult<f64> {
        let symbol = symbol.to_uppercase();
        let cached = self.cached(&symbol).await;
        if let Some((price, true)) = cached {
            return Ok(price);
        }
        match self.fetch_spot(&symbol).await {
            Ok(price) => {
                self.store(&symbol, price).await;
                Ok(price)
            }
            Err(err) => match cached {
                Some((stale, false)) => {
                    warn!(
                        error = %err,
                        %symbol,
                        price = stale,
                        "coingecko failed, serving stale price"
                    );
                    Ok(stale)
                }
                _ => Err(err),
            },
        }
    }
}

fn range_days(range: TimeRange) -> u32 {
    match range {
        TimeRange::OneDay => 1,
        TimeRange::OneWeek => 7,
        TimeRange::OneMonth => 30,
        TimeRange::OneYear => 365,
    }
}

fn parse_market_chart(body: &serde_json::Value) -> OracleResult<Vec<PricePoint>> {
    let prices = body
        .get("prices")
        .and_then(|v| v.as_array())
        .ok_or_else(|| OracleError::Payload("market_chart missing prices".to_string()))?;

    let points = prices
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let ts_ms = pair.first()?.as_f64()? as i64;
            let price = pair.get(1)?.as_f64()?;
            let timestamp = DateTime::<Utc>::from_timestamp_millis(ts_ms)?;
            Some(PricePoint { timestamp, price })
        })
        .collect();
    Ok(points)
}

/// 先試 `primary`，失敗或報價 <= 0 時改用 `fallback`。
#[derive(Clone)]
pub struct FallbackPriceOracle<P, F>
where
    P: PriceOracle,
    F: PriceOracle,
{
    primary: Arc<P>,
    fallback: Arc<F>,
}

impl<P, F> FallbackPriceOracle<P, F>
where
    P: PriceOracle,
    F: PriceOracle,
{
    pub fn new(primary: Arc<P>, fallback: Arc<F>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P, F> PriceOracle for FallbackPriceOracle<P, F>
where
    P: PriceOracle,
    F: PriceOracle,
{
    async fn price_usd(&self, symbol: &str, chain_id: ChainId) -> OracleResult<f64> {
        let primary_err = match self.primary.price_usd(symbol, chain_id).await {
            Ok(price) if price > 0.0 => return Ok(price),
            Ok(price) => format!("non-positive price {price}"),
            Err(err) => err.to_string(),
        };
        debug!(%symbol, chain_id, error = %primary_err, "primary oracle missed, trying fallback");
        match self.fallback.price_usd(symbol, chain_id).await {
            Ok(price) if price > 0.0 => Ok(price),
            Ok(price) => Err(OracleError::Exhausted {
                primary: primary_err,
                fallback: format!("non-positive price {price}"),
            }),
            Err(err) => Err(OracleError::Exhausted {
                primary: primary_err,
                fallback: err.to_string(),
            }),
        }
    }
}

/// Read-through cache over a [`PriceCacheRepository`]，以降低外部 API 請求。
#[derive(Clone)]
pub struct CachedPriceOracle<O> {
    inner: Arc<O>,
    cache_repo: Arc<dyn PriceCacheRepository>,
    ttl: Duration,
    source: String,
}

impl<O> CachedPriceOracle<O> {
    pub fn new(inner: Arc<O>, cache_repo: Arc<dyn PriceCacheRepository>, ttl: Duration) -> Self {
        Self {
            inner,
            cache_repo,
            ttl: ttl.max(Duration::from_secs(1)),
            source: "oracle".to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

#[async_trait]
impl<O> PriceOracle for CachedPriceOracle<O>
where
    O: PriceOracle,
{
    async fn price_usd(&self, symbol: &str, chain_id: ChainId) -> OracleResult<f64> {
        let symbol = symbol.to_uppercase();
        match self
            .cache_repo
            .get_cached_price(&symbol, chain_id, Utc::now())
            .await
        {
            Ok(Some(price)) if price > 0.0 => return Ok(price),
            Ok(_) => {}
            Err(err) => warn!(error = %err, %symbol, "price cache read failed"),
        }
        let price = self.inner.price_usd(&symbol, chain_id).await?;
        if let Err(err) = self
            .cache_repo
            .upsert_price(
                &symbol,
                chain_id,
                price,
                self.ttl.as_secs() as i64,
                &self.source,
            )
            .await
        {
            warn!(error = %err, %symbol, "price cache upsert failed");
        }
        Ok(price)
    }
}

/// Re-prices resolved balances through an oracle. A token the oracle cannot price keeps its
/// registry price.
#[derive(Clone)]
pub struct PricedBalanceResolver {
    inner: Arc<dyn BalanceResolver>,
    oracle: Arc<dyn PriceOracle>,
}

impl PricedBalanceResolver {
    pub fn new(inner: Arc<dyn BalanceResolver>, oracle: Arc<dyn PriceOracle>) -> Self {
        Self { inner, oracle }
    }
}

#[async_trait]
impl BalanceResolver for PricedBalanceResolver {
    async fn resolve(
        &self,
        account: &Account,
        chain_ids: &[ChainId],
    ) -> ResolutionResult<Balances> {
        let mut balances = self.inner.resolve(account, chain_ids).await?;
        let quotes = join_all(balances.iter().map(|entry| {
            let symbol = entry.token.symbol.clone();
            let chain_id = entry.token.chain_id;
            async move { self.oracle.price_usd(&symbol, chain_id).await }
        }))
        .await;

        for (entry, quote) in balances.iter_mut().zip(quotes) {
            match quote {
                Ok(price) if price.is_finite() && price >= 0.0 => entry.token.price = price,
                Ok(price) => debug!(
                    symbol = %entry.token.symbol,
                    price,
                    "ignoring unusable oracle price"
                ),
                Err(err) => debug!(
                    symbol = %entry.token.symbol,
                    chain_id = entry.token.chain_id,
                    error = %err,
                    "oracle miss, keeping registry price"
                ),
            }
        }
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use domain::{TokenKey, ETHEREUM, NATIVE_TOKEN_ADDRESS};
    use resolvers::StaticBalanceResolver;

    use super::*;
    use crate::repositories::InMemoryPriceCacheRepository;

    #[derive(Default)]
    struct CountingOracle {
        calls: AtomicUsize,
        price: f64,
    }

    #[async_trait]
    impl PriceOracle for CountingOracle {
        async fn price_usd(&self, _symbol: &str, _chain_id: ChainId) -> OracleResult<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.price)
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl PriceOracle for FailingOracle {
        async fn price_usd(&self, symbol: &str, _chain_id: ChainId) -> OracleResult<f64> {
            Err(OracleError::Missing(symbol.to_string()))
        }
    }

    #[tokio::test]
    async fn static_oracle_prefers_overrides() {
        let registry = TokenRegistry::default_tokens();
        let overrides = HashMap::from([("eth".to_string(), 2000.0)]);
        let oracle = StaticPriceOracle::from_registry(&registry, &overrides);
        assert_eq!(oracle.price_usd("ETH", 1).await.unwrap(), 2000.0);
        assert_eq!(oracle.price_usd("usdc", 1).await.unwrap(), 1.0);
        assert!(matches!(
            oracle.price_usd("DOGE", 1).await,
            Err(OracleError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn fallback_covers_failures_and_zero_quotes() {
        let fallback = Arc::new(StaticPriceOracle::new(HashMap::from([(
            "ETH".to_string(),
            1800.0,
        )])));
        let failing = FallbackPriceOracle::new(Arc::new(FailingOracle), fallback.clone());
        assert_eq!(failing.price_usd("ETH", 1).await.unwrap(), 1800.0);

        let zero = FallbackPriceOracle::new(
            Arc::new(CountingOracle {
                price: 0.0,
                ..Default::default()
            }),
            fallback,
        );
        assert_eq!(zero.price_usd("ETH", 1).await.unwrap(), 1800.0);

        let both = FallbackPriceOracle::new(Arc::new(FailingOracle), Arc::new(FailingOracle));
        assert!(matches!(
            both.price_usd("ETH", 1).await,
            Err(OracleError::Exhausted { .. })
        ));
    }

    #[tokio::test]
    async fn cached_oracle_hits_inner_once_per_ttl() {
        let inner = Arc::new(CountingOracle {
            price: 3450.0,
            ..Default::default()
        });
        let oracle = CachedPriceOracle::new(
            inner.clone(),
            Arc::new(InMemoryPriceCacheRepository::new()),
            Duration::from_secs(60),
        );
        assert_eq!(oracle.price_usd("eth", 1).await.unwrap(), 3450.0);
        assert_eq!(oracle.price_usd("ETH", 1).await.unwrap(), 3450.0);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        oracle.price_usd("ETH", 137).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn priced_balances_use_oracle_and_keep_registry_on_miss() {
        let registry = Arc::new(TokenRegistry::default_tokens());
        let account = Account::parse("0x00000000000000000000000000000000000000aa").unwrap();
        let eth = TokenKey::new(ETHEREUM, NATIVE_TOKEN_ADDRESS);
        let usdc = registry.by_symbol(ETHEREUM, "USDC").unwrap().key();
        let inner = StaticBalanceResolver::new(registry.clone())
            .with_holding(account.clone(), eth.clone(), 0.5)
            .with_holding(account.clone(), usdc.clone(), 100.0);

        let oracle = StaticPriceOracle::new(HashMap::from([("ETH".to_string(), 2000.0)]));
        let priced = PricedBalanceResolver::new(Arc::new(inner), Arc::new(oracle));
        let balances = priced.resolve(&account, &[ETHEREUM]).await.unwrap();

        assert_eq!(balances.get(&eth).unwrap().token.price, 2000.0);
        assert_eq!(
            balances.get(&usdc).unwrap().token.price,
            registry.get(&usdc).unwrap().price
        );
        assert_eq!(balances.total_value_usd(), 1100.0);
    }

    #[test]
    fn market_chart_payload_is_parsed() {
        let body = serde_json::json!({
            "prices": [[1717243200000.0, 3500.5], [1717246800000_i64, 3510.0], ["bad"]]
        });
        let points = parse_market_chart(&body).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].price, 3500.5);
        assert!(points[1].timestamp > points[0].timestamp);
        assert!(parse_market_chart(&serde_json::json!({})).is_err());
    }

    #[test]
    fn coingecko_ids_honor_configured_mapping() {
        let oracle = CoingeckoPriceOracle::new(
            "https://example.test/api/v3/".to_string(),
            HashMap::from([("PEPE".to_string(), "pepe".to_string())]),
            Duration::from_secs(60),
        );
        assert_eq!(oracle.coingecko_id("pepe"), "pepe");
        assert_eq!(oracle.coingecko_id("weth"), "ethereum");
        assert_eq!(oracle.coingecko_id("matic"), "matic-network");
    }
}
