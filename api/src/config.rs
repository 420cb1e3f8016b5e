use std::{collections::HashMap, env, time::Duration};

use anyhow::{bail, Context, Result};
use domain::ChainId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceSource {
    Mock,
    Rpc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriceSource {
    Mock,
    Coingecko,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub frontend_origins: Vec<String>,
    pub balance_source: BalanceSource,
    pub price_source: PriceSource,
    pub chain_rpc_urls: HashMap<ChainId, String>,
    pub coingecko_api_base: String,
    pub token_price_ids: HashMap<String, String>,
    pub token_prices: HashMap<String, f64>,
    pub price_cache_ttl: Duration,
    pub resolver_timeout: Duration,
    pub mock_latency: Duration,
    pub portfolio_poll_interval: Duration,
    pub snapshot_history_limit: usize,
    pub snapshot_account_limit: usize,
    pub session_idle_ttl: Duration,
    pub random_walk_volatility: f64,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            frontend_origins: vec!["http://localhost:3000".to_string()],
            balance_source: BalanceSource::Mock,
            price_source: PriceSource::Mock,
            chain_rpc_urls: HashMap::new(),
            coingecko_api_base: "https://api.coingecko.com/api/v3".to_string(),
            token_price_ids: HashMap::new(),
            token_prices: HashMap::new(),
            price_cache_ttl: Duration::from_secs(60),
            resolver_timeout: Duration::from_secs(10),
            mock_latency: Duration::ZERO,
            portfolio_poll_interval: Duration::from_secs(60),
            snapshot_history_limit: 100,
            snapshot_account_limit: 10_000,
            session_idle_ttl: Duration::from_secs(30 * 60),
            random_walk_volatility: price_engine::random_walk::DEFAULT_VOLATILITY,
            log_format: LogFormat::Json,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// 從任意 key lookup 建立設定；`from_env` 傳入的是 process 環境變數。
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let balance_source = match var("BALANCE_SOURCE")
            .map(|v| v.trim().to_lowercase())
            .as_deref()
        {
            None | Some("") | Some("mock") => BalanceSource::Mock,
            Some("rpc") => BalanceSource::Rpc,
            Some(other) => bail!("BALANCE_SOURCE must be `mock` or `rpc`, got `{other}`"),
        };
        let price_source = match var("PRICE_SOURCE").map(|v| v.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("mock") => PriceSource::Mock,
            Some("coingecko") => PriceSource::Coingecko,
            Some(other) => bail!("PRICE_SOURCE must be `mock` or `coingecko`, got `{other}`"),
        };
        let log_format = match var("LOG_FORMAT").map(|v| v.trim().to_lowercase()).as_deref() {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        let chain_rpc_urls = var("CHAIN_RPC_URLS")
            .map(|raw| parse_chain_urls(&raw))
            .unwrap_or_default();
        if balance_source == BalanceSource::Rpc && chain_rpc_urls.is_empty() {
            bail!("BALANCE_SOURCE=rpc requires CHAIN_RPC_URLS (e.g. `1=https://...`)");
        }

        let frontend_origins = var("FRONTEND_ORIGINS")
            .or_else(|| var("FRONTEND_ORIGIN"))
            .map(|raw| split_origins(&raw))
            .filter(|origins| !origins.is_empty())
            .unwrap_or(defaults.frontend_origins);

        let random_walk_volatility = var("RANDOM_WALK_VOLATILITY")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(defaults.random_walk_volatility);

        Ok(Self {
            port: match var("PORT") {
                Some(raw) => raw.trim().parse().context("PORT must be a valid u16")?,
                None => defaults.port,
            },
            frontend_origins,
            balance_source,
            price_source,
            chain_rpc_urls,
            coingecko_api_base: var("COINGECKO_API_BASE").unwrap_or(defaults.coingecko_api_base),
            token_price_ids: var("TOKEN_PRICE_IDS")
                .map(|raw| parse_token_price_ids(&raw))
                .unwrap_or_default(),
            token_prices: var("TOKEN_PRICES")
                .map(|raw| parse_token_prices(&raw))
                .unwrap_or_default(),
            price_cache_ttl: parse_duration(&var, "PRICE_CACHE_TTL_SECS", Duration::from_secs)
                .unwrap_or(defaults.price_cache_ttl),
            resolver_timeout: parse_duration(&var, "RESOLVER_TIMEOUT_SECS", Duration::from_secs)
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.resolver_timeout),
            mock_latency: parse_duration(&var, "MOCK_LATENCY_MS", Duration::from_millis)
                .unwrap_or(defaults.mock_latency),
            portfolio_poll_interval: parse_duration(
                &var,
                "PORTFOLIO_POLL_INTERVAL_SECS",
                Duration::from_secs,
            )
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.portfolio_poll_interval),
            snapshot_history_limit: var("SNAPSHOT_HISTORY_LIMIT")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.snapshot_history_limit),
            snapshot_account_limit: var("SNAPSHOT_ACCOUNT_LIMIT")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.snapshot_account_limit),
            session_idle_ttl: parse_duration(&var, "SESSION_IDLE_TTL_SECS", Duration::from_secs)
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.session_idle_ttl),
            random_walk_volatility,
            log_format,
        })
    }
}

fn parse_duration(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    unit: fn(u64) -> Duration,
) -> Option<Duration> {
    var(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(unit)
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_chain_urls(raw: &str) -> HashMap<ChainId, String> {
    raw.split(',')
        .filter_map(|item| {
            let (chain, url) = item.split_once('=')?;
            let chain_id = chain.trim().parse::<ChainId>().ok()?;
            let url = url.trim();
            if url.is_empty() {
                return None;
            }
            Some((chain_id, url.to_string()))
        })
        .collect()
}

fn parse_token_prices(raw: &str) -> HashMap<String, f64> {
    raw.split(',')
        .filter_map(|item| {
            let (symbol, value) = item.split_once('=')?;
            let price = value.trim().parse::<f64>().ok()?;
            let symbol = symbol.trim().to_uppercase();
            if symbol.is_empty() || !price.is_finite() || price < 0.0 {
                return None;
            }
            Some((symbol, price))
        })
        .collect()
}

fn parse_token_price_ids(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|item| {
            let (symbol, id) = item.split_once(':')?;
            let symbol = symbol.trim().to_uppercase();
            let id = id.trim().to_lowercase();
            if symbol.is_empty() || id.is_empty() {
                return None;
            }
            Some((symbol, id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = AppConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.balance_source, BalanceSource::Mock);
        assert_eq!(config.price_source, PriceSource::Mock);
        assert_eq!(config.resolver_timeout, Duration::from_secs(10));
        assert_eq!(config.snapshot_history_limit, 100);
        assert_eq!(config.snapshot_account_limit, 10_000);
        assert_eq!(config.session_idle_ttl, Duration::from_secs(1800));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.frontend_origins, vec!["http://localhost:3000"]);
    }

    #[test]
    fn parses_lists_and_durations() {
        let config = AppConfig::from_vars(vars(&[
            ("PORT", "9000"),
            ("FRONTEND_ORIGINS", "http://a.test, ,http://b.test"),
            ("CHAIN_RPC_URLS", "1=https://eth.test,137=https://poly.test,bad"),
            ("TOKEN_PRICES", "eth=2000,usdc=1,broken=x"),
            ("TOKEN_PRICE_IDS", "ETH:Ethereum"),
            ("MOCK_LATENCY_MS", "250"),
            ("RESOLVER_TIMEOUT_SECS", "0"),
            ("LOG_FORMAT", "pretty"),
            ("SESSION_IDLE_TTL_SECS", "120"),
            ("SNAPSHOT_ACCOUNT_LIMIT", "50"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.frontend_origins.len(), 2);
        assert_eq!(config.chain_rpc_urls.len(), 2);
        assert_eq!(config.token_prices.get("ETH"), Some(&2000.0));
        assert!(!config.token_prices.contains_key("BROKEN"));
        assert_eq!(config.token_price_ids.get("ETH").unwrap(), "ethereum");
        assert_eq!(config.mock_latency, Duration::from_millis(250));
        assert_eq!(config.resolver_timeout, Duration::from_secs(10));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.session_idle_ttl, Duration::from_secs(120));
        assert_eq!(config.snapshot_account_limit, 50);
    }

    #[test]
    fn rejects_unknown_sources() {
        assert!(AppConfig::from_vars(vars(&[("BALANCE_SOURCE", "ledger")])).is_err());
        assert!(AppConfig::from_vars(vars(&[("PRICE_SOURCE", "oracle")])).is_err());
        assert!(AppConfig::from_vars(vars(&[("PORT", "eighty")])).is_err());
    }

    #[test]
    fn rpc_source_needs_endpoints() {
        assert!(AppConfig::from_vars(vars(&[("BALANCE_SOURCE", "rpc")])).is_err());
        let config = AppConfig::from_vars(vars(&[
            ("BALANCE_SOURCE", "RPC"),
            ("CHAIN_RPC_URLS", "1=http://localhost:8545"),
        ]))
        .unwrap();
        assert_eq!(config.balance_source, BalanceSource::Rpc);
    }
}
