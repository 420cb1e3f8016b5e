use std::sync::Arc;

use anyhow::Result;
use domain::TokenRegistry;
use price_engine::{PriceSeriesSource, RandomWalkSource};
use resolvers::{
    demo_adapters, BalanceResolver, CompositePositionResolver, MockTransactionResolver,
    RandomBalanceResolver,
};
use tracing::info;

use crate::{
    config::{AppConfig, BalanceSource, PriceSource},
    repositories::InMemoryPriceCacheRepository,
    services::{
        CachedPriceOracle, CoingeckoHistorySource, CoingeckoPriceOracle, DashboardRefresher,
        FallbackPriceOracle, PriceOracle, PricedBalanceResolver, RpcBalanceResolver,
        StaticPriceOracle,
    },
    state::{AppState, Backends},
};

pub fn build_state(config: &AppConfig) -> Result<AppState> {
    let registry = Arc::new(TokenRegistry::default_tokens().with_prices(&config.token_prices));
    let static_oracle = Arc::new(StaticPriceOracle::from_registry(
        &registry,
        &config.token_prices,
    ));

    let (oracle, price_series): (Arc<dyn PriceOracle>, Arc<dyn PriceSeriesSource>) =
        match config.price_source {
            PriceSource::Mock => {
                let walk = RandomWalkSource::new()
                    .with_volatility(config.random_walk_volatility)
                    .with_latency(config.mock_latency);
                (static_oracle, Arc::new(walk))
            }
            PriceSource::Coingecko => {
                let coingecko = Arc::new(
                    CoingeckoPriceOracle::new(
                        config.coingecko_api_base.clone(),
                        config.token_price_ids.clone(),
                        config.price_cache_ttl,
                    )
                    .with_request_timeout(config.resolver_timeout),
                );
                let cached = CachedPriceOracle::new(
                    Arc::new(FallbackPriceOracle::new(coingecko.clone(), static_oracle)),
                    Arc::new(InMemoryPriceCacheRepository::new()),
                    config.price_cache_ttl,
                )
                .with_source("coingecko");
                (
                    Arc::new(cached),
                    Arc::new(CoingeckoHistorySource::new(coingecko)),
                )
            }
        };

    let raw_balances: Arc<dyn BalanceResolver> = match config.balance_source {
        BalanceSource::Mock => Arc::new(
            RandomBalanceResolver::new(registry.clone()).with_latency(config.mock_latency),
        ),
        BalanceSource::Rpc => Arc::new(RpcBalanceResolver::from_urls(
            registry.clone(),
            &config.chain_rpc_urls,
        )?),
    };

    let backends = Backends {
        balances: Arc::new(PricedBalanceResolver::new(raw_balances, oracle)),
        positions: Arc::new(
            CompositePositionResolver::new(demo_adapters())
                .with_adapter_timeout(config.resolver_timeout),
        ),
        transactions: Arc::new(MockTransactionResolver::new().with_latency(config.mock_latency)),
        price_series,
    };

    info!(
        balances = ?config.balance_source,
        prices = ?config.price_source,
        tokens = registry.len(),
        "backends configured"
    );
    Ok(AppState::assemble(config.clone(), registry, backends))
}

/// 背景輪詢所有開著的 dashboard session，順便清掉閒置太久的。
pub fn build_refresher(state: &AppState) -> Arc<DashboardRefresher> {
    Arc::new(
        DashboardRefresher::new(
            state.dashboard.clone(),
            state.sessions.clone(),
            state.config.portfolio_poll_interval,
        )
        .with_idle_ttl(state.config.session_idle_ttl),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn mock_configuration_builds() {
        let state = build_state(&AppConfig::default()).unwrap();
        assert_eq!(state.registry.len(), TokenRegistry::default_tokens().len());
    }

    #[test]
    fn rpc_without_endpoints_is_rejected() {
        let config = AppConfig {
            balance_source: BalanceSource::Rpc,
            ..AppConfig::default()
        };
        assert!(build_state(&config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn refresher_expires_sessions_after_the_configured_ttl() {
        let config = AppConfig {
            session_idle_ttl: Duration::from_secs(60),
            ..AppConfig::default()
        };
        let state = build_state(&config).unwrap();
        state.sessions.create(Default::default()).await;
        let refresher = build_refresher(&state);

        tokio::time::advance(Duration::from_secs(61)).await;
        refresher.tick().await;
        assert!(state.sessions.is_empty().await);
    }
}
