use std::sync::Arc;

use domain::TokenRegistry;
use price_engine::PriceSeriesSource;
use resolvers::{BalanceResolver, PositionResolver, TransactionResolver};

use crate::{
    config::AppConfig,
    repositories::{InMemorySnapshotRepository, SnapshotRepository},
    services::{DashboardService, PortfolioAggregator},
    session::SessionRegistry,
};

/// The swappable data sources behind the service; mock or real, same contracts.
#[derive(Clone)]
pub struct Backends {
    pub balances: Arc<dyn BalanceResolver>,
    pub positions: Arc<dyn PositionResolver>,
    pub transactions: Arc<dyn TransactionResolver>,
    pub price_series: Arc<dyn PriceSeriesSource>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<TokenRegistry>,
    pub balances: Arc<dyn BalanceResolver>,
    pub positions: Arc<dyn PositionResolver>,
    pub transactions: Arc<dyn TransactionResolver>,
    pub price_series: Arc<dyn PriceSeriesSource>,
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub aggregator: Arc<PortfolioAggregator>,
    pub dashboard: Arc<DashboardService>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn assemble(config: AppConfig, registry: Arc<TokenRegistry>, backends: Backends) -> Self {
        let snapshots: Arc<dyn SnapshotRepository> = Arc::new(
            InMemorySnapshotRepository::new(config.snapshot_history_limit)
                .with_account_limit(config.snapshot_account_limit),
        );
        let aggregator = Arc::new(PortfolioAggregator::new(
            backends.balances.clone(),
            backends.positions.clone(),
            snapshots.clone(),
            config.resolver_timeout,
        ));
        let dashboard = Arc::new(DashboardService::new(
            aggregator.clone(),
            backends.transactions.clone(),
            config.resolver_timeout,
        ));
        Self {
            config,
            registry,
            balances: backends.balances,
            positions: backends.positions,
            transactions: backends.transactions,
            price_series: backends.price_series,
            snapshots,
            aggregator,
            dashboard,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }
}

// Axum state must be shareable across worker threads.
#[allow(dead_code)]
fn _assert_state_types_are_send_sync()
where
    AppConfig: Send + Sync + 'static,
    TokenRegistry: Send + Sync + 'static,
    dyn BalanceResolver: Send + Sync,
    dyn PositionResolver: Send + Sync,
    dyn TransactionResolver: Send + Sync,
    dyn PriceSeriesSource: Send + Sync,
    dyn SnapshotRepository: Send + Sync,
    PortfolioAggregator: Send + Sync,
    DashboardService: Send + Sync,
    SessionRegistry: Send + Sync,
{
}

#[allow(dead_code)]
fn _assert_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<AppState>();
}
