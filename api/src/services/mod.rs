pub mod dashboard;
pub mod history;
pub mod oracle;
pub mod portfolio;
pub mod rpc_balance;

pub use dashboard::{DashboardRefresher, DashboardService};
pub use history::CoingeckoHistorySource;
pub use oracle::{
    CachedPriceOracle, CoingeckoPriceOracle, FallbackPriceOracle, OracleError, OracleResult,
    PriceOracle, PricedBalanceResolver, StaticPriceOracle,
};
pub use portfolio::{normalize_chains, value_portfolio, Aggregation, PortfolioAggregator};
pub use rpc_balance::RpcBalanceResolver;
