use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    is_supported_chain, Account, Balances, ChainId, DeFiPosition, DomainError, PositionFilter,
    Transaction, WalletContext,
};
use thiserror::Error;

pub mod balance;
pub mod position;
pub mod transaction;

pub use balance::{RandomBalanceResolver, StaticBalanceResolver};
pub use position::{
    demo_adapters, AdapterFailure, CompositePositionResolver, PositionReport, ProtocolAdapter,
    StaticProtocolAdapter,
};
pub use transaction::MockTransactionResolver;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("invalid input: {0}")]
    Invalid(#[from] DomainError),
    #[error("unsupported chain: {0}")]
    UnsupportedChain(ChainId),
    #[error("{origin} unavailable: {message}")]
    Unavailable { origin: String, message: String },
    #[error("{origin} timed out after {after:?}")]
    Timeout { origin: String, after: Duration },
}

impl ResolutionError {
    pub fn unavailable(origin: impl Into<String>, message: impl Into<String>) -> Self {
        ResolutionError::Unavailable {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Upstream trouble, as opposed to a caller mistake.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ResolutionError::Unavailable { .. } | ResolutionError::Timeout { .. }
        )
    }
}

pub type ResolutionResult<T> = Result<T, ResolutionError>;

#[async_trait]
pub trait BalanceResolver: Send + Sync {
    /// Quantities for registry tokens on `chain_ids`; an empty slice means every supported chain.
    async fn resolve(&self, account: &Account, chain_ids: &[ChainId])
        -> ResolutionResult<Balances>;
}

#[async_trait]
pub trait PositionResolver: Send + Sync {
    /// Positions in discovery order. An empty list is a valid answer.
    async fn resolve(&self, account: &Account) -> ResolutionResult<Vec<DeFiPosition>>;

    async fn resolve_filtered(
        &self,
        account: &Account,
        filter: PositionFilter,
    ) -> ResolutionResult<Vec<DeFiPosition>> {
        self.resolve(account).await.map(|positions| filter.apply(positions))
    }
}

#[async_trait]
pub trait TransactionResolver: Send + Sync {
    /// Most recent first.
    async fn recent(
        &self,
        account: &Account,
        chain_ids: &[ChainId],
    ) -> ResolutionResult<Vec<Transaction>>;
}

/// No connected wallet resolves to an empty mapping instead of an error.
pub async fn resolve_balances(
    resolver: &dyn BalanceResolver,
    context: &WalletContext,
) -> ResolutionResult<Balances> {
    match &context.account {
        Some(account) => resolver.resolve(account, &context.chain_ids).await,
        None => Ok(Balances::new()),
    }
}

pub async fn resolve_positions(
    resolver: &dyn PositionResolver,
    context: &WalletContext,
    filter: PositionFilter,
) -> ResolutionResult<Vec<DeFiPosition>> {
    match &context.account {
        Some(account) => resolver.resolve_filtered(account, filter).await,
        None => Ok(Vec::new()),
    }
}

pub fn check_chains(chain_ids: &[ChainId]) -> ResolutionResult<()> {
    match chain_ids.iter().find(|id| !is_supported_chain(**id)) {
        Some(id) => Err(ResolutionError::UnsupportedChain(*id)),
        None => Ok(()),
    }
}

/// Runs `fut` under a deadline, turning expiry into [`ResolutionError::Timeout`].
pub async fn within<T, F>(origin: &str, limit: Duration, fut: F) -> ResolutionResult<T>
where
    F: Future<Output = ResolutionResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ResolutionError::Timeout {
            origin: origin.to_string(),
            after: limit,
        }),
    }
}

pub(crate) async fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_chains_rejects_unknown_network() {
        assert!(check_chains(&[1, 137, 42161, 8453]).is_ok());
        assert!(check_chains(&[]).is_ok());
        assert_eq!(
            check_chains(&[1, 56]),
            Err(ResolutionError::UnsupportedChain(56))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn within_reports_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, ResolutionError>(1)
        };
        let result = within("slow source", Duration::from_secs(5), slow).await;
        assert!(matches!(
            result,
            Err(ResolutionError::Timeout { ref origin, .. }) if origin == "slow source"
        ));
    }

    #[tokio::test]
    async fn disconnected_context_resolves_empty() {
        let registry = std::sync::Arc::new(domain::TokenRegistry::default_tokens());
        let resolver = RandomBalanceResolver::new(registry);
        let balances = resolve_balances(&resolver, &WalletContext::default())
            .await
            .unwrap();
        assert!(balances.is_empty());

        let adapters = CompositePositionResolver::new(demo_adapters());
        let positions = resolve_positions(&adapters, &WalletContext::default(), PositionFilter::All)
            .await
            .unwrap();
        assert!(positions.is_empty());
    }
}
