use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{supported_chains, Account, Balances, ChainId, TokenKey, TokenRegistry};
use rand::Rng;
use tracing::debug;

use crate::{check_chains, simulate_latency, BalanceResolver, ResolutionResult};

/// Mock backend: random holdings for every registry token, cheaper tokens in larger amounts.
#[derive(Clone)]
pub struct RandomBalanceResolver {
    registry: Arc<TokenRegistry>,
    latency: Duration,
}

impl RandomBalanceResolver {
    pub fn new(registry: Arc<TokenRegistry>) -> Self {
        Self {
            registry,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn draw(&self, chain_ids: &[ChainId]) -> Balances {
        let mut rng = rand::thread_rng();
        let mut balances = Balances::new();
        for token in self.registry.for_chains(chain_ids) {
            let price = if token.price > 0.0 { token.price } else { 1.0 };
            let multiplier: f64 = rng.gen_range(0.1..10.1);
            balances.insert(token.clone(), multiplier / price);
        }
        balances
    }
}

#[async_trait]
impl BalanceResolver for RandomBalanceResolver {
    async fn resolve(
        &self,
        account: &Account,
        chain_ids: &[ChainId],
    ) -> ResolutionResult<Balances> {
        check_chains(chain_ids)?;
        simulate_latency(self.latency).await;
        let balances = self.draw(chain_ids);
        debug!(
            account = %account.short(),
            tokens = balances.len(),
            "random balances drawn"
        );
        Ok(balances)
    }
}

/// Fixed holdings per account, filtered through the registry.
#[derive(Clone)]
pub struct StaticBalanceResolver {
    registry: Arc<TokenRegistry>,
    holdings: HashMap<Account, Vec<(TokenKey, f64)>>,
}

impl StaticBalanceResolver {
    pub fn new(registry: Arc<TokenRegistry>) -> Self {
        Self {
            registry,
            holdings: HashMap::new(),
        }
    }

    pub fn with_holding(mut self, account: Account, key: TokenKey, quantity: f64) -> Self {
        self.holdings.entry(account).or_default().push((key, quantity));
        self
    }
}

#[async_trait]
impl BalanceResolver for StaticBalanceResolver {
    async fn resolve(
        &self,
        account: &Account,
        chain_ids: &[ChainId],
    ) -> ResolutionResult<Balances> {
        check_chains(chain_ids)?;
        let wanted: Vec<ChainId> = if chain_ids.is_empty() {
            supported_chains().into_iter().map(|c| c.id).collect()
        } else {
            chain_ids.to_vec()
        };
        let mut balances = Balances::new();
        for (key, quantity) in self.holdings.get(account).into_iter().flatten() {
            if !wanted.contains(&key.chain_id) {
                continue;
            }
            match self.registry.get(key) {
                Some(token) => balances.insert(token.clone(), *quantity),
                None => debug!(
                    chain_id = key.chain_id,
                    address = %key.address,
                    "holding outside token registry ignored"
                ),
            }
        }
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use domain::{ETHEREUM, NATIVE_TOKEN_ADDRESS, POLYGON};

    use super::*;
    use crate::ResolutionError;

    fn account() -> Account {
        Account::parse("0x00000000000000000000000000000000000000aa").unwrap()
    }

    #[tokio::test]
    async fn random_resolver_only_returns_registered_tokens() {
        let registry = Arc::new(TokenRegistry::default_tokens());
        let resolver = RandomBalanceResolver::new(registry.clone());
        let balances = resolver
            .resolve(&account(), &[ETHEREUM, POLYGON])
            .await
            .unwrap();

        assert_eq!(
            balances.len(),
            registry.for_chains(&[ETHEREUM, POLYGON]).count()
        );
        for entry in balances.iter() {
            assert!(registry.contains(&entry.token.key()));
            assert!([ETHEREUM, POLYGON].contains(&entry.token.chain_id));
            assert!(entry.quantity >= 0.0);
        }
    }

    #[tokio::test]
    async fn random_resolver_keys_are_stable_between_calls() {
        let resolver = RandomBalanceResolver::new(Arc::new(TokenRegistry::default_tokens()));
        let first: BTreeSet<_> = resolver
            .resolve(&account(), &[ETHEREUM])
            .await
            .unwrap()
            .keys()
            .cloned()
            .collect();
        let second: BTreeSet<_> = resolver
            .resolve(&account(), &[ETHEREUM])
            .await
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn random_resolver_rejects_unsupported_chain() {
        let resolver = RandomBalanceResolver::new(Arc::new(TokenRegistry::default_tokens()));
        let err = resolver.resolve(&account(), &[56]).await.unwrap_err();
        assert_eq!(err, ResolutionError::UnsupportedChain(56));
    }

    #[tokio::test]
    async fn static_resolver_drops_unregistered_and_foreign_chain_holdings() {
        let registry = Arc::new(TokenRegistry::default_tokens());
        let eth = TokenKey::new(ETHEREUM, NATIVE_TOKEN_ADDRESS);
        let matic = TokenKey::new(POLYGON, NATIVE_TOKEN_ADDRESS);
        let unknown = TokenKey::new(ETHEREUM, "0x000000000000000000000000000000000000beef");
        let resolver = StaticBalanceResolver::new(registry)
            .with_holding(account(), eth.clone(), 0.5)
            .with_holding(account(), matic.clone(), 100.0)
            .with_holding(account(), unknown.clone(), 42.0);

        let balances = resolver.resolve(&account(), &[ETHEREUM]).await.unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances.quantity(&eth), 0.5);
        assert!(balances.get(&unknown).is_none());
        assert!(balances.get(&matic).is_none());

        let everywhere = resolver.resolve(&account(), &[]).await.unwrap();
        assert_eq!(everywhere.len(), 2);
    }

    #[tokio::test]
    async fn static_resolver_unknown_account_is_empty() {
        let resolver = StaticBalanceResolver::new(Arc::new(TokenRegistry::default_tokens()));
        let other = Account::parse("0x00000000000000000000000000000000000000bb").unwrap();
        assert!(resolver.resolve(&other, &[]).await.unwrap().is_empty());
    }
}
