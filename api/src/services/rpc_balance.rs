use std::{collections::HashMap, str::FromStr, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use domain::{Account, Balances, ChainId, Token, TokenRegistry};
use ethers::{
    core::types::Bytes,
    providers::{Http, Middleware, Provider},
    types::{transaction::eip2718::TypedTransaction, Address, TransactionRequest, U256},
    utils::{format_units, keccak256},
};
use futures::future::join_all;
use resolvers::{check_chains, BalanceResolver, ResolutionError, ResolutionResult};
use tracing::{debug, warn};

const ORIGIN: &str = "rpc";

/// Reads native and ERC-20 balances straight from JSON-RPC endpoints, one per chain.
#[derive(Clone)]
pub struct RpcBalanceResolver {
    registry: Arc<TokenRegistry>,
    providers: HashMap<ChainId, Arc<Provider<Http>>>,
}

impl RpcBalanceResolver {
    pub fn new(
        registry: Arc<TokenRegistry>,
        providers: HashMap<ChainId, Arc<Provider<Http>>>,
    ) -> Self {
        Self {
            registry,
            providers,
        }
    }

    pub fn from_urls(
        registry: Arc<TokenRegistry>,
        urls: &HashMap<ChainId, String>,
    ) -> Result<Self> {
        let mut providers = HashMap::new();
        for (chain_id, url) in urls {
            let provider =
                Provider::<Http>::try_from(url.as_str())?.interval(Duration::from_millis(500));
            providers.insert(*chain_id, Arc::new(provider));
        }
        Ok(Self::new(registry, providers))
    }

    /// Requested chains, or every chain with an endpoint when none were requested.
    fn chains_for(&self, chain_ids: &[ChainId]) -> Vec<ChainId> {
        if chain_ids.is_empty() {
            let mut configured: Vec<_> = self.providers.keys().copied().collect();
            configured.sort_unstable();
            configured
        } else {
            chain_ids.to_vec()
        }
    }

    async fn chain_balances(
        &self,
        chain_id: ChainId,
        owner: Address,
    ) -> ResolutionResult<Vec<(Token, f64)>> {
        let provider = self.providers.get(&chain_id).ok_or_else(|| {
            ResolutionError::unavailable(ORIGIN, format!("no RPC endpoint for chain {chain_id}"))
        })?;

        let mut out = Vec::new();
        for token in self.registry.for_chain(chain_id) {
            if token.is_native() {
                let raw = provider.get_balance(owner, None).await.map_err(|err| {
                    ResolutionError::unavailable(ORIGIN, format!("chain {chain_id}: {err}"))
                })?;
                out.push((token.clone(), to_quantity(raw, token.decimals)));
                continue;
            }

            let Ok(contract) = Address::from_str(&token.address) else {
                warn!(chain_id, address = %token.address, "registry token has malformed address");
                continue;
            };
            let tx = TypedTransaction::Legacy(TransactionRequest {
                to: Some(contract.into()),
                data: Some(balance_of_call_data(owner)),
                ..Default::default()
            });
            match provider.call(&tx, None).await {
                Ok(result) => {
                    let raw = U256::from_big_endian(&result[..result.len().min(32)]);
                    out.push((token.clone(), to_quantity(raw, token.decimals)));
                }
                Err(err) => warn!(
                    error = %err,
                    chain_id,
                    token = %token.symbol,
                    "erc20 balanceOf failed, skipping token"
                ),
            }
        }
        Ok(out)
    }
}

/// `balanceOf(address)` selector 加上左補零到 32 bytes 的 owner 地址。
pub fn balance_of_call_data(owner: Address) -> Bytes {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&keccak256("balanceOf(address)")[..4]);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(owner.as_bytes());
    Bytes::from(data)
}

fn to_quantity(raw: U256, decimals: u8) -> f64 {
    format_units(raw, decimals as i32)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

#[async_trait]
impl BalanceResolver for RpcBalanceResolver {
    async fn resolve(
        &self,
        account: &Account,
        chain_ids: &[ChainId],
    ) -> ResolutionResult<Balances> {
        check_chains(chain_ids)?;
        let owner = Address::from_str(account.as_str())
            .map_err(|err| ResolutionError::unavailable(ORIGIN, err.to_string()))?;

        let chains = self.chains_for(chain_ids);
        let per_chain = join_all(
            chains
                .iter()
                .map(|chain_id| self.chain_balances(*chain_id, owner)),
        )
        .await;

        let mut balances = Balances::new();
        for result in per_chain {
            for (token, quantity) in result? {
                balances.insert(token, quantity);
            }
        }
        debug!(
            account = %account.short(),
            chains = chains.len(),
            tokens = balances.len(),
            "rpc balances resolved"
        );
        Ok(balances)
    }
}

#[cfg(test)]
mod tests {
    use domain::{BASE, ETHEREUM};

    use super::*;

    fn account() -> Account {
        Account::parse("0x00000000000000000000000000000000000000aa").unwrap()
    }

    #[test]
    fn call_data_has_selector_and_padded_owner() {
        let owner = Address::from_str(account().as_str()).unwrap();
        let data = balance_of_call_data(owner);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &[0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(data[35], 0xaa);
        assert!(data[4..16].iter().all(|b| *b == 0));
    }

    #[test]
    fn quantities_respect_decimals() {
        assert_eq!(to_quantity(U256::from(1_500_000u64), 6), 1.5);
        assert_eq!(to_quantity(U256::exp10(18), 18), 1.0);
    }

    #[tokio::test]
    async fn chain_without_endpoint_is_unavailable() {
        let urls = HashMap::from([(ETHEREUM, "http://127.0.0.1:8545".to_string())]);
        let resolver =
            RpcBalanceResolver::from_urls(Arc::new(TokenRegistry::default_tokens()), &urls)
                .unwrap();
        let err = resolver.resolve(&account(), &[BASE]).await.unwrap_err();
        assert!(err.is_upstream());
        let err = resolver.resolve(&account(), &[56]).await.unwrap_err();
        assert_eq!(err, ResolutionError::UnsupportedChain(56));
    }
}
