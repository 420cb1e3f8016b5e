use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use domain::{
    Account, ChainId, Transaction, TransactionKind, TransactionStatus, ARBITRUM, BASE, ETHEREUM,
    POLYGON,
};

use crate::{check_chains, simulate_latency, ResolutionResult, TransactionResolver};

/// Demo history anchored to the current time.
#[derive(Clone, Default)]
pub struct MockTransactionResolver {
    latency: Duration,
}

impl MockTransactionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn history() -> Vec<Transaction> {
        let now = Utc::now();
        let entry = |id: &str,
                     kind,
                     description: &str,
                     ago: ChronoDuration,
                     value: f64,
                     chain_id: ChainId| Transaction {
            id: id.to_string(),
            kind,
            description: description.to_string(),
            timestamp: now - ago,
            status: TransactionStatus::Completed,
            value,
            chain_id,
        };
        vec![
            entry(
                "0x1234...5678",
                TransactionKind::Swap,
                "Swap 0.5 ETH for 1,200 USDC",
                ChronoDuration::minutes(15),
                850.0,
                ETHEREUM,
            ),
            entry(
                "0xabcd...ef01",
                TransactionKind::Deposit,
                "Deposit 1,000 USDC to Aave",
                ChronoDuration::hours(2),
                1000.0,
                POLYGON,
            ),
            entry(
                "0x2345...6789",
                TransactionKind::Withdraw,
                "Withdraw 0.2 ETH from Compound",
                ChronoDuration::hours(5),
                340.0,
                ARBITRUM,
            ),
            entry(
                "0xefgh...ijkl",
                TransactionKind::Claim,
                "Claim 25 UNI rewards",
                ChronoDuration::days(1),
                125.0,
                BASE,
            ),
        ]
    }
}

#[async_trait]
impl TransactionResolver for MockTransactionResolver {
    async fn recent(
        &self,
        _account: &Account,
        chain_ids: &[ChainId],
    ) -> ResolutionResult<Vec<Transaction>> {
        check_chains(chain_ids)?;
        simulate_latency(self.latency).await;
        let mut txs: Vec<_> = Self::history()
            .into_iter()
            .filter(|tx| chain_ids.is_empty() || chain_ids.contains(&tx.chain_id))
            .collect();
        txs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(txs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::parse("0x00000000000000000000000000000000000000aa").unwrap()
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let txs = MockTransactionResolver::new()
            .recent(&account(), &[])
            .await
            .unwrap();
        assert_eq!(txs.len(), 4);
        assert!(txs.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(txs[0].kind, TransactionKind::Swap);
    }

    #[tokio::test]
    async fn history_is_restricted_to_requested_chains() {
        let txs = MockTransactionResolver::new()
            .recent(&account(), &[POLYGON, BASE])
            .await
            .unwrap();
        let chains: Vec<_> = txs.iter().map(|t| t.chain_id).collect();
        assert_eq!(chains, vec![POLYGON, BASE]);
    }
}
