use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use async_trait::async_trait;
use domain::{Account, ChainId, PortfolioSnapshot};
use tokio::sync::RwLock;

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn record(&self, snapshot: PortfolioSnapshot) -> Result<()>;

    /// Latest non-partial snapshot taken over exactly `chain_ids`.
    async fn latest_full(
        &self,
        account: &Account,
        chain_ids: &[ChainId],
    ) -> Result<Option<PortfolioSnapshot>>;

    /// Newest first.
    async fn history(&self, account: &Account, limit: usize) -> Result<Vec<PortfolioSnapshot>>;
}

const DEFAULT_ACCOUNT_LIMIT: usize = 10_000;

/// Keeps the last `limit` snapshots per account for at most `account_limit` accounts.
/// When full, the account whose newest snapshot is oldest is evicted.
pub struct InMemorySnapshotRepository {
    limit: usize,
    account_limit: usize,
    snapshots: RwLock<HashMap<Account, VecDeque<PortfolioSnapshot>>>,
}

impl InMemorySnapshotRepository {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            account_limit: DEFAULT_ACCOUNT_LIMIT,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_account_limit(mut self, account_limit: usize) -> Self {
        self.account_limit = account_limit.max(1);
        self
    }

    pub async fn account_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

fn least_recent(snapshots: &HashMap<Account, VecDeque<PortfolioSnapshot>>) -> Option<Account> {
    snapshots
        .iter()
        .min_by_key(|(_, entries)| entries.back().map(|s| s.taken_at))
        .map(|(account, _)| account.clone())
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn record(&self, snapshot: PortfolioSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        if !snapshots.contains_key(&snapshot.account) && snapshots.len() >= self.account_limit {
            if let Some(evicted) = least_recent(&snapshots) {
                snapshots.remove(&evicted);
            }
        }
        let entries = snapshots.entry(snapshot.account.clone()).or_default();
        entries.push_back(snapshot);
        while entries.len() > self.limit {
            entries.pop_front();
        }
        Ok(())
    }

    async fn latest_full(
        &self,
        account: &Account,
        chain_ids: &[ChainId],
    ) -> Result<Option<PortfolioSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(account).and_then(|entries| {
            entries
                .iter()
                .rev()
                .find(|s| !s.partial && s.chain_ids == chain_ids)
                .cloned()
        }))
    }

    async fn history(&self, account: &Account, limit: usize) -> Result<Vec<PortfolioSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(account)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
