use std::{sync::Arc, time::Duration};

use domain::{AggregateOutcome, NoSnapshotReason};
use futures::future::join_all;
use metrics::counter;
use resolvers::{within, TransactionResolver};
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    services::PortfolioAggregator,
    session::{
        DashboardSession, DashboardUpdate, RefreshOutcome, Resource, Selection, SessionRegistry,
    },
};

/// Resolves every dashboard component for a selection and applies the results to sessions.
pub struct DashboardService {
    aggregator: Arc<PortfolioAggregator>,
    transactions: Arc<dyn TransactionResolver>,
    timeout: Duration,
}

impl DashboardService {
    pub fn new(
        aggregator: Arc<PortfolioAggregator>,
        transactions: Arc<dyn TransactionResolver>,
        timeout: Duration,
    ) -> Self {
        Self {
            aggregator,
            transactions,
            timeout,
        }
    }

    pub async fn load(&self, selection: &Selection) -> DashboardUpdate {
        let Some(account) = selection.account.as_ref() else {
            return DashboardUpdate::idle();
        };
        let (aggregation, transactions) = tokio::join!(
            self.aggregator.resolve(selection),
            within(
                "transactions",
                self.timeout,
                self.transactions.recent(account, &selection.chain_ids)
            ),
        );
        if let Err(err) = &transactions {
            warn!(account = %account.short(), error = %err, "transaction history failed");
        }

        let portfolio = match aggregation.outcome {
            AggregateOutcome::NoSnapshot {
                reason: NoSnapshotReason::NoAccount,
            } => Resource::Idle,
            AggregateOutcome::NoSnapshot { .. } => {
                Resource::Error("portfolio unavailable".to_string())
            }
            outcome => Resource::Data(outcome),
        };
        DashboardUpdate {
            portfolio,
            balances: Resource::from_result(aggregation.balances, "balances unavailable"),
            positions: Resource::from_result(aggregation.positions, "positions unavailable"),
            transactions: Resource::from_result(transactions, "transactions unavailable"),
        }
    }

    /// Loads against the session's current selection. A selection change or a later refresh
    /// landing first both win over this one.
    pub async fn refresh(&self, session: &DashboardSession) -> RefreshOutcome {
        let ticket = session.begin().await;
        let update = self.load(&ticket.selection).await;
        let outcome = session.apply(&ticket, update).await;
        let reason = match outcome {
            RefreshOutcome::Applied => return outcome,
            RefreshOutcome::Stale => "stale",
            RefreshOutcome::Superseded => "superseded",
        };
        // 結果已過期，直接丟掉
        debug!(
            session = %session.id(),
            generation = ticket.generation,
            request = ticket.request,
            reason,
            "discarding refresh results"
        );
        counter!("dashboard_dropped_refreshes_total", "reason" => reason).increment(1);
        outcome
    }
}

/// 定期刷新所有 session，並清掉太久沒人讀的 session。
pub struct DashboardRefresher {
    service: Arc<DashboardService>,
    sessions: Arc<SessionRegistry>,
    interval: Duration,
    idle_ttl: Option<Duration>,
}

impl DashboardRefresher {
    pub fn new(
        service: Arc<DashboardService>,
        sessions: Arc<SessionRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            sessions,
            interval: interval.max(Duration::from_secs(1)),
            idle_ttl: None,
        }
    }

    /// Sessions unread for `ttl` are dropped at the start of each pass.
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = Some(ttl);
        self
    }

    /// One pass over all sessions; returns how many took the new results.
    pub async fn tick(&self) -> usize {
        if let Some(ttl) = self.idle_ttl {
            let expired = self.sessions.expire_idle(ttl).await;
            if expired > 0 {
                info!(expired, "expired idle dashboard sessions");
                counter!("dashboard_sessions_expired_total").increment(expired as u64);
            }
        }
        let sessions = self.sessions.all().await;
        let outcomes = join_all(
            sessions
                .iter()
                .map(|session| self.service.refresh(session)),
        )
        .await;
        outcomes
            .into_iter()
            .filter(|o| *o == RefreshOutcome::Applied)
            .count()
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        info!(interval_secs = self.interval.as_secs(), "dashboard refresher started");
        tokio::spawn(async move {
            loop {
                sleep(self.interval).await;
                let applied = self.tick().await;
                debug!(applied, "dashboard refresh pass finished");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use domain::{
        Account, Balances, ChainId, TokenKey, TokenRegistry, WalletContext, ETHEREUM,
        NATIVE_TOKEN_ADDRESS,
    };
    use resolvers::{
        demo_adapters, BalanceResolver, CompositePositionResolver, MockTransactionResolver,
        RandomBalanceResolver, ResolutionResult,
    };

    use super::*;
    use crate::repositories::InMemorySnapshotRepository;

    /// First call takes 5s and reports 1 ETH; every later call is instant and reports 2 ETH.
    struct SlowFirstBalances {
        registry: Arc<TokenRegistry>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BalanceResolver for SlowFirstBalances {
        async fn resolve(
            &self,
            _account: &Account,
            _chain_ids: &[ChainId],
        ) -> ResolutionResult<Balances> {
            let first = self.calls.fetch_add(1, Ordering::SeqCst) == 0;
            if first {
                sleep(Duration::from_secs(5)).await;
            }
            let mut balances = Balances::new();
            if let Some(eth) = self.registry.get(&eth_key()) {
                balances.insert(eth.clone(), if first { 1.0 } else { 2.0 });
            }
            Ok(balances)
        }
    }

    fn eth_key() -> TokenKey {
        TokenKey::new(ETHEREUM, NATIVE_TOKEN_ADDRESS)
    }

    fn service(latency: Duration) -> Arc<DashboardService> {
        let registry = Arc::new(TokenRegistry::default_tokens());
        service_with(Arc::new(
            RandomBalanceResolver::new(registry).with_latency(latency),
        ))
    }

    fn service_with(balances: Arc<dyn BalanceResolver>) -> Arc<DashboardService> {
        let aggregator = PortfolioAggregator::new(
            balances,
            Arc::new(CompositePositionResolver::new(demo_adapters())),
            Arc::new(InMemorySnapshotRepository::new(10)),
            Duration::from_secs(30),
        );
        Arc::new(DashboardService::new(
            Arc::new(aggregator),
            Arc::new(MockTransactionResolver::new()),
            Duration::from_secs(30),
        ))
    }

    fn selection() -> Selection {
        WalletContext::connected(
            Account::parse("0x00000000000000000000000000000000000000aa").unwrap(),
            vec![ETHEREUM],
        )
    }

    #[tokio::test]
    async fn refresh_fills_every_component() {
        let service = service(Duration::ZERO);
        let session = DashboardSession::new(selection());
        assert_eq!(service.refresh(&session).await, RefreshOutcome::Applied);

        let view = session.view().await;
        assert!(matches!(
            view.portfolio.data(),
            Some(AggregateOutcome::Full { .. })
        ));
        assert!(view.balances.data().is_some_and(|b| !b.is_empty()));
        assert_eq!(view.positions.data().map(Vec::len), Some(3));
        assert!(view
            .transactions
            .data()
            .is_some_and(|txs| txs.iter().all(|t| t.chain_id == ETHEREUM)));
        assert!(view.updated_at.is_some());
    }

    #[tokio::test]
    async fn disconnected_selection_stays_idle() {
        let service = service(Duration::ZERO);
        let session = DashboardSession::new(Selection::default());
        service.refresh(&session).await;
        let view = session.view().await;
        assert_eq!(view.portfolio, Resource::Idle);
        assert_eq!(view.transactions, Resource::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn selection_change_mid_flight_discards_old_results() {
        let service = service(Duration::from_secs(5));
        let session = Arc::new(DashboardSession::new(selection()));

        let in_flight = {
            let service = service.clone();
            let session = session.clone();
            tokio::spawn(async move { service.refresh(&session).await })
        };
        sleep(Duration::from_secs(1)).await;
        session.select(Selection::default()).await;

        assert_eq!(in_flight.await.unwrap(), RefreshOutcome::Stale);
        let view = session.view().await;
        assert_eq!(view.generation, 2);
        assert_eq!(view.balances, Resource::Idle);
        assert!(view.updated_at.is_none());
    }

    #[tokio::test]
    async fn tick_refreshes_all_sessions() {
        let service = service(Duration::ZERO);
        let sessions = Arc::new(SessionRegistry::new());
        sessions.create(selection()).await;
        sessions.create(Selection::default()).await;
        let refresher = DashboardRefresher::new(service, sessions, Duration::from_secs(60));
        assert_eq!(refresher.tick().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_earlier_refresh_does_not_overwrite_a_newer_one() {
        let registry = Arc::new(TokenRegistry::default_tokens());
        let service = service_with(Arc::new(SlowFirstBalances {
            registry,
            calls: AtomicUsize::new(0),
        }));
        let session = Arc::new(DashboardSession::new(selection()));

        let earlier = {
            let service = service.clone();
            let session = session.clone();
            tokio::spawn(async move { service.refresh(&session).await })
        };
        sleep(Duration::from_secs(1)).await;
        assert_eq!(service.refresh(&session).await, RefreshOutcome::Applied);
        let quantity = |view: &crate::session::DashboardView| {
            view.balances.data().map(|b| b.quantity(&eth_key()))
        };
        assert_eq!(quantity(&session.view().await), Some(2.0));

        assert_eq!(earlier.await.unwrap(), RefreshOutcome::Superseded);
        let view = session.view().await;
        assert_eq!(quantity(&view), Some(2.0));
        assert_eq!(view.generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_expires_unread_sessions_before_refreshing() {
        let service = service(Duration::ZERO);
        let sessions = Arc::new(SessionRegistry::new());
        let stale = sessions.create(selection()).await;
        let watched = sessions.create(selection()).await;
        let refresher = DashboardRefresher::new(service, sessions.clone(), Duration::from_secs(60))
            .with_idle_ttl(Duration::from_secs(300));

        tokio::time::advance(Duration::from_secs(301)).await;
        watched.view().await;
        assert_eq!(refresher.tick().await, 1);
        assert!(sessions.get(stale.id()).await.is_none());
        assert_eq!(sessions.len().await, 1);
    }
}
