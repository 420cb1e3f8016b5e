use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use domain::{
    supported_chains, Account, AggregateOutcome, Balances, ChainId, ChangeBasis, DeFiPosition,
    NoSnapshotReason, PortfolioSnapshot, SourceKind, WalletContext,
};
use metrics::{counter, histogram};
use resolvers::{within, BalanceResolver, PositionResolver, ResolutionResult};
use tracing::{debug, info, warn};

use crate::repositories::SnapshotRepository;

/// One aggregation pass: the graded outcome plus the raw resolver results it was built from,
/// so dashboard components render the same data the totals were computed on.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub outcome: AggregateOutcome,
    pub balances: ResolutionResult<Balances>,
    pub positions: ResolutionResult<Vec<DeFiPosition>>,
}

pub struct PortfolioAggregator {
    balances: Arc<dyn BalanceResolver>,
    positions: Arc<dyn PositionResolver>,
    snapshots: Arc<dyn SnapshotRepository>,
    timeout: Duration,
}

impl PortfolioAggregator {
    pub fn new(
        balances: Arc<dyn BalanceResolver>,
        positions: Arc<dyn PositionResolver>,
        snapshots: Arc<dyn SnapshotRepository>,
        timeout: Duration,
    ) -> Self {
        Self {
            balances,
            positions,
            snapshots,
            timeout,
        }
    }

    pub async fn aggregate(&self, context: &WalletContext) -> AggregateOutcome {
        self.resolve(context).await.outcome
    }

    pub async fn resolve(&self, context: &WalletContext) -> Aggregation {
        let started = Instant::now();
        let Some(account) = context.account.as_ref() else {
            let aggregation = Aggregation {
                outcome: AggregateOutcome::NoSnapshot {
                    reason: NoSnapshotReason::NoAccount,
                },
                balances: Ok(Balances::new()),
                positions: Ok(Vec::new()),
            };
            record_metrics(&aggregation.outcome, started);
            return aggregation;
        };

        let chain_ids = normalize_chains(&context.chain_ids);
        let (balances, positions) = tokio::join!(
            within(
                "balances",
                self.timeout,
                self.balances.resolve(account, &context.chain_ids)
            ),
            within("positions", self.timeout, self.positions.resolve(account)),
        );
        let positions = positions.map(|list| {
            list.into_iter()
                .filter(|p| chain_ids.contains(&p.chain_id))
                .collect::<Vec<_>>()
        });

        let outcome = match (&balances, &positions) {
            (Ok(held), Ok(open)) => {
                let prior = self.prior_full(account, &chain_ids).await;
                let snapshot = value_portfolio(
                    account,
                    &chain_ids,
                    held,
                    open,
                    prior.as_ref(),
                    false,
                    Utc::now(),
                );
                if let Err(err) = self.snapshots.record(snapshot.clone()).await {
                    warn!(error = %err, account = %account.short(), "snapshot record failed");
                }
                AggregateOutcome::Full { snapshot }
            }
            (Ok(held), Err(err)) => {
                warn!(
                    account = %account.short(),
                    error = %err,
                    "positions failed, snapshot is partial"
                );
                let snapshot =
                    value_portfolio(account, &chain_ids, held, &[], None, true, Utc::now());
                AggregateOutcome::Partial {
                    snapshot,
                    failed: vec![SourceKind::Positions],
                }
            }
            (Err(err), Ok(open)) => {
                warn!(
                    account = %account.short(),
                    error = %err,
                    "balances failed, snapshot is partial"
                );
                let snapshot = value_portfolio(
                    account,
                    &chain_ids,
                    &Balances::new(),
                    open,
                    None,
                    true,
                    Utc::now(),
                );
                AggregateOutcome::Partial {
                    snapshot,
                    failed: vec![SourceKind::Balances],
                }
            }
            (Err(balance_err), Err(position_err)) => {
                warn!(
                    account = %account.short(),
                    balances = %balance_err,
                    positions = %position_err,
                    "every portfolio source failed"
                );
                AggregateOutcome::NoSnapshot {
                    reason: NoSnapshotReason::AllSourcesFailed,
                }
            }
        };

        if let Some(snapshot) = outcome.snapshot() {
            info!(
                account = %account.short(),
                outcome = outcome.label(),
                total_value = snapshot.total_value,
                change_percent = snapshot.change_percent,
                "portfolio aggregated"
            );
        }
        record_metrics(&outcome, started);
        Aggregation {
            outcome,
            balances,
            positions,
        }
    }

    async fn prior_full(
        &self,
        account: &Account,
        chain_ids: &[ChainId],
    ) -> Option<PortfolioSnapshot> {
        match self.snapshots.latest_full(account, chain_ids).await {
            Ok(prior) => prior,
            Err(err) => {
                warn!(error = %err, account = %account.short(), "prior snapshot lookup failed");
                None
            }
        }
    }
}

fn record_metrics(outcome: &AggregateOutcome, started: Instant) {
    counter!("portfolio_aggregations_total", "outcome" => outcome.label()).increment(1);
    histogram!("portfolio_aggregation_seconds").record(started.elapsed().as_secs_f64());
}

/// Sorted, de-duplicated chain set; empty means every supported chain.
pub fn normalize_chains(chain_ids: &[ChainId]) -> Vec<ChainId> {
    let mut chains: Vec<ChainId> = if chain_ids.is_empty() {
        supported_chains().into_iter().map(|c| c.id).collect()
    } else {
        chain_ids.to_vec()
    };
    chains.sort_unstable();
    chains.dedup();
    chains
}

/// Values holdings plus positions. `prior` only matters for complete snapshots: a partial
/// one never reports a change.
pub fn value_portfolio(
    account: &Account,
    chain_ids: &[ChainId],
    balances: &Balances,
    positions: &[DeFiPosition],
    prior: Option<&PortfolioSnapshot>,
    partial: bool,
    taken_at: DateTime<Utc>,
) -> PortfolioSnapshot {
    let balance_value = balances.total_value_usd();
    let position_value: f64 = positions.iter().map(|p| p.value).sum();
    let total_value = balance_value + position_value;

    let mut chain_values = balances.value_by_chain();
    for position in positions {
        *chain_values.entry(position.chain_id).or_insert(0.0) += position.value;
    }

    let (change_percent, change_basis) = if partial {
        (0.0, ChangeBasis::Incomplete)
    } else {
        match prior {
            Some(prior) if prior.total_value > 0.0 => (
                (total_value - prior.total_value) / prior.total_value * 100.0,
                ChangeBasis::PriorSnapshot,
            ),
            _ => (0.0, ChangeBasis::Baseline),
        }
    };
    debug!(
        account = %account.short(),
        balance_value,
        position_value,
        ?change_basis,
        "portfolio valued"
    );

    PortfolioSnapshot {
        account: account.clone(),
        chain_ids: chain_ids.to_vec(),
        total_value,
        balance_value,
        position_value,
        chain_values,
        change_percent,
        change_basis,
        partial,
        taken_at,
    }
}
