use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use domain::{
    AggregateOutcome, Balances, DeFiPosition, NoSnapshotReason, PortfolioSnapshot,
    PositionFilter, Transaction, WalletContext,
};
use resolvers::within;
use serde::Deserialize;

use crate::{
    routes::{parse_account, parse_chains, status_for},
    state::AppState,
};

const DEFAULT_HISTORY_LIMIT: usize = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/accounts/:account/balances", get(get_balances))
        .route("/accounts/:account/positions", get(get_positions))
        .route("/accounts/:account/portfolio", get(get_portfolio))
        .route(
            "/accounts/:account/portfolio/history",
            get(get_portfolio_history),
        )
        .route("/accounts/:account/transactions", get(get_transactions))
}

#[derive(Debug, Deserialize)]
struct ChainQuery {
    chains: Option<String>,
}

async fn get_balances(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(params): Query<ChainQuery>,
) -> Result<Json<Balances>, StatusCode> {
    let account = parse_account(&account)?;
    let chains = parse_chains(params.chains.as_deref())?;
    let balances = within(
        "balances",
        state.config.resolver_timeout,
        state.balances.resolve(&account, &chains),
    )
    .await
    .map_err(|err| status_for(&err))?;
    Ok(Json(balances))
}

#[derive(Debug, Deserialize)]
struct PositionQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

async fn get_positions(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(params): Query<PositionQuery>,
) -> Result<Json<Vec<DeFiPosition>>, StatusCode> {
    let account = parse_account(&account)?;
    let filter = match params.kind.as_deref() {
        Some(raw) => raw
            .parse::<PositionFilter>()
            .map_err(|_| StatusCode::BAD_REQUEST)?,
        None => PositionFilter::All,
    };
    let positions = within(
        "positions",
        state.config.resolver_timeout,
        state.positions.resolve_filtered(&account, filter),
    )
    .await
    .map_err(|err| status_for(&err))?;
    Ok(Json(positions))
}

async fn get_portfolio(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(params): Query<ChainQuery>,
) -> Result<(StatusCode, Json<AggregateOutcome>), StatusCode> {
    let account = parse_account(&account)?;
    let chains = parse_chains(params.chains.as_deref())?;
    let outcome = state
        .aggregator
        .aggregate(&WalletContext::connected(account, chains))
        .await;
    let status = match outcome {
        AggregateOutcome::NoSnapshot {
            reason: NoSnapshotReason::AllSourcesFailed,
        } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn get_portfolio_history(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<PortfolioSnapshot>>, StatusCode> {
    let account = parse_account(&account)?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, state.config.snapshot_history_limit.max(1));
    let history = state
        .snapshots
        .history(&account, limit)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(history))
}

async fn get_transactions(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(params): Query<ChainQuery>,
) -> Result<Json<Vec<Transaction>>, StatusCode> {
    let account = parse_account(&account)?;
    let chains = parse_chains(params.chains.as_deref())?;
    let transactions = within(
        "transactions",
        state.config.resolver_timeout,
        state.transactions.recent(&account, &chains),
    )
    .await
    .map_err(|err| status_for(&err))?;
    Ok(Json(transactions))
}
