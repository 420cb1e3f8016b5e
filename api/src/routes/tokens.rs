use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use domain::{
    is_supported_chain, supported_chains, ChainId, PricePoint, SupportedChain, TimeRange, Token,
    TokenKey,
};
use price_engine::{ChartScale, SeriesError};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::warn;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chains", get(list_chains))
        .route("/tokens", get(list_tokens))
        .route("/tokens/:chain_id/:address/chart", get(token_chart))
}

async fn list_chains() -> Json<Vec<SupportedChain>> {
    Json(supported_chains())
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    chain_id: Option<ChainId>,
    q: Option<String>,
}

async fn list_tokens(
    State(state): State<AppState>,
    Query(params): Query<TokenQuery>,
) -> Result<Json<Vec<Token>>, StatusCode> {
    if let Some(chain_id) = params.chain_id {
        if !is_supported_chain(chain_id) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    let tokens = state
        .registry
        .search(params.q.as_deref().unwrap_or(""))
        .into_iter()
        .filter(|t| params.chain_id.map_or(true, |id| t.chain_id == id))
        .cloned()
        .collect();
    Ok(Json(tokens))
}

#[derive(Debug, Deserialize)]
struct ChartQuery {
    range: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChartView {
    pub token: Token,
    pub range: TimeRange,
    pub points: Vec<PricePoint>,
    pub change_percent: f64,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub scale: Option<ChartScale>,
}

async fn token_chart(
    State(state): State<AppState>,
    Path((chain_id, address)): Path<(ChainId, String)>,
    Query(params): Query<ChartQuery>,
) -> Result<Json<ChartView>, StatusCode> {
    let range = match params.range.as_deref() {
        Some(raw) => raw.parse::<TimeRange>().map_err(|_| StatusCode::BAD_REQUEST)?,
        None => TimeRange::default(),
    };
    let token = state
        .registry
        .get(&TokenKey::new(chain_id, &address))
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)?;

    let lookup = timeout(
        state.config.resolver_timeout,
        state.price_series.series(&token, range),
    );
    let series = lookup
        .await
        .map_err(|_| {
            warn!(symbol = %token.symbol, %range, "price series timed out");
            StatusCode::SERVICE_UNAVAILABLE
        })?
        .map_err(|err| {
            warn!(error = %err, symbol = %token.symbol, %range, "price series failed");
            match err {
                SeriesError::EmptyHistory(_) | SeriesError::Unavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                SeriesError::NonMonotonic | SeriesError::WrongLength { .. } => {
                    StatusCode::BAD_GATEWAY
                }
            }
        })?;

    let prices = series.points.iter().map(|p| p.price);
    let high = prices.clone().reduce(f64::max);
    let low = prices.reduce(f64::min);
    Ok(Json(ChartView {
        change_percent: series.change_percent(),
        scale: ChartScale::from_points(&series.points),
        high,
        low,
        range,
        token,
        points: series.points,
    }))
}
