use axum::http::StatusCode;
use domain::{Account, ChainId};
use resolvers::{check_chains, ResolutionError};
use tracing::warn;

pub mod accounts;
pub mod health;
pub mod sessions;
pub mod tokens;

/// Caller mistakes are 400s; anything upstream is a 503.
pub(crate) fn status_for(err: &ResolutionError) -> StatusCode {
    match err {
        ResolutionError::Invalid(_) | ResolutionError::UnsupportedChain(_) => {
            StatusCode::BAD_REQUEST
        }
        ResolutionError::Unavailable { .. } | ResolutionError::Timeout { .. } => {
            warn!(error = %err, "upstream resolution failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub(crate) fn parse_account(raw: &str) -> Result<Account, StatusCode> {
    Account::parse(raw).map_err(|_| StatusCode::BAD_REQUEST)
}

/// `1,137,8453` → validated chain ids. Missing or blank means every supported chain.
pub(crate) fn parse_chains(raw: Option<&str>) -> Result<Vec<ChainId>, StatusCode> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };
    let chains = raw
        .split(',')
        .map(|item| item.trim().parse::<ChainId>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    check_chains(&chains).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(chains)
}
