use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use domain::{Account, ChainId};
use resolvers::check_chains;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    session::{DashboardView, Selection},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(close_session))
        .route("/sessions/:id/selection", put(update_selection))
}

#[derive(Debug, Default, Deserialize)]
struct SelectionRequest {
    account: Option<String>,
    #[serde(default)]
    chain_ids: Vec<ChainId>,
}

impl SelectionRequest {
    fn into_selection(self) -> Result<Selection, StatusCode> {
        let account = self
            .account
            .as_deref()
            .map(Account::parse)
            .transpose()
            .map_err(|_| StatusCode::BAD_REQUEST)?;
        check_chains(&self.chain_ids).map_err(|_| StatusCode::BAD_REQUEST)?;
        Ok(Selection::new(account, self.chain_ids))
    }
}

async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<SelectionRequest>,
) -> Result<(StatusCode, Json<DashboardView>), StatusCode> {
    let selection = payload.into_selection()?;
    let session = state.sessions.create(selection).await;
    state.dashboard.refresh(&session).await;
    Ok((StatusCode::CREATED, Json(session.view().await)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DashboardView>, StatusCode> {
    let session = state.sessions.get(id).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(session.view().await))
}

async fn update_selection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SelectionRequest>,
) -> Result<Json<DashboardView>, StatusCode> {
    let session = state.sessions.get(id).await.ok_or(StatusCode::NOT_FOUND)?;
    let selection = payload.into_selection()?;
    session.select(selection).await;
    state.dashboard.refresh(&session).await;
    Ok(Json(session.view().await))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> StatusCode {
    if state.sessions.remove(id).await {
        info!(session = %id, "dashboard session closed");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
