use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::{
    dto::sync::{AbandonResponse, ForceSyncRequest, SyncOutcomeView},
    error::AppError,
    services::{scoreboard_service, sync_service::SyncStatus},
    state::{SharedState, game::GameCode},
};

/// Routes exposing the per-game sync controls.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games/{code}/sync", get(status).post(sync_now))
        .route("/games/{code}/sync/force", post(force_sync))
        .route("/games/{code}/sync/abandon", post(abandon))
}

/// Online flag, last sync time, conflict flag and pending count.
pub async fn status(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
) -> Result<Json<SyncStatus>, AppError> {
    Ok(Json(scoreboard_service::sync_status(&state, &code).await?))
}

/// Push the game now.
pub async fn sync_now(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
) -> Result<Json<SyncOutcomeView>, AppError> {
    let outcome = scoreboard_service::sync_now(&state, &code).await?;
    Ok(Json(outcome.into()))
}

/// Settle a stuck game by choosing the surviving copy.
pub async fn force_sync(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
    Json(payload): Json<ForceSyncRequest>,
) -> Result<Json<SyncOutcomeView>, AppError> {
    let outcome = scoreboard_service::force_sync(&state, &code, payload.resolution).await?;
    Ok(Json(outcome.into()))
}

/// Drop the queued actions and clear a halted state.
pub async fn abandon(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
) -> Result<Json<AbandonResponse>, AppError> {
    let discarded = scoreboard_service::abandon(&state, &code).await?;
    Ok(Json(AbandonResponse { discarded }))
}
