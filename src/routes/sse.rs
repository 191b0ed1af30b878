use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    error::AppError,
    services::{scoreboard_service, sse_service},
    state::{SharedState, game::GameCode},
};

/// Stream every accepted mutation and sync status change of one game.
pub async fn game_stream(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (game, receiver) = scoreboard_service::subscribe(&state, &code).await?;
    info!(code = %code, "new game SSE connection");
    Ok(sse_service::to_sse_stream(code, game, receiver))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/games/{code}/events", get(game_stream))
}
