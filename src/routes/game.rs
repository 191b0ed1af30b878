use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::game::{
        CreateGameRequest, CreatedGameView, DispatchResponse, GameView, PendingResponse,
        SetActiveRequest,
    },
    error::{AppError, ServiceError},
    services::scoreboard_service,
    state::{
        SharedState,
        game::{GameCode, Scoreboard},
        transitions::Transition,
    },
};

/// Routes handling the local game library and transitions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games", get(list_games).post(create_game))
        .route("/games/active", get(get_active).put(set_active))
        .route(
            "/games/{code}",
            get(get_game).put(replace_scoreboard).delete(remove_game),
        )
        .route("/games/{code}/actions", post(dispatch))
        .route("/games/{code}/pending", get(pending))
}

/// List every stored game.
pub async fn list_games(State(state): State<SharedState>) -> Json<Vec<GameView>> {
    Json(scoreboard_service::list_games(&state).await)
}

/// Set up a new game and make it active.
pub async fn create_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateGameRequest>>,
) -> Result<Json<CreatedGameView>, AppError> {
    let created = scoreboard_service::create_game(&state, payload).await?;
    Ok(Json(created))
}

/// Read one game.
pub async fn get_game(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
) -> Result<Json<GameView>, AppError> {
    Ok(Json(scoreboard_service::get_game(&state, &code).await?))
}

/// Replace a game's scoreboard wholesale.
pub async fn replace_scoreboard(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
    Json(scoreboard): Json<Scoreboard>,
) -> Result<Json<GameView>, AppError> {
    let game = scoreboard_service::replace_scoreboard(&state, &code, scoreboard).await?;
    Ok(Json(game))
}

/// Remove a game and everything attached to it.
pub async fn remove_game(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
) -> Result<Json<GameView>, AppError> {
    Ok(Json(scoreboard_service::remove_game(&state, &code).await?))
}

/// Read the game shown on the console.
pub async fn get_active(State(state): State<SharedState>) -> Result<Json<GameView>, AppError> {
    Ok(Json(scoreboard_service::get_active(&state).await?))
}

/// Point the console at another game.
pub async fn set_active(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SetActiveRequest>>,
) -> Result<Json<GameView>, AppError> {
    let code = GameCode::parse(&payload.code).map_err(ServiceError::from)?;
    Ok(Json(scoreboard_service::set_active(&state, &code).await?))
}

/// Apply one transition to a game.
pub async fn dispatch(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
    Json(transition): Json<Transition>,
) -> Result<Json<DispatchResponse>, AppError> {
    let response = scoreboard_service::dispatch(&state, &code, transition).await?;
    Ok(Json(response))
}

/// List the actions waiting for a cloud acknowledgment.
pub async fn pending(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
) -> Result<Json<PendingResponse>, AppError> {
    Ok(Json(scoreboard_service::pending_actions(&state, &code).await?))
}
