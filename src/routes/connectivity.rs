use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::connectivity::PlatformConnectivityRequest, services::connectivity::ConnectivitySnapshot,
    services::scoreboard_service, state::SharedState,
};

/// Routes feeding and reading the connectivity monitor.
pub fn router() -> Router<SharedState> {
    Router::new().route("/connectivity", get(current).put(set_platform_online))
}

/// Current connectivity view.
pub async fn current(State(state): State<SharedState>) -> Json<ConnectivitySnapshot> {
    Json(scoreboard_service::connectivity(&state))
}

/// Record the platform's online/offline signal.
pub async fn set_platform_online(
    State(state): State<SharedState>,
    Json(payload): Json<PlatformConnectivityRequest>,
) -> Json<ConnectivitySnapshot> {
    Json(scoreboard_service::set_platform_online(&state, payload.online))
}
