use axum::{Json, Router, extract::State, routing::get};
use axum_valid::Valid;

use crate::{
    dto::settings::UpdateSettingsRequest,
    services::{scoreboard_service, settings_service::AppSettings},
    state::SharedState,
};

/// Routes reading and updating the app settings.
pub fn router() -> Router<SharedState> {
    Router::new().route("/settings", get(get_settings).put(update_settings))
}

/// Current app settings.
pub async fn get_settings(State(state): State<SharedState>) -> Json<AppSettings> {
    Json(scoreboard_service::settings(&state).await)
}

/// Update some or all settings.
pub async fn update_settings(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<UpdateSettingsRequest>>,
) -> Json<AppSettings> {
    let current = scoreboard_service::settings(&state).await;
    let updated = scoreboard_service::update_settings(&state, payload.merge_into(current)).await;
    Json(updated)
}
