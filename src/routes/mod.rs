use axum::Router;

use crate::state::SharedState;

pub mod connectivity;
pub mod game;
pub mod health;
pub mod settings;
pub mod sse;
pub mod sync;

/// Compose all route trees and wire in shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(game::router())
        .merge(sync::router())
        .merge(sse::router())
        .merge(settings::router())
        .merge(connectivity::router())
        .with_state(state)
}
