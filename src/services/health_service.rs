use tokio::time;
use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report local persistence, connectivity and cloud reachability.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let timeout = state.config().network_timeout;
    let cloud_reachable = match time::timeout(timeout, state.cloud().health_check()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(error = %err, "cloud store health check failed");
            false
        }
        Err(_) => {
            warn!("cloud store health check timed out");
            false
        }
    };

    let persistence = state.library().persistence().await;
    HealthResponse::new(persistence, state.connectivity().snapshot(), cloud_reachable)
}
