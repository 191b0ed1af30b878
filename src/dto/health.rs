use serde::Serialize;

use crate::services::{connectivity::ConnectivitySnapshot, library_service::Persistence};

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether local writes currently reach durable storage.
    pub persistence: Persistence,
    /// Current connectivity view.
    pub connectivity: ConnectivitySnapshot,
    /// Whether the cloud store answered its health check.
    pub cloud_reachable: bool,
}

impl HealthResponse {
    /// Build the response, reporting `degraded` when storage or the cloud is unavailable.
    pub fn new(
        persistence: Persistence,
        connectivity: ConnectivitySnapshot,
        cloud_reachable: bool,
    ) -> Self {
        let healthy = persistence == Persistence::Durable && cloud_reachable;
        Self {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            persistence,
            connectivity,
            cloud_reachable,
        }
    }
}
