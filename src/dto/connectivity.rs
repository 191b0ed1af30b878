use serde::Deserialize;

/// Body of `PUT /connectivity`: the platform's own network signal.
#[derive(Debug, Deserialize)]
pub struct PlatformConnectivityRequest {
    pub online: bool,
}
