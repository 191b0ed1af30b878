use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::cloud_store::CloudError,
    services::{library_service::StoreError, sync_service::SyncError},
    state::{game::InvalidGameCode, transitions::TransitionError},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The network is considered offline.
    #[error("the network is offline")]
    Offline,
    /// The cloud store refused or failed the request.
    #[error("cloud store unavailable: {0}")]
    Unavailable(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<TransitionError> for ServiceError {
    fn from(err: TransitionError) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl From<InvalidGameCode> for ServiceError {
    fn from(err: InvalidGameCode) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(code) => ServiceError::NotFound(format!("game `{code}`")),
            StoreError::Transition(err) => err.into(),
        }
    }
}

impl From<CloudError> for ServiceError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Timeout => ServiceError::Timeout,
            CloudError::Stale { .. } => ServiceError::InvalidState(err.to_string()),
            other => ServiceError::Unavailable(other.to_string()),
        }
    }
}

impl From<SyncError> for ServiceError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound(code) => ServiceError::NotFound(format!("game `{code}`")),
            SyncError::Offline => ServiceError::Offline,
            SyncError::Cloud(err) => err.into(),
            SyncError::Busy
            | SyncError::Conflict
            | SyncError::Fatal(_)
            | SyncError::MissingRemote(_) => ServiceError::InvalidState(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or offline.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// The upstream cloud store did not answer in time.
    #[error("gateway timeout: {0}")]
    GatewayTimeout(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Offline => AppError::ServiceUnavailable("the network is offline".into()),
            ServiceError::Unavailable(message) => AppError::ServiceUnavailable(message),
            ServiceError::Timeout => AppError::GatewayTimeout("cloud request timed out".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::game::GameCode;

    fn status_of(err: impl Into<ServiceError>) -> StatusCode {
        AppError::from(err.into()).into_response().status()
    }

    #[test]
    fn validation_failures_are_bad_requests() {
        assert_eq!(
            status_of(TransitionError::InvalidPeriod(0)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(InvalidGameCode("??".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn sync_errors_map_to_http_statuses() {
        let code = GameCode::parse("AB12C3").unwrap();
        assert_eq!(
            status_of(SyncError::NotFound(code.clone())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_of(SyncError::Offline), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_of(SyncError::Conflict), StatusCode::CONFLICT);
        assert_eq!(
            status_of(SyncError::MissingRemote(code)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SyncError::Cloud(CloudError::Timeout)),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(SyncError::Cloud(CloudError::PermissionDenied("nope".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
