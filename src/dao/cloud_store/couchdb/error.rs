//! Error types of the CouchDB cloud store.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::cloud_store::CloudError;

/// Convenient result alias returning [`CouchDaoError`] failures.
pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures that can occur while interacting with CouchDB.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    /// Required environment variable is missing.
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the variable.
        var: &'static str,
    },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB returned an unexpected status code for a database operation.
    #[error("unexpected CouchDB database response status {status} for `{database}`")]
    DatabaseStatus {
        /// Database name.
        database: String,
        /// Status received.
        status: StatusCode,
    },
    /// A request could not be sent or no response arrived.
    #[error("failed to send CouchDB request to `{path}`")]
    RequestSend {
        /// Target path.
        path: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB returned an unexpected status code for a document endpoint.
    #[error("unexpected CouchDB response status {status} for `{path}`")]
    RequestStatus {
        /// Target path.
        path: String,
        /// Status received.
        status: StatusCode,
    },
    /// Response payload could not be parsed into the expected model.
    #[error("failed to decode CouchDB response for `{path}`")]
    DecodeResponse {
        /// Target path.
        path: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
}

fn classify_status(status: StatusCode, message: String) -> CloudError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CloudError::PermissionDenied(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            CloudError::Malformed(message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => CloudError::Timeout,
        _ => CloudError::Unavailable(message),
    }
}

impl From<CouchDaoError> for CloudError {
    fn from(err: CouchDaoError) -> Self {
        let message = err.to_string();
        match err {
            CouchDaoError::RequestSend { source, .. } if source.is_timeout() => CloudError::Timeout,
            CouchDaoError::RequestSend { .. }
            | CouchDaoError::MissingEnvVar { .. }
            | CouchDaoError::ClientBuilder { .. } => CloudError::Unavailable(message),
            CouchDaoError::DatabaseStatus { status, .. }
            | CouchDaoError::RequestStatus { status, .. } => classify_status(status, message),
            CouchDaoError::DecodeResponse { .. } => CloudError::Malformed(message),
        }
    }
}
