//! Status codes and the shared error type

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for service operations
pub type VehicleResult<T> = Result<T, VehicleError>;

/// Wire-visible status of a call or a single request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    #[default]
    Ok,
    /// Malformed input: unknown property, bad area, out-of-range or
    /// mistyped value, duplicate ids, invalid sample rate.
    InvalidArg,
    /// The request could not be served right now; the client may retry.
    TryAgain,
    InternalError,
    NotAvailable,
}

impl StatusCode {
    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

/// Errors surfaced synchronously by the service facade and the engine
#[derive(Debug, Clone, Error)]
pub enum VehicleError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("try again: {0}")]
    TryAgain(String),

    #[error("not available: {0}")]
    NotAvailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VehicleError {
    /// The wire status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            VehicleError::InvalidArg(_) => StatusCode::InvalidArg,
            VehicleError::TryAgain(_) => StatusCode::TryAgain,
            VehicleError::NotAvailable(_) => StatusCode::NotAvailable,
            VehicleError::Internal(_) => StatusCode::InternalError,
        }
    }

    /// Wrap a non-OK status reported by a collaborator. `Ok` is not an
    /// error and maps to `Internal` if it ever shows up here.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::InvalidArg => VehicleError::InvalidArg(message),
            StatusCode::TryAgain => VehicleError::TryAgain(message),
            StatusCode::NotAvailable => VehicleError::NotAvailable(message),
            StatusCode::InternalError | StatusCode::Ok => VehicleError::Internal(message),
        }
    }
}
