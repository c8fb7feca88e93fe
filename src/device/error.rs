//! Device routing errors

use thiserror::Error;

use crate::registry::ValidationError;

/// Synchronous failure of a subscribe call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// No registered backend accepts the request
    #[error("no device factory supports '{0}'")]
    NotSupported(String),

    /// The request was routed but its parameters are invalid
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DeviceError {
    /// Whether the next factory in line should be tried
    pub fn is_not_supported(&self) -> bool {
        matches!(self, DeviceError::NotSupported(_))
    }
}
