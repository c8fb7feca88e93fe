//! Error types
//!
//! Each layer owns its error enum; this module holds the ones shared across
//! layers plus the crate-level [`Error`] that front-end code propagates.

use std::io;

use thiserror::Error;

use crate::device::DeviceError;
use crate::registry::ValidationError;
use crate::url::UrlError;

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    /// Request could not be routed to a backend
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Subscription failed after it was accepted
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    /// Malformed URL outside of a subscribe call
    #[error(transparent)]
    Url(#[from] UrlError),

    /// Malformed front-end request
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Socket or file I/O
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization of an outbound event
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Device(DeviceError::Validation(err))
    }
}

/// Result type for crate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Asynchronous failure of a pending subscribe request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    /// The driver could not connect, or failed while connected
    #[error("upstream connection failed: {0}")]
    UpstreamConnect(String),

    /// The caller withdrew interest before the sink was attached
    #[error("subscription to '{0}' cancelled")]
    Cancelled(String),

    /// The node went down before the request was served
    #[error("subscription '{0}' is closed")]
    Closed(String),

    /// The registry holds as many subscriptions as it is allowed to
    #[error("subscription limit reached ({max})")]
    CapacityExceeded { max: usize },
}

/// A value that a numeric stage could not interpret as a number
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoercionError {
    /// The event has no `value` field
    #[error("event has no 'value' field")]
    Missing,

    /// The `value` field is not a number or numeric string
    #[error("value is not numeric: {0}")]
    NotNumeric(String),
}
