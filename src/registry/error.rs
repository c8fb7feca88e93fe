//! Request validation errors
//!
//! Raised while planning a subscription, before any registry state changes.

use thiserror::Error;

use crate::url::UrlError;

/// Error type for subscription request validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Parameter name not in the parameter table
    #[error("unsupported parameter '{0}'")]
    UnsupportedParameter(String),

    /// Parameter value failed its rule
    #[error("invalid value '{value}' for parameter '{name}': {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    /// Both parameters of an exclusive pair were given
    #[error("parameters '{0}' and '{1}' are mutually exclusive")]
    MutuallyExclusive(String, String),

    /// Nothing to subscribe to once the path is decoded
    #[error("request has an empty path")]
    EmptyPath,

    /// Request URL did not parse
    #[error(transparent)]
    Url(#[from] UrlError),
}

impl ValidationError {
    pub(crate) fn invalid(name: &str, value: &str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
