//! Error types for the authenticated request pipeline.

use std::time::Duration;

use thiserror::Error;

/// Pipeline-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by a refresh flight.
///
/// Every waiter of a flight receives a clone of the same value, so this type
/// only carries owned, cloneable data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// No refresh credential is stored for the role - re-login required.
    #[error("No refresh token stored - re-login required")]
    NoRefreshToken,

    /// The backend accepted the refresh but returned no usable access token.
    #[error("Refresh response did not contain an access token")]
    MalformedRefreshResponse,

    /// Network failure or non-success status from the refresh endpoint.
    #[error("Refresh request failed{}: {detail}", http_status_suffix(.status))]
    RefreshRequestFailed { status: Option<u16>, detail: String },

    /// The refresh call did not settle within the configured bound.
    #[error("Refresh request timed out after {0:?}")]
    TimedOut(Duration),

    /// The owning refresh call was dropped before it settled.
    #[error("Refresh was cancelled before completing")]
    Cancelled,

    /// Credential storage failed while reading or persisting tokens.
    #[error("Credential store error: {0}")]
    Store(String),
}

impl RefreshError {
    /// Check if this error requires manual re-login.
    pub fn requires_relogin(&self) -> bool {
        matches!(
            self,
            Self::NoRefreshToken
                | Self::MalformedRefreshResponse
                | Self::RefreshRequestFailed {
                    status: Some(400..=499),
                    ..
                }
        )
    }

    /// Check if this error is transient and a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RefreshRequestFailed { status, .. } => {
                status.is_none_or(|s| s >= 500 || s == 429)
            }
            Self::TimedOut(_) | Self::Cancelled => true,
            _ => false,
        }
    }

    pub(crate) fn request_failed(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::RefreshRequestFailed {
            status,
            detail: detail.into(),
        }
    }
}

impl From<StoreError> for RefreshError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

fn http_status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Errors raised by credential store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Crate-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A token lifetime that cannot be represented as an expiry instant.
    #[error("Invalid credential lifetime: {0}")]
    InvalidLifetime(String),

    #[error("Login failed (HTTP {status}): {detail}")]
    Login { status: u16, detail: String },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Returns the refresh failure carried by this error, if any.
    pub fn as_refresh(&self) -> Option<&RefreshError> {
        match self {
            Self::Refresh(e) => Some(e),
            _ => None,
        }
    }
}
