//! Shared error types

use thiserror::Error;

/// Failures a funding source can run into while talking to its provider.
///
/// These never cross the `FundingSource` boundary as errors: adapters turn
/// them into failed responses or an unknown status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FundingError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("ambiguous status from provider: {0}")]
    AmbiguousStatus(String),

    /// The provider answered with an error payload, carries its message as is
    #[error("{0}")]
    Provider(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("paid invoices stream unavailable: {0}")]
    StreamUnavailable(String),
}

impl FundingError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, FundingError::Authentication(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, FundingError::Transport(_))
    }
}

impl From<serde_json::Error> for FundingError {
    fn from(value: serde_json::Error) -> Self {
        FundingError::MalformedResponse(value.to_string())
    }
}
