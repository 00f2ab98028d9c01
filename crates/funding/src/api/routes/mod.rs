mod funding_source;
mod settlements;
mod system;
mod webhooks;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use funding_core::FundingError;
use serde_json::json;
use thiserror::Error;

pub use funding_source::*;
pub use settlements::*;
pub use system::*;
pub use webhooks::*;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),
    #[error("background thread died: {0}")]
    Thread(String),
    #[error(transparent)]
    Funding(#[from] FundingError),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Error::BadRequest(_) | Error::Funding(FundingError::InvalidRequest(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            Error::Funding(FundingError::StreamUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("internal server error"),
            ),
        };
        let body = Json(json!({
            "error": error_message,
        }));
        (status, body).into_response()
    }
}
