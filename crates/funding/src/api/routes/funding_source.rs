use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{ErrorResponse, IntoResponse},
    Json,
};
use funding_core::{DescriptionHash, PaymentStatus};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::Error;
use crate::{infra::bolt11::decode_bolt11, startup::AppState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoicePayload {
    /// Amount in satoshis
    pub amount: u64,
    pub memo: Option<String>,
    /// Hex encoded SHA-256 of the description, wins over `memo`
    pub description_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayInvoicePayload {
    pub bolt11: String,
}

pub async fn funding_source_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "name": state.funding_source.name(),
        "settlement_mode": state.funding_source.settlement_mode(),
    }))
}

pub async fn new_invoice(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateInvoicePayload>,
) -> Result<impl IntoResponse, ErrorResponse> {
    if body.amount == 0 {
        return Err(Error::BadRequest(String::from("amount must be positive")).into());
    }
    let description_hash = body
        .description_hash
        .as_deref()
        .map(str::parse::<DescriptionHash>)
        .transpose()
        .map_err(Error::from)?;

    let invoice = state
        .funding_source
        .create_invoice(body.amount, body.memo, description_hash)
        .await;

    if !invoice.ok() {
        warn!(
            "{} failed to create invoice: {}",
            state.funding_source.name(),
            invoice.error_message().unwrap_or_default()
        );
        return Ok((StatusCode::BAD_GATEWAY, Json(invoice)));
    }

    if let (Some(poller), Some(checking_id)) = (&state.poller, invoice.checking_id()) {
        let valid_for = invoice
            .payment_request()
            .and_then(|payment_request| decode_bolt11(payment_request).ok())
            .and_then(|decoded| decoded.time_to_expiry());
        match valid_for {
            Some(valid_for) => poller.track_for(checking_id, valid_for),
            None => poller.track(checking_id),
        }
    }
    debug!("created invoice {:?}", invoice.checking_id());
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn send_payment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PayInvoicePayload>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let decoded = decode_bolt11(&body.bolt11).map_err(Error::from)?;
    info!(
        "paying invoice {} for {:?} msat",
        decoded.payment_hash, decoded.amount_msat
    );

    let payment = state.funding_source.pay_invoice(body.bolt11.trim()).await;
    if !payment.ok() {
        warn!(
            "{} failed to pay {}: {}",
            state.funding_source.name(),
            decoded.payment_hash,
            payment.error_message().unwrap_or_default()
        );
        return Ok((StatusCode::BAD_GATEWAY, Json(payment)));
    }

    Ok((StatusCode::OK, Json(payment)))
}

pub async fn invoice_status(
    State(state): State<Arc<AppState>>,
    Path(checking_id): Path<String>,
) -> Json<PaymentStatus> {
    Json(state.funding_source.get_invoice_status(&checking_id).await)
}

pub async fn payment_status(
    State(state): State<Arc<AppState>>,
    Path(checking_id): Path<String>,
) -> Json<PaymentStatus> {
    Json(state.funding_source.get_payment_status(&checking_id).await)
}
