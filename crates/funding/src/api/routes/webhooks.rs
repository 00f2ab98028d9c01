use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use log::debug;
use std::sync::Arc;

use crate::infra::lnpay::LnPayWallet;

/// LNPay always gets a 204 back, whatever the payload was. Whether a
/// settlement is emitted is decided by re-querying LNPay, never by the body.
pub async fn lnpay_webhook(State(wallet): State<Arc<LnPayWallet>>, body: Bytes) -> StatusCode {
    match wallet.handle_webhook(&body).await {
        Some(checking_id) => debug!("LNPay webhook settled {}", checking_id),
        None => debug!("LNPay webhook produced no settlement"),
    }
    StatusCode::NO_CONTENT
}

pub fn lnpay_webhook_router(wallet: Arc<LnPayWallet>) -> Router {
    Router::new()
        .route("/api/v1/webhooks/lnpay", post(lnpay_webhook))
        .with_state(wallet)
}
