use funding_core::FundingError;
use lightning_invoice::Bolt11Invoice;
use std::{
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInvoice {
    pub payment_hash: String,
    pub amount_msat: Option<u64>,
    pub expires_at: Option<SystemTime>,
}

impl DecodedInvoice {
    /// Zero once the invoice has expired
    pub fn time_to_expiry(&self) -> Option<Duration> {
        self.expires_at.map(|expires_at| {
            expires_at
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO)
        })
    }
}

/// Check that `payment_request` is a well formed BOLT11 invoice before a
/// provider is asked to pay it
pub fn decode_bolt11(payment_request: &str) -> Result<DecodedInvoice, FundingError> {
    let invoice = Bolt11Invoice::from_str(payment_request.trim())
        .map_err(|e| FundingError::InvalidRequest(format!("invalid BOLT11 invoice: {}", e)))?;

    Ok(DecodedInvoice {
        payment_hash: invoice.payment_hash().to_string(),
        amount_msat: invoice.amount_milli_satoshis(),
        expires_at: invoice
            .expires_at()
            .and_then(|since_epoch| UNIX_EPOCH.checked_add(since_epoch)),
    })
}
