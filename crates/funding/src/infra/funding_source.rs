use async_trait::async_trait;
use funding_core::{DescriptionHash, FundingError, InvoiceResponse, PaymentResponse, PaymentStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::settlements::{PaidInvoiceStream, SettlementSender};

/// How a backend learns about settled invoices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    /// The provider calls our webhook, each callback is re-checked before it is emitted
    Push,
    /// The provider streams invoice updates over a long lived connection
    Stream,
    /// Outstanding invoices are polled by the [`crate::InvoicePoller`]
    Poll,
    /// Nothing will ever be emitted
    Unsupported,
}

impl fmt::Display for SettlementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            SettlementMode::Push => "push",
            SettlementMode::Stream => "stream",
            SettlementMode::Poll => "poll",
            SettlementMode::Unsupported => "unsupported",
        };
        f.write_str(mode)
    }
}

/// Capability contract every Lightning backend implements.
///
/// None of these calls fail with an error: provider and transport problems
/// come back as a failed response or [`PaymentStatus::Unknown`]. The only
/// exception is [`FundingSource::paid_invoices_stream`], which can be taken
/// once per adapter instance.
#[async_trait]
pub trait FundingSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn settlement_mode(&self) -> SettlementMode;

    /// Handle feeding this adapter's own settlement channel
    fn settlement_sender(&self) -> SettlementSender;

    /// `amount` is in satoshis. A description hash wins over the memo.
    async fn create_invoice(
        &self,
        amount: u64,
        memo: Option<String>,
        description_hash: Option<DescriptionHash>,
    ) -> InvoiceResponse;

    async fn pay_invoice(&self, bolt11: &str) -> PaymentResponse;

    async fn get_invoice_status(&self, checking_id: &str) -> PaymentStatus;

    async fn get_payment_status(&self, checking_id: &str) -> PaymentStatus;

    async fn paid_invoices_stream(&self) -> Result<PaidInvoiceStream, FundingError>;
}

pub(crate) fn ensure_positive_amount(amount: u64) -> Result<(), FundingError> {
    if amount == 0 {
        return Err(FundingError::InvalidRequest(String::from(
            "amount must be positive",
        )));
    }
    Ok(())
}

/// Collapse a status lookup into the tri-state, logging why it was unknown
pub(crate) fn status_or_unknown(
    provider: &str,
    checking_id: &str,
    result: Result<PaymentStatus, FundingError>,
) -> PaymentStatus {
    match result {
        Ok(status) => status,
        Err(e) => {
            log::warn!(
                "{}: status of {} is unknown: {}",
                provider,
                checking_id,
                e
            );
            PaymentStatus::Unknown
        }
    }
}
