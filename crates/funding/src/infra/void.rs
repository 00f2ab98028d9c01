use async_trait::async_trait;
use funding_core::{DescriptionHash, FundingError, InvoiceResponse, PaymentResponse, PaymentStatus};
use log::warn;

use crate::{
    domain::settlements::{PaidInvoiceStream, SettlementChannel, SettlementSender},
    infra::funding_source::{FundingSource, SettlementMode},
};

/// Placeholder backend used when no provider is configured, every call fails
#[derive(Default)]
pub struct VoidWallet {
    settlements: SettlementChannel,
}

impl VoidWallet {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FundingSource for VoidWallet {
    fn name(&self) -> &'static str {
        "void"
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Unsupported
    }

    fn settlement_sender(&self) -> SettlementSender {
        self.settlements.sender()
    }

    async fn create_invoice(
        &self,
        _amount: u64,
        _memo: Option<String>,
        _description_hash: Option<DescriptionHash>,
    ) -> InvoiceResponse {
        InvoiceResponse::failed("VoidWallet cannot create invoices.")
    }

    async fn pay_invoice(&self, _bolt11: &str) -> PaymentResponse {
        PaymentResponse::failed("VoidWallet cannot pay invoices.")
    }

    async fn get_invoice_status(&self, _checking_id: &str) -> PaymentStatus {
        PaymentStatus::Unknown
    }

    async fn get_payment_status(&self, _checking_id: &str) -> PaymentStatus {
        PaymentStatus::Unknown
    }

    async fn paid_invoices_stream(&self) -> Result<PaidInvoiceStream, FundingError> {
        warn!("This backend does nothing, it is here just as a placeholder, you must configure an actual backend before being able to do anything useful with it.");
        self.settlements.subscribe()
    }
}
