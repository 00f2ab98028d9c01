//! lntxbot backend, see <https://github.com/fiatjaf/lntxbot/blob/master/api.go>
//!
//! lntxbot cannot push settlements. Its stream only yields what the
//! [`crate::InvoicePoller`] feeds into it.

use async_trait::async_trait;
use funding_core::{
    DescriptionHash, FundingError, InvoiceDescription, InvoiceResponse, PaymentResponse,
    PaymentStatus,
};
use log::warn;
use reqwest_middleware::{reqwest::header::AUTHORIZATION, ClientWithMiddleware};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    config::LntxbotSettings,
    domain::settlements::{PaidInvoiceStream, SettlementChannel, SettlementSender},
    infra::{
        funding_source::{ensure_positive_amount, status_or_unknown, FundingSource, SettlementMode},
        http::{normalize_endpoint, path_segment, send, ProviderResponse},
    },
};

pub struct LntxbotWallet {
    endpoint: String,
    key: Option<SecretString>,
    client: ClientWithMiddleware,
    settlements: SettlementChannel,
    polled: bool,
}

#[derive(Debug, Serialize)]
struct AddInvoiceRequest {
    amt: String,
    #[serde(flatten)]
    description: InvoiceDescription,
}

#[derive(Debug, Deserialize)]
struct AddedInvoice {
    payment_hash: String,
    pay_req: String,
}

#[derive(Debug, Serialize)]
struct PayInvoiceRequest<'a> {
    invoice: &'a str,
}

#[derive(Debug, Deserialize)]
struct PaidInvoice {
    decoded: DecodedInvoice,
    fee_msat: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DecodedInvoice {
    payment_hash: String,
}

/// Map the `status` field of `/paymentstatus`
pub fn payment_status(status: &str) -> Result<PaymentStatus, FundingError> {
    match status {
        "complete" => Ok(PaymentStatus::Paid),
        "failed" => Ok(PaymentStatus::Failed),
        "pending" | "unknown" => Ok(PaymentStatus::Unknown),
        other => Err(FundingError::AmbiguousStatus(format!(
            "unexpected payment status {:?}",
            other
        ))),
    }
}

/// lntxbot answers some failures with a 200 and an `error` key
fn status_body(response: ProviderResponse) -> Result<Map<String, Value>, FundingError> {
    if response.is_error() {
        return Err(response.into_error());
    }
    let body: Map<String, Value> = response.json()?;
    if let Some(error) = body.get("error") {
        return Err(FundingError::Provider(match error {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        }));
    }
    Ok(body)
}

impl LntxbotWallet {
    /// `polled` tells whether an [`crate::InvoicePoller`] feeds the settlement channel
    pub fn new(client: ClientWithMiddleware, settings: &LntxbotSettings, polled: bool) -> Self {
        Self {
            endpoint: normalize_endpoint(&settings.api_endpoint),
            key: settings.key.clone().map(SecretString::from),
            client,
            settlements: SettlementChannel::new(),
            polled,
        }
    }

    fn authorization(&self) -> Result<String, FundingError> {
        self.key
            .as_ref()
            .map(|key| format!("Basic {}", key.expose_secret()))
            .ok_or_else(|| {
                FundingError::Authentication(String::from(
                    "LNTXBOT_KEY, LNTXBOT_ADMIN_KEY or LNTXBOT_INVOICE_KEY is not set",
                ))
            })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&T>,
    ) -> Result<ProviderResponse, FundingError> {
        let request = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .header(AUTHORIZATION, self.authorization()?);
        let request = match body {
            Some(body) => request.json(body),
            None => request,
        };
        send(request).await
    }

    async fn try_create_invoice(
        &self,
        amount: u64,
        description: InvoiceDescription,
    ) -> Result<InvoiceResponse, FundingError> {
        ensure_positive_amount(amount)?;
        let body = AddInvoiceRequest {
            amt: amount.to_string(),
            description,
        };
        let response = self.post("/addinvoice", Some(&body)).await?;
        if response.is_error() {
            return Err(response.into_error());
        }

        let invoice: AddedInvoice = response.json()?;
        Ok(InvoiceResponse::created(invoice.payment_hash, invoice.pay_req))
    }

    async fn try_pay_invoice(&self, bolt11: &str) -> Result<PaymentResponse, FundingError> {
        let response = self
            .post("/payinvoice", Some(&PayInvoiceRequest { invoice: bolt11 }))
            .await?;
        if response.is_error() {
            return Err(response.into_error());
        }

        let paid: PaidInvoice = response.json()?;
        Ok(PaymentResponse::sent(
            paid.decoded.payment_hash,
            paid.fee_msat.unwrap_or(0),
        ))
    }

    async fn try_invoice_status(&self, checking_id: &str) -> Result<PaymentStatus, FundingError> {
        let path = format!("/invoicestatus/{}?wait=false", path_segment(checking_id)?);
        let body = status_body(self.post::<()>(&path, None).await?)?;

        // no preimage only means not settled yet, it is not a failure
        if body.contains_key("preimage") {
            Ok(PaymentStatus::Paid)
        } else {
            Ok(PaymentStatus::Unknown)
        }
    }

    async fn try_payment_status(&self, checking_id: &str) -> Result<PaymentStatus, FundingError> {
        let path = format!("/paymentstatus/{}", path_segment(checking_id)?);
        let body = status_body(self.post::<()>(&path, None).await?)?;

        match body.get("status") {
            None => Ok(PaymentStatus::Unknown),
            Some(Value::String(status)) => payment_status(status),
            Some(other) => Err(FundingError::AmbiguousStatus(format!(
                "unexpected payment status {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl FundingSource for LntxbotWallet {
    fn name(&self) -> &'static str {
        "lntxbot"
    }

    fn settlement_mode(&self) -> SettlementMode {
        if self.polled {
            SettlementMode::Poll
        } else {
            SettlementMode::Unsupported
        }
    }

    fn settlement_sender(&self) -> SettlementSender {
        self.settlements.sender()
    }

    async fn create_invoice(
        &self,
        amount: u64,
        memo: Option<String>,
        description_hash: Option<DescriptionHash>,
    ) -> InvoiceResponse {
        let description = InvoiceDescription::new(memo, description_hash);
        self.try_create_invoice(amount, description)
            .await
            .unwrap_or_else(InvoiceResponse::from)
    }

    async fn pay_invoice(&self, bolt11: &str) -> PaymentResponse {
        self.try_pay_invoice(bolt11)
            .await
            .unwrap_or_else(PaymentResponse::from)
    }

    async fn get_invoice_status(&self, checking_id: &str) -> PaymentStatus {
        status_or_unknown(
            self.name(),
            checking_id,
            self.try_invoice_status(checking_id).await,
        )
    }

    async fn get_payment_status(&self, checking_id: &str) -> PaymentStatus {
        status_or_unknown(
            self.name(),
            checking_id,
            self.try_payment_status(checking_id).await,
        )
    }

    async fn paid_invoices_stream(&self) -> Result<PaidInvoiceStream, FundingError> {
        if !self.polled {
            warn!("lntxbot does not support a paid invoices stream, no settlements will be emitted");
        }
        self.settlements.subscribe()
    }
}
