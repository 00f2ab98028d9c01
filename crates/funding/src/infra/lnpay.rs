//! LNPay backend, see <https://docs.lnpay.co/>
//!
//! Authenticates with an `X-Api-Key` header and embeds the wallet key in
//! request paths. Settlements are pushed to our webhook.

use async_trait::async_trait;
use funding_core::{
    DescriptionHash, FundingError, InvoiceDescription, InvoiceResponse, PaymentResponse,
    PaymentStatus,
};
use log::{debug, info, warn};
use reqwest_middleware::{reqwest::StatusCode, ClientWithMiddleware};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::LnPaySettings,
    domain::settlements::{PaidInvoiceStream, SettlementChannel, SettlementSender},
    infra::{
        funding_source::{ensure_positive_amount, status_or_unknown, FundingSource, SettlementMode},
        http::{normalize_endpoint, path_segment, send},
    },
};

const API_KEY_HEADER: &str = "X-Api-Key";
/// Event name LNPay uses when the wallet received a payment
pub const WALLET_RECEIVE_EVENT: &str = "wallet_receive";

pub struct LnPayWallet {
    endpoint: String,
    api_key: Option<SecretString>,
    wallet_key: Option<SecretString>,
    client: ClientWithMiddleware,
    settlements: SettlementChannel,
}

#[derive(Debug, Serialize)]
struct CreateInvoiceRequest {
    num_satoshis: String,
    #[serde(flatten)]
    description: InvoiceDescription,
}

#[derive(Debug, Deserialize)]
struct CreatedInvoice {
    id: String,
    payment_request: String,
}

#[derive(Debug, Serialize)]
struct WithdrawRequest<'a> {
    payment_request: &'a str,
}

#[derive(Debug, Deserialize)]
struct Withdrawal {
    #[serde(rename = "lnTx")]
    ln_tx: LnTx,
}

#[derive(Debug, Deserialize)]
struct LnTx {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SettledLookup {
    settled: Option<Value>,
}

/// LNPay reports settlement as `1` settled, `-1` failed and `0` pending
pub fn settled_status(settled: &Value) -> Result<PaymentStatus, FundingError> {
    match settled.as_i64() {
        Some(1) => Ok(PaymentStatus::Paid),
        Some(-1) => Ok(PaymentStatus::Failed),
        Some(0) => Ok(PaymentStatus::Unknown),
        _ => Err(FundingError::AmbiguousStatus(format!(
            "unexpected settled value {}",
            settled
        ))),
    }
}

impl LnPayWallet {
    pub fn new(client: ClientWithMiddleware, settings: &LnPaySettings) -> Self {
        Self {
            endpoint: normalize_endpoint(&settings.api_endpoint),
            api_key: settings.api_key.clone().map(SecretString::from),
            wallet_key: settings.wallet_key.clone().map(SecretString::from),
            client,
            settlements: SettlementChannel::new(),
        }
    }

    fn api_key(&self) -> Result<&str, FundingError> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or_else(|| FundingError::Authentication(String::from("LNPAY_API_KEY is not set")))
    }

    fn wallet_key(&self) -> Result<&str, FundingError> {
        self.wallet_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or_else(|| {
                FundingError::Authentication(String::from(
                    "LNPAY_WALLET_KEY or LNPAY_ADMIN_KEY is not set",
                ))
            })
    }

    async fn try_create_invoice(
        &self,
        amount: u64,
        description: InvoiceDescription,
    ) -> Result<InvoiceResponse, FundingError> {
        ensure_positive_amount(amount)?;
        let url = format!("{}/user/wallet/{}/invoice", self.endpoint, self.wallet_key()?);
        let body = CreateInvoiceRequest {
            num_satoshis: amount.to_string(),
            description,
        };

        let response = send(
            self.client
                .post(url)
                .header(API_KEY_HEADER, self.api_key()?)
                .json(&body),
        )
        .await?;

        if response.status != StatusCode::CREATED {
            return Err(response.into_error());
        }

        let invoice: CreatedInvoice = response.json()?;
        debug!("LNPay created invoice {}", invoice.id);
        Ok(InvoiceResponse::created(invoice.id, invoice.payment_request))
    }

    async fn try_pay_invoice(&self, bolt11: &str) -> Result<PaymentResponse, FundingError> {
        let url = format!("{}/user/wallet/{}/withdraw", self.endpoint, self.wallet_key()?);
        let response = send(
            self.client
                .post(url)
                .header(API_KEY_HEADER, self.api_key()?)
                .json(&WithdrawRequest {
                    payment_request: bolt11,
                }),
        )
        .await?;

        if response.status != StatusCode::CREATED {
            return Err(response.into_error());
        }

        let withdrawal: Withdrawal = response.json()?;
        // LNPay does not report routing fees
        Ok(PaymentResponse::sent(withdrawal.ln_tx.id, 0))
    }

    /// Ask LNPay whether the lightning transaction `lntx_id` settled
    pub async fn fetch_settled(&self, lntx_id: &str) -> Result<PaymentStatus, FundingError> {
        let url = format!(
            "{}/user/lntx/{}?fields=settled",
            self.endpoint,
            path_segment(lntx_id)?
        );
        let response = send(self.client.get(url).header(API_KEY_HEADER, self.api_key()?)).await?;

        if response.is_error() {
            return Err(response.into_error());
        }

        let lookup: SettledLookup = response.json()?;
        match lookup.settled {
            Some(settled) => settled_status(&settled),
            None => Err(FundingError::MalformedResponse(String::from(
                "missing settled field",
            ))),
        }
    }

    /// Process a webhook delivery from LNPay.
    ///
    /// Anything that is not a `wallet_receive` event carrying a lightning
    /// transaction id is ignored. The claimed settlement is never trusted,
    /// the transaction is looked up again and only emitted when LNPay
    /// confirms it settled. Returns the emitted checking-id.
    pub async fn handle_webhook(&self, body: &[u8]) -> Option<String> {
        let Ok(Value::Object(payload)) = serde_json::from_slice::<Value>(body) else {
            debug!("Ignoring LNPay webhook without a JSON object body");
            return None;
        };

        let event_name = payload
            .get("event")
            .and_then(|event| event.get("name"))
            .and_then(Value::as_str);
        if event_name != Some(WALLET_RECEIVE_EVENT) {
            debug!("Ignoring LNPay webhook event {:?}", event_name);
            return None;
        }

        let Some(lntx_id) = payload
            .get("data")
            .and_then(|data| data.pointer("/wtx/lnTx/id"))
            .and_then(Value::as_str)
        else {
            warn!("LNPay wallet_receive webhook without a lightning transaction id");
            return None;
        };

        match self.fetch_settled(lntx_id).await {
            Ok(PaymentStatus::Paid) => {
                info!("LNPay confirmed settlement of {}", lntx_id);
                self.settlements.sender().notify(lntx_id);
                Some(lntx_id.to_string())
            }
            Ok(status) => {
                warn!(
                    "LNPay webhook claimed {} was received but its status is {}",
                    lntx_id, status
                );
                None
            }
            Err(e) => {
                warn!("Could not confirm LNPay webhook for {}: {}", lntx_id, e);
                None
            }
        }
    }
}

#[async_trait]
impl FundingSource for LnPayWallet {
    fn name(&self) -> &'static str {
        "lnpay"
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Push
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
        self.get_payment_status(checking_id).await
    }

    async fn get_payment_status(&self, checking_id: &str) -> PaymentStatus {
        status_or_unknown(self.name(), checking_id, self.fetch_settled(checking_id).await)
    }

    async fn paid_invoices_stream(&self) -> Result<PaidInvoiceStream, FundingError> {
        self.settlements.subscribe()
    }
}
