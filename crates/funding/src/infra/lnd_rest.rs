use anyhow::anyhow;
use async_trait::async_trait;
use base64::Engine;
use funding_core::{
    DescriptionHash, FundingError, InvoiceDescription, InvoiceResponse, PaymentResponse,
    PaymentStatus,
};
use futures::StreamExt;
use log::{debug, error, info, warn};
use reqwest_middleware::{
    reqwest::{Certificate, Client},
    ClientWithMiddleware,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    fs::{self, metadata},
    path::Path,
    time::Duration,
};

use crate::{
    config::LndRestSettings,
    domain::settlements::{PaidInvoiceStream, SettlementChannel, SettlementSender},
    infra::{
        funding_source::{ensure_positive_amount, status_or_unknown, FundingSource, SettlementMode},
        http::{
            build_reqwest_tls_client, drain_lines, normalize_endpoint, path_segment, send,
            send_first_line,
        },
    },
};

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct LndRestWallet {
    endpoint: String,
    macaroon: Option<SecretString>,
    client: ClientWithMiddleware,
    /// Used for the invoice subscription, which must not be cut by the request timeout
    stream_client: Client,
    settlements: SettlementChannel,
}

#[derive(Debug, Deserialize)]
struct AddInvoiceResponse {
    r_hash: String,
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct SendPaymentResponse {
    #[serde(default)]
    payment_error: String,
    payment_hash: Option<String>,
    payment_route: Option<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    total_fees_msat: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLookup {
    state: Option<String>,
    #[serde(default)]
    settled: bool,
}

/// One update of `/v2/router/track`, stream items come wrapped in `result`
#[derive(Debug, Deserialize)]
struct TrackUpdate {
    result: Option<TrackedPayment>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TrackedPayment {
    status: Option<String>,
}

/// Map an lnd invoice `state`
pub fn invoice_state(state: &str) -> Result<PaymentStatus, FundingError> {
    match state {
        "SETTLED" => Ok(PaymentStatus::Paid),
        "CANCELED" => Ok(PaymentStatus::Failed),
        "OPEN" | "ACCEPTED" => Ok(PaymentStatus::Unknown),
        other => Err(FundingError::AmbiguousStatus(format!(
            "unexpected invoice state {:?}",
            other
        ))),
    }
}

/// Map an lnd payment `status`
pub fn payment_status(status: &str) -> Result<PaymentStatus, FundingError> {
    match status {
        "SUCCEEDED" => Ok(PaymentStatus::Paid),
        "FAILED" => Ok(PaymentStatus::Failed),
        "IN_FLIGHT" | "INITIATED" | "UNKNOWN" => Ok(PaymentStatus::Unknown),
        other => Err(FundingError::AmbiguousStatus(format!(
            "unexpected payment status {:?}",
            other
        ))),
    }
}

impl LndRestWallet {
    pub fn new(
        client: ClientWithMiddleware,
        settings: &LndRestSettings,
        timeout: Duration,
    ) -> Result<Self, anyhow::Error> {
        let macaroon = match settings.macaroon.as_deref().map(load_macaroon) {
            Some(Ok(macaroon)) => Some(macaroon),
            Some(Err(e)) => {
                error!("Unable to load lnd macaroon: {}", e);
                None
            }
            None => None,
        };

        let (client, stream_client) = if let Some(tls_cert_path) = &settings.tls_cert_path {
            info!("Found tls.cert file, using for lnd client");
            let cert = get_tls_cert(tls_cert_path)?;
            let stream_client = Client::builder()
                .add_root_certificate(cert.clone())
                .connect_timeout(timeout)
                .build()?;
            (build_reqwest_tls_client(cert, timeout)?, stream_client)
        } else {
            info!("No tls.cert file configured, skipping for lnd client");
            let stream_client = Client::builder().connect_timeout(timeout).build()?;
            (client, stream_client)
        };

        Ok(Self {
            endpoint: normalize_endpoint(&settings.endpoint),
            macaroon,
            client,
            stream_client,
            settlements: SettlementChannel::new(),
        })
    }

    fn macaroon(&self) -> Result<&str, FundingError> {
        self.macaroon
            .as_ref()
            .map(|macaroon| macaroon.expose_secret())
            .ok_or_else(|| {
                FundingError::Authentication(String::from(
                    "LND_REST_MACAROON is not set or could not be read",
                ))
            })
    }

    async fn try_create_invoice(
        &self,
        amount: u64,
        description: InvoiceDescription,
    ) -> Result<InvoiceResponse, FundingError> {
        ensure_positive_amount(amount)?;
        let mut body = json!({
            "value": amount.to_string(),
            "private": true,
        });
        match description {
            InvoiceDescription::Memo(memo) => body["memo"] = json!(memo),
            InvoiceDescription::DescriptionHash(hash) => {
                body["description_hash"] =
                    json!(base64::engine::general_purpose::STANDARD.encode(hash.as_bytes()))
            }
        }

        let response = send(
            self.client
                .post(format!("{}/v1/invoices", self.endpoint))
                .header(MACAROON_HEADER, self.macaroon()?)
                .json(&body),
        )
        .await?;
        if response.is_error() {
            return Err(response.into_error());
        }

        let invoice: AddInvoiceResponse = response.json()?;
        let checking_id = decode_base64_to_hex(&invoice.r_hash).ok_or_else(|| {
            FundingError::MalformedResponse(format!("r_hash is not base64: {}", invoice.r_hash))
        })?;
        Ok(InvoiceResponse::created(checking_id, invoice.payment_request))
    }

    async fn try_pay_invoice(&self, bolt11: &str) -> Result<PaymentResponse, FundingError> {
        let response = send(
            self.client
                .post(format!("{}/v1/channels/transactions", self.endpoint))
                .header(MACAROON_HEADER, self.macaroon()?)
                .json(&json!({ "payment_request": bolt11 })),
        )
        .await?;
        if response.is_error() {
            return Err(response.into_error());
        }

        let payment: SendPaymentResponse = response.json()?;
        if !payment.payment_error.is_empty() {
            return Err(FundingError::Provider(payment.payment_error));
        }

        let checking_id = payment
            .payment_hash
            .as_deref()
            .and_then(decode_base64_to_hex)
            .ok_or_else(|| {
                FundingError::MalformedResponse(String::from("missing payment_hash"))
            })?;
        let fee_msat = payment
            .payment_route
            .and_then(|route| route.total_fees_msat)
            .and_then(|fee| fee.parse().ok())
            .unwrap_or(0);

        Ok(PaymentResponse::sent(checking_id, fee_msat))
    }

    async fn try_invoice_status(&self, checking_id: &str) -> Result<PaymentStatus, FundingError> {
        let response = send(
            self.client
                .get(format!(
                    "{}/v1/invoice/{}",
                    self.endpoint,
                    path_segment(checking_id)?
                ))
                .header(MACAROON_HEADER, self.macaroon()?),
        )
        .await?;
        if response.is_error() {
            return Err(response.into_error());
        }

        let invoice: InvoiceLookup = response.json()?;
        match invoice.state.as_deref() {
            Some(state) => invoice_state(state),
            None if invoice.settled => Ok(PaymentStatus::Paid),
            None => Ok(PaymentStatus::Unknown),
        }
    }

    /// Looks the payment up by hash through the router. The first update on
    /// the track stream carries the current state, the rest is not waited for.
    async fn try_payment_status(&self, checking_id: &str) -> Result<PaymentStatus, FundingError> {
        let response = send_first_line(
            self.client
                .get(format!(
                    "{}/v2/router/track/{}?no_inflight_updates=false",
                    self.endpoint,
                    track_hash(checking_id)?
                ))
                .header(MACAROON_HEADER, self.macaroon()?),
        )
        .await?;
        if response.is_error() {
            return Err(response.into_error());
        }

        let update: TrackUpdate = response.json()?;
        if let Some(error) = update.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(FundingError::Provider(message));
        }

        match update.result.and_then(|payment| payment.status) {
            Some(status) => payment_status(&status),
            None => {
                debug!("lnd track update for {} has no status", checking_id);
                Ok(PaymentStatus::Unknown)
            }
        }
    }
}

#[async_trait]
impl FundingSource for LndRestWallet {
    fn name(&self) -> &'static str {
        "lnd_rest"
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Stream
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

    /// Starts the lnd invoice subscription, which keeps reconnecting until
    /// the returned stream is dropped
    async fn paid_invoices_stream(&self) -> Result<PaidInvoiceStream, FundingError> {
        let macaroon = SecretString::from(self.macaroon()?.to_string());
        let paid = self.settlements.subscribe()?;

        let sender = self.settlements.sender();
        let client = self.stream_client.clone();
        let url = format!("{}/v1/invoices/subscribe", self.endpoint);

        tokio::spawn(async move {
            info!("Starting invoice subscription at {}", url);

            loop {
                tokio::select! {
                    result = process_invoice_stream(&client, &url, &macaroon, &sender) => {
                        if let Err(e) = result {
                            warn!("Invoice subscription error: {}", e);
                        }
                    }
                    _ = sender.closed() => break,
                }

                info!("Invoice subscription reconnecting...");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                    _ = sender.closed() => break,
                }
            }
            info!("Paid invoices stream dropped, stopped invoice subscription");
        });

        Ok(paid)
    }
}

async fn process_invoice_stream(
    client: &Client,
    url: &str,
    macaroon: &SecretString,
    sender: &SettlementSender,
) -> Result<(), anyhow::Error> {
    let response = client
        .get(url)
        .header(MACAROON_HEADER, macaroon.expose_secret())
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(anyhow!("Subscription failed: {}", response.status()));
    }

    let mut stream = response.bytes_stream();
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);

        for line in drain_lines(&mut buffer) {
            let Some(payment_hash) = parse_settled_invoice(&line) else {
                continue;
            };
            debug!("Invoice settled: {}", payment_hash);
            if !sender.notify(payment_hash) {
                return Err(anyhow!("Channel closed"));
            }
        }
    }

    Ok(())
}

/// Hex payment hash of a settled invoice update, lnd wraps stream items in `result`
fn parse_settled_invoice(line: &str) -> Option<String> {
    if line.is_empty() {
        return None;
    }
    let update: Value = serde_json::from_str(line).ok()?;
    let invoice = update.get("result").unwrap_or(&update);

    let settled = invoice.get("state").and_then(Value::as_str) == Some("SETTLED")
        || invoice.get("settled").and_then(Value::as_bool) == Some(true);
    if !settled {
        return None;
    }

    invoice
        .get("r_hash")
        .and_then(Value::as_str)
        .and_then(decode_base64_to_hex)
}

/// lnd takes payment hashes in paths as url safe base64 of the 32 raw bytes
fn track_hash(checking_id: &str) -> Result<String, FundingError> {
    let bytes = hex::decode(checking_id)
        .ok()
        .filter(|bytes| bytes.len() == 32)
        .ok_or_else(|| {
            FundingError::InvalidRequest(format!(
                "checking id {:?} is not a hex payment hash",
                checking_id
            ))
        })?;
    Ok(base64::engine::general_purpose::URL_SAFE.encode(bytes))
}

fn decode_base64_to_hex(encoded: &str) -> Option<String> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(encoded))
        .ok()
        .map(hex::encode)
}

/// Accepts a hex encoded macaroon or a path to a `.macaroon` file
pub fn load_macaroon(value: &str) -> Result<SecretString, anyhow::Error> {
    if is_macaroon_file(value) {
        metadata(value)?;
        return read_macaroon(value);
    }

    hex::decode(value).map_err(|_| anyhow!("Macaroon is neither hex nor a '.macaroon' file"))?;
    Ok(SecretString::from(value.to_string()))
}

fn is_macaroon_file(file_path: &str) -> bool {
    Path::new(file_path).extension().and_then(|s| s.to_str()) == Some("macaroon")
}

fn read_macaroon(macaroon_path: &str) -> Result<SecretString, anyhow::Error> {
    let contents =
        fs::read(macaroon_path).map_err(|e| anyhow!("Failed to read macaroon file: {}", e))?;
    Ok(SecretString::from(hex::encode(contents)))
}

pub fn get_tls_cert(file_path: &str) -> Result<Certificate, anyhow::Error> {
    if Path::new(file_path).extension().and_then(|s| s.to_str()) != Some("cert") {
        return Err(anyhow!("Not a '.cert' file extension"));
    }

    let cert_bytes =
        fs::read(file_path).map_err(|e| anyhow!("Failed to read tls cert file: {}", e))?;
    Certificate::from_pem(&cert_bytes).map_err(|e| anyhow!("Failed to build cert from file: {}", e))
}
