use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

use crate::FundingError;

/// Result of asking a funding source for a new invoice.
///
/// Either `checking_id` and `payment_request` are set (success) or
/// `error_message` is, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceResponse {
    ok: bool,
    checking_id: Option<String>,
    payment_request: Option<String>,
    error_message: Option<String>,
}

impl InvoiceResponse {
    pub fn created(checking_id: impl Into<String>, payment_request: impl Into<String>) -> Self {
        Self {
            ok: true,
            checking_id: Some(checking_id.into()),
            payment_request: Some(payment_request.into()),
            error_message: None,
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            ok: false,
            checking_id: None,
            payment_request: None,
            error_message: Some(error_message.into()),
        }
    }

    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn checking_id(&self) -> Option<&str> {
        self.checking_id.as_deref()
    }

    pub fn payment_request(&self) -> Option<&str> {
        self.payment_request.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl From<FundingError> for InvoiceResponse {
    fn from(value: FundingError) -> Self {
        InvoiceResponse::failed(value.to_string())
    }
}

/// Result of paying a BOLT11 invoice through a funding source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentResponse {
    ok: bool,
    checking_id: Option<String>,
    /// Routing fee in millisatoshis, 0 when the provider does not report it
    fee_msat: u64,
    error_message: Option<String>,
}

impl PaymentResponse {
    pub fn sent(checking_id: impl Into<String>, fee_msat: u64) -> Self {
        Self {
            ok: true,
            checking_id: Some(checking_id.into()),
            fee_msat,
            error_message: None,
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            ok: false,
            checking_id: None,
            fee_msat: 0,
            error_message: Some(error_message.into()),
        }
    }

    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn checking_id(&self) -> Option<&str> {
        self.checking_id.as_deref()
    }

    pub fn fee_msat(&self) -> u64 {
        self.fee_msat
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl From<FundingError> for PaymentResponse {
    fn from(value: FundingError) -> Self {
        PaymentResponse::failed(value.to_string())
    }
}

/// Settlement state of an invoice or payment.
///
/// `Unknown` covers "not settled yet" as well as anything the provider
/// answered that could not be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "PaymentStatusBody", from = "PaymentStatusBody")]
pub enum PaymentStatus {
    Paid,
    Failed,
    Unknown,
}

impl PaymentStatus {
    pub fn from_paid(paid: Option<bool>) -> Self {
        match paid {
            Some(true) => PaymentStatus::Paid,
            Some(false) => PaymentStatus::Failed,
            None => PaymentStatus::Unknown,
        }
    }

    pub fn paid(&self) -> Option<bool> {
        match self {
            PaymentStatus::Paid => Some(true),
            PaymentStatus::Failed => Some(false),
            PaymentStatus::Unknown => None,
        }
    }

    pub fn pending(&self) -> bool {
        *self != PaymentStatus::Paid
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PaymentStatusBody {
    paid: Option<bool>,
}

impl From<PaymentStatus> for PaymentStatusBody {
    fn from(value: PaymentStatus) -> Self {
        Self { paid: value.paid() }
    }
}

impl From<PaymentStatusBody> for PaymentStatus {
    fn from(value: PaymentStatusBody) -> Self {
        PaymentStatus::from_paid(value.paid)
    }
}

/// SHA-256 of an invoice description, committed to in the BOLT11 `h` field
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptionHash([u8; 32]);

impl DescriptionHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for DescriptionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DescriptionHash({})", self.to_hex())
    }
}

impl fmt::Display for DescriptionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for DescriptionHash {
    type Err = FundingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| FundingError::InvalidRequest(format!("invalid description hash: {}", e)))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            FundingError::InvalidRequest(format!(
                "description hash must be 32 bytes, got {} bytes",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for DescriptionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DescriptionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// What an invoice describes itself with: a plain memo or a description hash.
///
/// Flattened into provider request bodies it produces exactly one of the
/// `memo` or `description_hash` keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceDescription {
    Memo(String),
    DescriptionHash(DescriptionHash),
}

impl InvoiceDescription {
    /// A description hash wins over a memo, a missing memo is sent empty
    pub fn new(memo: Option<String>, description_hash: Option<DescriptionHash>) -> Self {
        match description_hash {
            Some(hash) => InvoiceDescription::DescriptionHash(hash),
            None => InvoiceDescription::Memo(memo.unwrap_or_default()),
        }
    }
}
