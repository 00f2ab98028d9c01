pub mod api;
pub mod config;
pub mod domain;
pub mod infra;
pub mod startup;

pub use api::routes::*;
pub use config::*;
pub use domain::settlements::{
    InvoicePoller, PaidInvoiceStream, SettlementChannel, SettlementListener, SettlementSender,
};
pub use funding_core::{
    DescriptionHash, FundingError, InvoiceDescription, InvoiceResponse, PaymentResponse,
    PaymentStatus,
};
pub use infra::funding_source::*;
pub use infra::http::build_reqwest_client;
pub use infra::lnd_rest::LndRestWallet;
pub use infra::lnpay::LnPayWallet;
pub use infra::lntxbot::LntxbotWallet;
pub use infra::void::VoidWallet;
pub use startup::*;
