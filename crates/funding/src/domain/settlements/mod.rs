mod channel;
mod invoice_poller;
mod settlement_listener;

pub use channel::{PaidInvoiceStream, SettlementChannel, SettlementSender};
pub use invoice_poller::InvoicePoller;
pub use settlement_listener::SettlementListener;
