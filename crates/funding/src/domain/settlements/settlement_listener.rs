use futures::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::infra::funding_source::FundingSource;

/// The one consumer of a funding source's paid invoices stream.
///
/// Every settled checking-id is re-published on a broadcast channel so any
/// number of HTTP subscribers can follow along. Subscribers that fall behind
/// miss notifications, the wallet service is expected to reconcile through
/// the status endpoints.
pub struct SettlementListener {
    funding_source: Arc<dyn FundingSource>,
    publisher: broadcast::Sender<String>,
    cancel_token: CancellationToken,
}

impl SettlementListener {
    pub fn new(
        funding_source: Arc<dyn FundingSource>,
        publisher: broadcast::Sender<String>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            funding_source,
            publisher,
            cancel_token,
        }
    }

    pub async fn listen(&self) -> Result<(), anyhow::Error> {
        let mut paid = self.funding_source.paid_invoices_stream().await?;
        info!(
            "Listening for settlements from {} ({} mode)",
            self.funding_source.name(),
            self.funding_source.settlement_mode()
        );

        loop {
            tokio::select! {
                checking_id = paid.next() => {
                    let Some(checking_id) = checking_id else {
                        warn!("Paid invoices stream ended");
                        break;
                    };
                    info!("Invoice {} paid", checking_id);
                    if self.publisher.send(checking_id).is_err() {
                        debug!("No settlement subscribers connected");
                    }
                }
                _ = self.cancel_token.cancelled() => break,
            }
        }

        info!("Settlement listener stopped");
        Ok(())
    }
}
