use funding_core::PaymentStatus;
use lightning_invoice::DEFAULT_EXPIRY_TIME;
use log::{debug, error, info};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use super::SettlementSender;
use crate::infra::funding_source::FundingSource;

/// How long an invoice is watched when its expiry is not known
pub const DEFAULT_TRACKING_PERIOD: Duration = Duration::from_secs(DEFAULT_EXPIRY_TIME);

#[derive(Debug, Clone)]
struct Tracked {
    checking_id: String,
    expires_at: Instant,
}

/// Settlement producer for backends that cannot push.
///
/// Callers register the checking-ids of invoices they are waiting on, every
/// `poll_interval` each one is looked up. Paid invoices are emitted on the
/// adapter's settlement channel and forgotten, failed ones are forgotten,
/// anything else is asked again on the next round. Once an invoice expired
/// it gets one last lookup and is then dropped whatever the answer.
pub struct InvoicePoller {
    funding_source: Arc<dyn FundingSource>,
    sender: SettlementSender,
    outstanding: Mutex<Vec<Tracked>>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
}

impl InvoicePoller {
    pub fn new(
        funding_source: Arc<dyn FundingSource>,
        cancel_token: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        let sender = funding_source.settlement_sender();
        Self {
            funding_source,
            sender,
            outstanding: Mutex::new(Vec::new()),
            poll_interval,
            cancel_token,
        }
    }

    /// Watch an invoice for [`DEFAULT_TRACKING_PERIOD`]
    pub fn track(&self, checking_id: impl Into<String>) {
        self.track_for(checking_id, DEFAULT_TRACKING_PERIOD)
    }

    /// Watch an invoice that stays payable for `valid_for`
    pub fn track_for(&self, checking_id: impl Into<String>, valid_for: Duration) {
        let checking_id = checking_id.into();
        let Ok(mut outstanding) = self.outstanding.lock() else {
            error!("Invoice poller lock poisoned, not tracking {}", checking_id);
            return;
        };
        if outstanding
            .iter()
            .any(|tracked| tracked.checking_id == checking_id)
        {
            return;
        }

        debug!("Tracking invoice {} for {:?}", checking_id, valid_for);
        outstanding.push(Tracked {
            checking_id,
            expires_at: Instant::now() + valid_for,
        });
    }

    pub fn untrack(&self, checking_id: &str) {
        if let Ok(mut outstanding) = self.outstanding.lock() {
            outstanding.retain(|tracked| tracked.checking_id != checking_id);
        }
    }

    pub fn outstanding(&self) -> Vec<String> {
        self.tracked()
            .into_iter()
            .map(|tracked| tracked.checking_id)
            .collect()
    }

    fn tracked(&self) -> Vec<Tracked> {
        self.outstanding
            .lock()
            .map(|outstanding| outstanding.clone())
            .unwrap_or_default()
    }

    pub async fn watch(&self) -> Result<(), anyhow::Error> {
        info!(
            "Starting invoice poller for {} every {:?}",
            self.funding_source.name(),
            self.poll_interval
        );

        loop {
            if self.cancel_token.is_cancelled() {
                info!("Invoice poller received cancellation");
                break;
            }

            let settled = self.poll_outstanding().await;
            if settled > 0 {
                debug!("Invoice poller emitted {} settlements", settled);
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => continue,
                _ = self.cancel_token.cancelled() => {
                    info!("Invoice poller cancelled during sleep");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One polling round, returns how many settlements were emitted
    pub async fn poll_outstanding(&self) -> usize {
        let outstanding = self.tracked();
        debug!("Checking {} outstanding invoices", outstanding.len());

        let mut settled = 0;
        for Tracked {
            checking_id,
            expires_at,
        } in outstanding
        {
            let expired = expires_at <= Instant::now();
            match self.funding_source.get_invoice_status(&checking_id).await {
                PaymentStatus::Paid => {
                    info!("Invoice {} settled", checking_id);
                    self.untrack(&checking_id);
                    self.sender.notify(checking_id);
                    settled += 1;
                }
                PaymentStatus::Failed => {
                    info!("Invoice {} failed, no longer tracking it", checking_id);
                    self.untrack(&checking_id);
                }
                PaymentStatus::Unknown if expired => {
                    info!("Invoice {} expired unpaid, no longer tracking it", checking_id);
                    self.untrack(&checking_id);
                }
                PaymentStatus::Unknown => {}
            }
        }
        settled
    }
}
