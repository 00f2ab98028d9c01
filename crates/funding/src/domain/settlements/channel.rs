use futures::{stream, Stream, StreamExt};
use funding_core::FundingError;
use log::debug;
use std::{pin::Pin, sync::Mutex};
use tokio::sync::mpsc;

/// Checking-ids of settled invoices, in the order the adapter observed them
pub type PaidInvoiceStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Producer side of a [`SettlementChannel`], handed to webhook receivers,
/// pollers and provider subscriptions.
#[derive(Clone, Debug)]
pub struct SettlementSender {
    tx: mpsc::UnboundedSender<String>,
}

impl SettlementSender {
    /// Queue a settled checking-id for the consumer.
    ///
    /// Returns false when nobody is listening anymore, the notification is
    /// dropped in that case.
    pub fn notify(&self, checking_id: impl Into<String>) -> bool {
        match self.tx.send(checking_id.into()) {
            Ok(()) => true,
            Err(mpsc::error::SendError(checking_id)) => {
                debug!(
                    "Settlement consumer is gone, dropping notification for {}",
                    checking_id
                );
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer dropped its stream
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Unbounded FIFO of settlement notifications owned by one adapter instance.
///
/// The channel holds on to a sender for as long as it lives, so the stream
/// handed out by [`SettlementChannel::subscribe`] only ends once the owning
/// adapter is dropped. There is a single consumer.
#[derive(Debug)]
pub struct SettlementChannel {
    sender: SettlementSender,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl Default for SettlementChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: SettlementSender { tx },
            receiver: Mutex::new(Some(rx)),
        }
    }

    pub fn sender(&self) -> SettlementSender {
        self.sender.clone()
    }

    pub fn subscribe(&self) -> Result<PaidInvoiceStream, FundingError> {
        let receiver = self
            .receiver
            .lock()
            .map_err(|e| FundingError::StreamUnavailable(format!("lock error: {}", e)))?
            .take()
            .ok_or_else(|| {
                FundingError::StreamUnavailable(String::from("already being consumed"))
            })?;

        let stream = stream::unfold(receiver, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|checking_id| (checking_id, receiver))
        });

        Ok(stream.boxed())
    }
}
