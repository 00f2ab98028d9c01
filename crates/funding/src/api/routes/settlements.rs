use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{stream, Stream};
use log::{debug, warn};
use std::{convert::Infallible, sync::Arc};
use tokio::sync::broadcast::error::RecvError;

use crate::startup::AppState;

/// Server-sent `paid` events, one per settled checking-id
pub async fn paid_invoices_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New settlement subscriber");
    let receiver = state.settlements.subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(checking_id) => {
                    let event = Event::default().event("paid").data(checking_id);
                    return Some((Ok::<Event, Infallible>(event), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Settlement subscriber fell behind, skipped {}", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
