use axum::{extract::State, http::StatusCode, response::ErrorResponse};
use log::{debug, error};
use std::sync::Arc;

use super::Error;
use crate::startup::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Result<StatusCode, ErrorResponse> {
    for (thread_name, thread) in state.background_threads.iter() {
        if thread.is_finished() {
            let err = Error::Thread(format!(
                "thread {} has died, we need to restart the service",
                thread_name
            ));
            error!("{}", err);
            return Err(err.into());
        }
    }

    debug!("service and background threads are up");
    Ok(StatusCode::OK)
}
