//! Webhook handler for GitHub push events

use axum::{
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::dispatch::Intake;

/// Every answer carries an empty JSON object.
fn acknowledge(status: StatusCode) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], "{}").into_response()
}

/// Handles the GitHub webhook POST request.
///
/// - 200: push processed, or acknowledged and running in the background
/// - 400: missing/invalid headers, signature mismatch, bad payload or
///   disallowed characters
/// - 501: verified, but not a push event
///
/// Routine outcomes never change the response; they are reported by mail.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let dispatcher = &state.dispatcher;
    if dispatcher.config().debug {
        for (name, value) in headers.iter() {
            debug!("HEADER> {}: {:?}", name, value);
        }
    }

    let job = match dispatcher.intake(&headers, body) {
        Ok(Intake::Push(job)) => job,
        Ok(Intake::NotImplemented { event_type }) => {
            debug!("Event <{}> acknowledged as not implemented", event_type);
            return acknowledge(StatusCode::NOT_IMPLEMENTED);
        }
        Err(e) => {
            let status = e.status_code();
            if status.is_client_error() {
                warn!("Rejected hook: {}", e);
            } else {
                error!("Error processing hook: {}", e);
            }
            return acknowledge(status);
        }
    };

    // Routines run on their own task so a dropped connection cannot cancel them.
    let runner = dispatcher.clone();
    let run = tokio::spawn(async move { runner.run(job).await });

    if dispatcher.config().detach_jobs {
        info!("Delivery accepted, routines running in the background");
    } else {
        match run.await {
            Ok(report) => info!(
                "All good, delivery processed ({} routines executed)",
                report.executed()
            ),
            Err(e) => error!("Routine task for delivery ended abnormally: {}", e),
        }
    }

    acknowledge(StatusCode::OK)
}
