//! Push callback for subscribed SIRI messages.
//!
//! Every replica accepts pushes; delivery is not leader-gated. The
//! handler validates the requestor id, records feed liveness and enqueues
//! the document for the consumers before responding, so Anshar never
//! waits on the matching engine.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tracing::warn;

use crate::anshar::{AnsharSubscriber, FeedKind, FeedPipeline};
use crate::metrics::Metrics;
use crate::siri;

#[derive(Clone)]
pub struct SiriMessagesState {
    pub requestor_id: String,
    pub et_enabled: bool,
    pub sx_enabled: bool,
    pub subscriber: Arc<AnsharSubscriber>,
    pub pipeline: Arc<FeedPipeline>,
    pub metrics: Arc<Metrics>,
}

pub async fn receive_siri_message(
    State(state): State<SiriMessagesState>,
    Path((requestor_id, kind)): Path<(String, String)>,
    body: String,
) -> (StatusCode, &'static str) {
    if requestor_id != state.requestor_id {
        warn!(%requestor_id, "Received unknown requestorId");
        state.metrics.record_rejected_callback();
        return (StatusCode::FORBIDDEN, "FORBIDDEN\n\n");
    }

    let kind = match FeedKind::from_path(&kind) {
        Some(FeedKind::Et) if state.et_enabled => FeedKind::Et,
        Some(FeedKind::Sx) if state.sx_enabled => FeedKind::Sx,
        _ => {
            warn!(%kind, "Unhandled message type");
            state.metrics.record_rejected_callback();
            return (StatusCode::FORBIDDEN, "FORBIDDEN\n\n");
        }
    };

    state.subscriber.record_received(kind).await;

    // Parse and match on the consumer side; respond right away.
    let pipeline = state.pipeline.clone();
    let metrics = state.metrics.clone();
    tokio::spawn(async move {
        match siri::parse(&body) {
            Ok(document) => pipeline.dispatch(kind, &document).await,
            Err(e) => {
                metrics.record_malformed_payload();
                warn!(bytes = body.len(), error = %e, "Discarding unparseable pushed document");
            }
        }
    });

    (StatusCode::OK, "OK\n\n")
}

pub fn router(state: SiriMessagesState) -> Router {
    Router::new()
        .route("/{requestor_id}/{kind}", post(receive_siri_message))
        .with_state(state)
}
