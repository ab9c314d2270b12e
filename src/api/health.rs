use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::cluster::ClusterCoordinator;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::scheduler::TriggerScheduler;
use crate::stops::QuayStopPlaceMap;

#[derive(Clone)]
pub struct HealthState {
    pub node_started: String,
    pub hostname: String,
    pub use_subscription: bool,
    pub et_enabled: bool,
    pub sx_enabled: bool,
    pub coordinator: Arc<ClusterCoordinator>,
    pub scheduler: Arc<TriggerScheduler>,
    pub metrics: Arc<Metrics>,
    pub quay_map: Arc<QuayStopPlaceMap>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// When this replica started
    pub node_started: String,
    pub hostname: String,
    /// ET feed status: "Subscribing", "Polling LEADER", "Polling NOT LEADER",
    /// with " (disabled)" appended when the kind is off
    pub status_et: String,
    pub status_sx: String,
    /// Leadership flag per registered trigger
    pub triggers: BTreeMap<String, bool>,
    /// When each trigger last fired on this replica (RFC 3339)
    pub last_fired: BTreeMap<String, String>,
    /// Number of quay to stop-place mappings currently loaded
    pub quay_mappings: usize,
    pub metrics: MetricsSnapshot,
}

fn feed_status(state: &HealthState, trigger: &str, enabled: bool) -> String {
    let mut status = if state.use_subscription {
        "Subscribing".to_string()
    } else if state.coordinator.is_leader(trigger) {
        "Polling LEADER".to_string()
    } else {
        "Polling NOT LEADER".to_string()
    };
    if !enabled {
        status.push_str(" (disabled)");
    }
    status
}

/// Replica status: feed modes, leadership and counters
#[utoipa::path(
    get,
    path = "/health/status",
    responses(
        (status = 200, description = "Replica status", body = StatusResponse)
    ),
    tag = "health"
)]
pub async fn status(State(state): State<HealthState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        node_started: state.node_started.clone(),
        hostname: state.hostname.clone(),
        status_et: feed_status(&state, "pollAnsharET", state.et_enabled),
        status_sx: feed_status(&state, "pollAnsharSX", state.sx_enabled),
        triggers: state.coordinator.leadership().into_iter().collect(),
        last_fired: state
            .scheduler
            .last_fired()
            .into_iter()
            .map(|(name, at)| (name, at.to_rfc3339()))
            .collect(),
        quay_mappings: state.quay_map.len(),
        metrics: state.metrics.snapshot(),
    })
}

async fn ok() -> &'static str {
    "OK\n\n"
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/live", get(ok))
        .route("/ready", get(ok))
        .route("/status", get(status))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryMap;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state() -> HealthState {
        let coordinator = Arc::new(ClusterCoordinator::new(Arc::new(MemoryMap::new())));
        let scheduler = Arc::new(TriggerScheduler::new(
            coordinator.clone(),
            Arc::new(crate::cluster::InflightRegistry::new()),
        ));
        HealthState {
            node_started: "2026-08-02 11:00:00".to_string(),
            hostname: "avvik-test".to_string(),
            use_subscription: false,
            et_enabled: true,
            sx_enabled: false,
            coordinator,
            scheduler,
            metrics: Arc::new(Metrics::new()),
            quay_map: Arc::new(QuayStopPlaceMap::new()),
        }
    }

    #[tokio::test]
    async fn live_and_ready_answer_ok() {
        for path in ["/live", "/ready"] {
            let response = router(state())
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], b"OK\n\n");
        }
    }

    #[tokio::test]
    async fn status_reports_feed_modes() {
        let response = router(state())
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status["hostname"], "avvik-test");
        assert_eq!(status["status_et"], "Polling NOT LEADER");
        assert_eq!(status["status_sx"], "Polling NOT LEADER (disabled)");
        assert_eq!(status["quay_mappings"], 0);
    }
}
