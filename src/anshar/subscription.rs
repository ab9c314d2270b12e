//! Subscription-mode lifecycle: scheduled renewal and heartbeat-based
//! liveness checking.
//!
//! Renewal POSTs one SubscriptionRequest per enabled kind; only a 200 is
//! success, anything else is logged and the next scheduled renew retries.
//! The checker renews early when no message has arrived for three
//! heartbeat intervals. Absent liveness keys never trigger: they mean
//! nothing has been received yet, which is normal right after start.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, trace, warn};

use super::client::SubscriptionPoster;
use super::FeedKind;
use crate::cluster::SharedMap;
use crate::metrics::Metrics;
use crate::siri::subscribe::{subscription_request_xml, SubscriptionParams};

pub const HEARTBEAT_INTERVAL_MS: u64 = 60_000;
pub const SUBSCRIPTION_DURATION_MIN: i64 = 720;

/// Shared-map key tracking when a pushed message of the kind last arrived.
pub fn last_received_key(kind: FeedKind) -> String {
    format!("AnsharLastReceived-{kind}")
}

pub struct AnsharSubscriber {
    poster: Arc<dyn SubscriptionPoster>,
    map: Arc<dyn SharedMap>,
    metrics: Arc<Metrics>,
    requestor_id: String,
    requestor_ref: String,
    subscription_url: String,
    own_base_url: String,
    et_enabled: bool,
    sx_enabled: bool,
}

impl AnsharSubscriber {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        poster: Arc<dyn SubscriptionPoster>,
        map: Arc<dyn SharedMap>,
        metrics: Arc<Metrics>,
        requestor_id: String,
        requestor_ref: String,
        subscription_url: String,
        own_base_url: String,
        et_enabled: bool,
        sx_enabled: bool,
    ) -> Self {
        Self {
            poster,
            map,
            metrics,
            requestor_id,
            requestor_ref,
            subscription_url,
            own_base_url,
            et_enabled,
            sx_enabled,
        }
    }

    fn enabled_kinds(&self) -> Vec<FeedKind> {
        let mut kinds = Vec::new();
        if self.et_enabled {
            kinds.push(FeedKind::Et);
        }
        if self.sx_enabled {
            kinds.push(FeedKind::Sx);
        }
        kinds
    }

    /// (Re-)establish the subscriptions. The subscription identifier is
    /// stable per kind, so repeated requests renew rather than duplicate.
    pub async fn renew(&self) {
        for kind in self.enabled_kinds() {
            let params = SubscriptionParams {
                requestor_id: &self.requestor_id,
                requestor_ref: &self.requestor_ref,
                own_base_url: &self.own_base_url,
                heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
                duration_minutes: SUBSCRIPTION_DURATION_MIN,
            };
            let body = match subscription_request_xml(kind, &params, Utc::now()) {
                Ok(body) => body,
                Err(e) => {
                    error!(kind = %kind, error = %e, "Could not build subscription request");
                    continue;
                }
            };

            info!(
                kind = %kind,
                minutes = SUBSCRIPTION_DURATION_MIN,
                "Setting up subscription"
            );
            match self.poster.post_subscription(&self.subscription_url, body).await {
                Ok(200) => info!(kind = %kind, "Successfully created subscription to Anshar"),
                Ok(status) => {
                    self.metrics.record_upstream_error();
                    error!(kind = %kind, status, "Unexpected response code from Anshar when subscribing");
                }
                Err(e) => {
                    self.metrics.record_upstream_error();
                    error!(kind = %kind, error = %e, "Could not subscribe to Anshar");
                }
            }
        }
    }

    /// Renew when any enabled feed has gone silent for 3x the heartbeat.
    pub async fn check(&self) {
        let now_ms = Utc::now().timestamp_millis();
        if self.any_feed_stale(now_ms).await {
            self.renew().await;
        }
    }

    async fn any_feed_stale(&self, now_ms: i64) -> bool {
        let threshold = 3 * HEARTBEAT_INTERVAL_MS as i64;
        for kind in self.enabled_kinds() {
            let key = last_received_key(kind);
            let raw = match self.map.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Could not read feed liveness");
                    continue;
                }
            };
            match raw.parse::<i64>() {
                Ok(last_ms) => {
                    let age_ms = now_ms - last_ms;
                    trace!(kind = %kind, age_ms, "Checked feed liveness");
                    if age_ms > threshold {
                        info!(kind = %kind, age_ms, "Renewing subscription, feed has gone silent");
                        return true;
                    }
                }
                Err(e) => warn!(key = %key, value = %raw, error = %e, "Unreadable feed liveness value"),
            }
        }
        false
    }

    /// Record that a pushed message of the kind just arrived.
    pub async fn record_received(&self, kind: FeedKind) {
        let key = last_received_key(kind);
        let value = Utc::now().timestamp_millis().to_string();
        if let Err(e) = self.map.set(&key, value).await {
            warn!(key = %key, error = %e, "Could not record feed liveness");
        }
    }
}
