//! Ingestion of SIRI feeds from the Anshar aggregator.
//!
//! Two mutually exclusive modes, selected once at startup: polling (pull
//! pages and follow the MoreData chain) or subscription (push callbacks
//! with heartbeat-based liveness and scheduled renewal). Both feed the
//! same per-kind pipeline.

pub mod client;
pub mod pipeline;
pub mod polling;
pub mod subscription;

pub use client::{client_host_id, AnsharClient, AnsharError, FeedFetcher, SubscriptionPoster};
pub use pipeline::FeedPipeline;
pub use polling::PollWorkflow;
pub use subscription::{AnsharSubscriber, HEARTBEAT_INTERVAL_MS, SUBSCRIPTION_DURATION_MIN};

/// The two SIRI feed kinds this service ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Et,
    Sx,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Et => "et",
            FeedKind::Sx => "sx",
        }
    }

    /// Parse the kind segment of a callback path.
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "et" => Some(FeedKind::Et),
            "sx" => Some(FeedKind::Sx),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
