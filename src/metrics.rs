/// Service metrics tracking
///
/// Counts received/enqueued feed messages and recoverable errors by kind.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use utoipa::ToSchema;

use crate::anshar::FeedKind;

#[derive(Debug, Default)]
pub struct Metrics {
    received_et: AtomicU64,
    received_sx: AtomicU64,
    enqueued_et: AtomicU64,
    enqueued_sx: AtomicU64,
    processed_et: AtomicU64,
    processed_sx: AtomicU64,
    upstream_errors: AtomicU64,
    malformed_payloads: AtomicU64,
    rejected_callbacks: AtomicU64,
    notify_failures: AtomicU64,
}

/// Point-in-time counter values for the status endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MetricsSnapshot {
    pub received_et: u64,
    pub received_sx: u64,
    pub enqueued_et: u64,
    pub enqueued_sx: u64,
    pub processed_et: u64,
    pub processed_sx: u64,
    pub upstream_errors: u64,
    pub malformed_payloads: u64,
    pub rejected_callbacks: u64,
    pub notify_failures: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A full SIRI document arrived for the given kind (poll page or push).
    pub fn record_received(&self, kind: FeedKind) {
        match kind {
            FeedKind::Et => self.received_et.fetch_add(1, Ordering::Relaxed),
            FeedKind::Sx => self.received_sx.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// One element passed the operator filter and entered its queue.
    pub fn record_enqueued(&self, kind: FeedKind) {
        match kind {
            FeedKind::Et => self.enqueued_et.fetch_add(1, Ordering::Relaxed),
            FeedKind::Sx => self.enqueued_sx.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_processed(&self, kind: FeedKind) {
        match kind {
            FeedKind::Et => self.processed_et.fetch_add(1, Ordering::Relaxed),
            FeedKind::Sx => self.processed_sx.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_payload(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_callback(&self) {
        self.rejected_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notify_failure(&self) {
        self.notify_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received_et: self.received_et.load(Ordering::Relaxed),
            received_sx: self.received_sx.load(Ordering::Relaxed),
            enqueued_et: self.enqueued_et.load(Ordering::Relaxed),
            enqueued_sx: self.enqueued_sx.load(Ordering::Relaxed),
            processed_et: self.processed_et.load(Ordering::Relaxed),
            processed_sx: self.processed_sx.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
            rejected_callbacks: self.rejected_callbacks.load(Ordering::Relaxed),
            notify_failures: self.notify_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_into_snapshot() {
        let metrics = Metrics::new();
        metrics.record_received(FeedKind::Et);
        metrics.record_received(FeedKind::Et);
        metrics.record_received(FeedKind::Sx);
        metrics.record_enqueued(FeedKind::Et);
        metrics.record_malformed_payload();
        metrics.record_rejected_callback();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received_et, 2);
        assert_eq!(snapshot.received_sx, 1);
        assert_eq!(snapshot.enqueued_et, 1);
        assert_eq!(snapshot.enqueued_sx, 0);
        assert_eq!(snapshot.malformed_payloads, 1);
        assert_eq!(snapshot.rejected_callbacks, 1);
        assert_eq!(snapshot.notify_failures, 0);
    }
}
