//! Polling-mode feed retrieval with the MoreData chain.

use std::sync::Arc;

use tracing::{debug, warn};

use super::client::FeedFetcher;
use super::pipeline::FeedPipeline;
use super::FeedKind;
use crate::metrics::Metrics;
use crate::siri;

/// One polling workflow per feed kind. Each invocation pulls pages in
/// sequence until the upstream reports no more data; any failure abandons
/// the round and the next scheduled tick starts over.
pub struct PollWorkflow {
    fetcher: Arc<dyn FeedFetcher>,
    pipeline: Arc<FeedPipeline>,
    kind: FeedKind,
    url: String,
    metrics: Arc<Metrics>,
}

impl PollWorkflow {
    pub fn new(
        fetcher: Arc<dyn FeedFetcher>,
        pipeline: Arc<FeedPipeline>,
        kind: FeedKind,
        url: String,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            fetcher,
            pipeline,
            kind,
            url,
            metrics,
        }
    }

    pub async fn run(&self) {
        loop {
            debug!(kind = %self.kind, url = %self.url, "About to call Anshar");
            let body = match self.fetcher.fetch_document(&self.url).await {
                Ok(body) => body,
                Err(e) => {
                    self.metrics.record_upstream_error();
                    warn!(kind = %self.kind, error = %e, "Feed pull failed, retrying on next tick");
                    return;
                }
            };

            let siri = match siri::parse(&body) {
                Ok(siri) => siri,
                Err(e) => {
                    self.metrics.record_malformed_payload();
                    warn!(
                        kind = %self.kind,
                        bytes = body.len(),
                        error = %e,
                        "Discarding unparseable feed page"
                    );
                    return;
                }
            };

            let more_data = siri.more_data();
            self.pipeline.dispatch(self.kind, &siri).await;

            if !more_data {
                return;
            }
            debug!(kind = %self.kind, "Calling Anshar again, more data available");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anshar::client::AnsharError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedFetcher {
        pages: Mutex<VecDeque<Result<String, AnsharError>>>,
        fetches: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(pages: Vec<Result<String, AnsharError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FeedFetcher for ScriptedFetcher {
        async fn fetch_document(&self, _url: &str) -> Result<String, AnsharError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AnsharError::Network("script exhausted".into())))
        }
    }

    fn page(more_data: bool, journey_line: &str) -> String {
        format!(
            r#"<Siri version="2.0">
  <ServiceDelivery>
    <MoreData>{more_data}</MoreData>
    <EstimatedTimetableDelivery>
      <EstimatedJourneyVersionFrame>
        <EstimatedVehicleJourney>
          <LineRef>{journey_line}</LineRef>
          <OperatorRef>NSB</OperatorRef>
        </EstimatedVehicleJourney>
      </EstimatedJourneyVersionFrame>
    </EstimatedTimetableDelivery>
  </ServiceDelivery>
</Siri>"#
        )
    }

    #[tokio::test]
    async fn follows_more_data_chain_until_exhausted() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok(page(true, "NSB:Line:1")),
            Ok(page(true, "NSB:Line:2")),
            Ok(page(false, "NSB:Line:3")),
        ]));
        let metrics = Arc::new(Metrics::new());
        let (pipeline, mut et_rx, _sx_rx) = FeedPipeline::new("NSB".into(), metrics.clone());
        let workflow = PollWorkflow::new(
            fetcher.clone(),
            Arc::new(pipeline),
            FeedKind::Et,
            "http://anshar.test/et".into(),
            metrics,
        );

        workflow.run().await;

        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 3);
        let mut lines = Vec::new();
        while let Ok(journey) = et_rx.try_recv() {
            lines.push(journey.line_ref.unwrap());
        }
        assert_eq!(lines, vec!["NSB:Line:1", "NSB:Line:2", "NSB:Line:3"]);
    }

    #[tokio::test]
    async fn upstream_failure_terminates_the_chain() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok(page(true, "NSB:Line:1")),
            Err(AnsharError::UpstreamStatus(503)),
            Ok(page(false, "NSB:Line:2")),
        ]));
        let metrics = Arc::new(Metrics::new());
        let (pipeline, mut et_rx, _sx_rx) = FeedPipeline::new("NSB".into(), metrics.clone());
        let workflow = PollWorkflow::new(
            fetcher.clone(),
            Arc::new(pipeline),
            FeedKind::Et,
            "http://anshar.test/et".into(),
            metrics.clone(),
        );

        workflow.run().await;

        // The page after the failure is left for the next scheduled tick
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
        assert!(et_rx.try_recv().is_ok());
        assert!(et_rx.try_recv().is_err());
        assert_eq!(metrics.snapshot().upstream_errors, 1);
    }

    #[tokio::test]
    async fn malformed_page_is_counted_and_dropped() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok("<Siri".into())]));
        let metrics = Arc::new(Metrics::new());
        let (pipeline, mut et_rx, _sx_rx) = FeedPipeline::new("NSB".into(), metrics.clone());
        let workflow = PollWorkflow::new(
            fetcher,
            Arc::new(pipeline),
            FeedKind::Et,
            "http://anshar.test/et".into(),
            metrics.clone(),
        );

        workflow.run().await;

        assert!(et_rx.try_recv().is_err());
        assert_eq!(metrics.snapshot().malformed_payloads, 1);
    }

    #[tokio::test]
    async fn single_page_without_more_data_fetches_once() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(page(false, "NSB:Line:1"))]));
        let metrics = Arc::new(Metrics::new());
        let (pipeline, _et_rx, _sx_rx) = FeedPipeline::new("NSB".into(), metrics.clone());
        let workflow = PollWorkflow::new(
            fetcher.clone(),
            Arc::new(pipeline),
            FeedKind::Et,
            "http://anshar.test/et".into(),
            metrics,
        );

        workflow.run().await;
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
    }
}
