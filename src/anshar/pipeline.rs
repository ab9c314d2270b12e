//! Per-kind processing pipeline: operator filter, internal queue,
//! consumer workers.
//!
//! Both ingestion modes dispatch parsed SIRI documents here. Elements not
//! attributed to the configured operator are dropped before queueing.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::FeedKind;
use crate::et::EtProcessor;
use crate::metrics::Metrics;
use crate::siri::{EstimatedVehicleJourney, PtSituationElement, Siri};
use crate::sx::SituationHandler;

const QUEUE_CAPACITY: usize = 1000;

pub struct FeedPipeline {
    operator: String,
    et_tx: mpsc::Sender<EstimatedVehicleJourney>,
    sx_tx: mpsc::Sender<PtSituationElement>,
    metrics: Arc<Metrics>,
}

impl FeedPipeline {
    pub fn new(
        operator: String,
        metrics: Arc<Metrics>,
    ) -> (
        Self,
        mpsc::Receiver<EstimatedVehicleJourney>,
        mpsc::Receiver<PtSituationElement>,
    ) {
        let (et_tx, et_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (sx_tx, sx_rx) = mpsc::channel(QUEUE_CAPACITY);
        (
            Self {
                operator,
                et_tx,
                sx_tx,
                metrics,
            },
            et_rx,
            sx_rx,
        )
    }

    /// Filter a parsed document and enqueue the matching elements for the
    /// given kind.
    pub async fn dispatch(&self, kind: FeedKind, siri: &Siri) {
        self.metrics.record_received(kind);
        match kind {
            FeedKind::Et => {
                for journey in siri
                    .estimated_vehicle_journeys()
                    .filter(|j| j.operator_ref.as_deref() == Some(self.operator.as_str()))
                {
                    if self.et_tx.send(journey.clone()).await.is_err() {
                        warn!("ET queue closed, dropping journey");
                        return;
                    }
                    self.metrics.record_enqueued(kind);
                }
            }
            FeedKind::Sx => {
                for situation in siri
                    .pt_situation_elements()
                    .filter(|s| s.participant_ref.as_deref() == Some(self.operator.as_str()))
                {
                    if self.sx_tx.send(situation.clone()).await.is_err() {
                        warn!("SX queue closed, dropping situation");
                        return;
                    }
                    self.metrics.record_enqueued(kind);
                }
            }
        }
    }
}

/// Drain the ET queue into the matching engine.
pub fn spawn_et_consumer(
    mut rx: mpsc::Receiver<EstimatedVehicleJourney>,
    processor: Arc<EtProcessor>,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(journey) = rx.recv().await {
            processor.process(&journey);
            metrics.record_processed(FeedKind::Et);
        }
        debug!("ET consumer stopped, queue closed");
    })
}

/// Drain the SX queue into the situation handler.
pub fn spawn_sx_consumer(
    mut rx: mpsc::Receiver<PtSituationElement>,
    handler: Arc<dyn SituationHandler>,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(situation) = rx.recv().await {
            handler.handle(&situation);
            metrics.record_processed(FeedKind::Sx);
        }
        debug!("SX consumer stopped, queue closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::siri;

    fn siri_with_operators() -> Siri {
        siri::parse(
            r#"<Siri version="2.0">
  <ServiceDelivery>
    <EstimatedTimetableDelivery>
      <EstimatedJourneyVersionFrame>
        <EstimatedVehicleJourney>
          <LineRef>NSB:Line:L1</LineRef>
          <OperatorRef>NSB</OperatorRef>
        </EstimatedVehicleJourney>
        <EstimatedVehicleJourney>
          <LineRef>RUT:Line:3</LineRef>
          <OperatorRef>RUT</OperatorRef>
        </EstimatedVehicleJourney>
      </EstimatedJourneyVersionFrame>
    </EstimatedTimetableDelivery>
    <SituationExchangeDelivery>
      <Situations>
        <PtSituationElement>
          <ParticipantRef>NSB</ParticipantRef>
          <SituationNumber>status-1</SituationNumber>
        </PtSituationElement>
        <PtSituationElement>
          <ParticipantRef>RUT</ParticipantRef>
          <SituationNumber>status-2</SituationNumber>
        </PtSituationElement>
      </Situations>
    </SituationExchangeDelivery>
  </ServiceDelivery>
</Siri>"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn et_dispatch_keeps_only_configured_operator() {
        let metrics = Arc::new(Metrics::new());
        let (pipeline, mut et_rx, _sx_rx) = FeedPipeline::new("NSB".into(), metrics.clone());

        pipeline.dispatch(FeedKind::Et, &siri_with_operators()).await;

        let journey = et_rx.try_recv().unwrap();
        assert_eq!(journey.line_ref.as_deref(), Some("NSB:Line:L1"));
        assert!(et_rx.try_recv().is_err());
        assert_eq!(metrics.snapshot().enqueued_et, 1);
        assert_eq!(metrics.snapshot().received_et, 1);
    }

    #[tokio::test]
    async fn sx_dispatch_filters_on_participant_ref() {
        let metrics = Arc::new(Metrics::new());
        let (pipeline, _et_rx, mut sx_rx) = FeedPipeline::new("NSB".into(), metrics.clone());

        pipeline.dispatch(FeedKind::Sx, &siri_with_operators()).await;

        let situation = sx_rx.try_recv().unwrap();
        assert_eq!(situation.situation_number.as_deref(), Some("status-1"));
        assert!(sx_rx.try_recv().is_err());
        assert_eq!(metrics.snapshot().enqueued_sx, 1);
    }

    #[tokio::test]
    async fn et_elements_are_not_fed_to_the_sx_queue() {
        let metrics = Arc::new(Metrics::new());
        let (pipeline, mut et_rx, mut sx_rx) = FeedPipeline::new("NSB".into(), metrics);

        pipeline.dispatch(FeedKind::Sx, &siri_with_operators()).await;
        assert!(et_rx.try_recv().is_err());
        assert!(sx_rx.try_recv().is_ok());
    }
}
