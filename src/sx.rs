//! Situation (SX) handling seam.
//!
//! Matching situations against subscriptions happens outside this
//! service's core; the queue consumer only needs somewhere to hand the
//! filtered elements.

use tracing::info;

use crate::siri::PtSituationElement;

pub trait SituationHandler: Send + Sync {
    fn handle(&self, situation: &PtSituationElement);
}

pub struct LoggingSituationHandler;

impl SituationHandler for LoggingSituationHandler {
    fn handle(&self, situation: &PtSituationElement) {
        info!(
            situation_number = ?situation.situation_number,
            summary = ?situation.summary,
            "Received situation message"
        );
    }
}
