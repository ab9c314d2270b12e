//! Live-journey cache.
//!
//! Keeps the latest ET update per journey so it can be served and flushed;
//! journeys are never persisted.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::debug;

use crate::siri::EstimatedVehicleJourney;

pub trait LiveJourneys: Send + Sync {
    fn update_journey(&self, journey: &EstimatedVehicleJourney);

    /// Evict journeys that have wholly passed.
    fn flush_old_journeys(&self);
}

struct CachedJourney {
    journey: EstimatedVehicleJourney,
    last_call_time: Option<DateTime<FixedOffset>>,
}

#[derive(Default)]
pub struct InMemoryLiveJourneys {
    journeys: Mutex<HashMap<String, CachedJourney>>,
}

impl InMemoryLiveJourneys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.journeys.lock().expect("journey lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn journeys(&self) -> Vec<EstimatedVehicleJourney> {
        self.journeys
            .lock()
            .expect("journey lock poisoned")
            .values()
            .map(|cached| cached.journey.clone())
            .collect()
    }
}

fn journey_key(journey: &EstimatedVehicleJourney) -> Option<String> {
    journey
        .dated_vehicle_journey_ref
        .clone()
        .or_else(|| match (&journey.line_ref, &journey.vehicle_ref) {
            (Some(line), Some(vehicle)) => Some(format!("{line}:{vehicle}")),
            _ => None,
        })
}

fn last_call_time(journey: &EstimatedVehicleJourney) -> Option<DateTime<FixedOffset>> {
    journey
        .estimated_calls
        .iter()
        .flat_map(|calls| &calls.estimated_calls)
        .flat_map(|call| {
            [
                call.expected_departure_time,
                call.aimed_departure_time,
                call.expected_arrival_time,
                call.aimed_arrival_time,
            ]
        })
        .flatten()
        .max()
}

impl LiveJourneys for InMemoryLiveJourneys {
    fn update_journey(&self, journey: &EstimatedVehicleJourney) {
        let Some(key) = journey_key(journey) else {
            debug!("Skipping live update for journey without usable key");
            return;
        };
        let cached = CachedJourney {
            journey: journey.clone(),
            last_call_time: last_call_time(journey),
        };
        self.journeys
            .lock()
            .expect("journey lock poisoned")
            .insert(key, cached);
    }

    fn flush_old_journeys(&self) {
        let now = Utc::now();
        let mut journeys = self.journeys.lock().expect("journey lock poisoned");
        let before = journeys.len();
        journeys.retain(|_, cached| cached.last_call_time.is_some_and(|t| t >= now));
        let flushed = before - journeys.len();
        if flushed > 0 {
            debug!(flushed, remaining = journeys.len(), "Flushed old journeys");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::siri::{EstimatedCall, EstimatedCalls};
    use chrono::Duration;

    fn journey(journey_ref: &str, minutes_from_now: i64) -> EstimatedVehicleJourney {
        EstimatedVehicleJourney {
            dated_vehicle_journey_ref: Some(journey_ref.to_string()),
            estimated_calls: Some(EstimatedCalls {
                estimated_calls: vec![EstimatedCall {
                    stop_point_ref: Some("NSR:StopPlace:1".to_string()),
                    aimed_departure_time: Some(
                        (Utc::now() + Duration::minutes(minutes_from_now)).fixed_offset(),
                    ),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn update_replaces_by_journey_ref() {
        let cache = InMemoryLiveJourneys::new();
        cache.update_journey(&journey("2208:2026-08-02", 10));
        cache.update_journey(&journey("2208:2026-08-02", 20));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn flush_drops_wholly_passed_journeys() {
        let cache = InMemoryLiveJourneys::new();
        cache.update_journey(&journey("past", -10));
        cache.update_journey(&journey("future", 10));
        assert_eq!(cache.len(), 2);

        cache.flush_old_journeys();
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.journeys()[0].dated_vehicle_journey_ref.as_deref(),
            Some("future")
        );
    }

    #[test]
    fn journeys_without_key_are_skipped() {
        let cache = InMemoryLiveJourneys::new();
        cache.update_journey(&EstimatedVehicleJourney::default());
        assert!(cache.is_empty());
    }
}
