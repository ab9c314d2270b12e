//! Estimated Timetable matching engine.
//!
//! For one EstimatedVehicleJourney: derive the per-stop deviations,
//! intersect them with the subscription index along the
//! origin/destination/line/vehicle dimensions and hand the affected sets
//! to the notifier. Only stop refs on the national `NSR:` format take
//! part; quay refs are additionally matched through their parent stop
//! place.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, error, trace};

use crate::archive::MessageArchive;
use crate::journeys::LiveJourneys;
use crate::metrics::Metrics;
use crate::siri::{
    ArrivalBoardingActivity, CallStatus, DepartureBoardingActivity, EstimatedVehicleJourney,
};
use crate::stops::QuayStopPlaceMap;
use crate::subscriptions::{Notifier, Subscription, SubscriptionStore};

const NATIONAL_REF_PREFIX: &str = "NSR:";
const QUAY_REF_PREFIX: &str = "NSR:Quay:";
const IGNORED_SERVICE_FEATURE: &str = "freightTrain";

/// A per-stop fact derived from one journey update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deviation {
    Cancelled {
        stop_point_ref: String,
    },
    /// At least one of the two flags is true.
    Delayed {
        stop_point_ref: String,
        delayed_departure: bool,
        delayed_arrival: bool,
    },
}

impl Deviation {
    pub fn stop_point_ref(&self) -> &str {
        match self {
            Deviation::Cancelled { stop_point_ref } => stop_point_ref,
            Deviation::Delayed { stop_point_ref, .. } => stop_point_ref,
        }
    }
}

/// Per-stop data for one journey, keyed by stop point ref.
#[derive(Debug, Clone)]
pub struct StopData {
    pub aimed_departure_time: Option<DateTime<FixedOffset>>,
    pub arrival_boarding_activity: Option<ArrivalBoardingActivity>,
    pub departure_boarding_activity: Option<DepartureBoardingActivity>,
}

pub struct EtProcessor {
    subscriptions: Arc<dyn SubscriptionStore>,
    notifier: Arc<dyn Notifier>,
    live_journeys: Arc<dyn LiveJourneys>,
    quay_map: Arc<QuayStopPlaceMap>,
    archive: Arc<dyn MessageArchive>,
    metrics: Arc<Metrics>,
}

impl EtProcessor {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        notifier: Arc<dyn Notifier>,
        live_journeys: Arc<dyn LiveJourneys>,
        quay_map: Arc<QuayStopPlaceMap>,
        archive: Arc<dyn MessageArchive>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            subscriptions,
            notifier,
            live_journeys,
            quay_map,
            archive,
            metrics,
        }
    }

    /// Process one journey update. Returns false when the journey is
    /// ignored entirely, true otherwise (also on notifier failure, so the
    /// remaining side effects still run).
    pub fn process(&self, journey: &EstimatedVehicleJourney) -> bool {
        if should_ignore(journey) {
            debug!(line = ?journey.line_ref, "Ignoring freight train journey");
            return false;
        }

        self.live_journeys.update_journey(journey);

        let deviations = deviations(journey, Utc::now());
        if deviations.is_empty() {
            trace!(
                line = ?journey.line_ref,
                journey = ?journey.dated_vehicle_journey_ref,
                "No estimated delays or cancellations"
            );
        } else {
            debug!(
                line = ?journey.line_ref,
                journey = ?journey.dated_vehicle_journey_ref,
                deviations = deviations.len(),
                "Processing journey with deviations"
            );
            let matched = self.match_deviations(&deviations, journey);
            if let Err(e) = self.notifier.notify_on_stops(&matched, journey) {
                self.metrics.record_notify_failure();
                error!(error = %e, "Notifier failed for stop-matched subscriptions");
            }

            let on_line_or_vehicle = self.line_or_vehicle_subscriptions(journey);
            if !on_line_or_vehicle.is_empty() {
                if let Err(e) = self.notifier.notify_full_message(&on_line_or_vehicle, journey) {
                    self.metrics.record_notify_failure();
                    error!(error = %e, "Notifier failed for line/vehicle subscriptions");
                }
            }
        }

        self.archive.store_et(journey);
        true
    }

    fn match_deviations(
        &self,
        deviations: &[Deviation],
        journey: &EstimatedVehicleJourney,
    ) -> HashSet<Arc<Subscription>> {
        let stops = journey_stop_index(journey, &self.quay_map);
        let line_ref = journey.line_ref.as_deref();
        let vehicle_ref = journey.vehicle_ref.as_deref();

        // The same subscription is normally found twice, via its from and
        // to stops; the set collapses the duplicates.
        let mut matched = HashSet::new();
        for deviation in deviations {
            let stop_point = deviation.stop_point_ref();
            if !starts_with_ignore_case(stop_point, NATIONAL_REF_PREFIX) {
                continue;
            }
            for subscription in self.subscriptions.for_stop_point(stop_point) {
                if !valid_direction(&subscription, &stops) {
                    continue;
                }
                let side_hit = match deviation {
                    Deviation::Cancelled { .. } => true,
                    Deviation::Delayed {
                        delayed_departure,
                        delayed_arrival,
                        ..
                    } => subscribed_stop_delayed(
                        &subscription,
                        stop_point,
                        *delayed_departure,
                        *delayed_arrival,
                        &self.quay_map,
                    ),
                };
                if !side_hit {
                    continue;
                }
                if !ref_included(line_ref, &subscription.line_refs)
                    || !ref_included(vehicle_ref, &subscription.vehicle_refs)
                {
                    continue;
                }
                matched.insert(subscription);
            }
            trace!(stop = stop_point, matched = matched.len(), "Matched deviation");
        }
        matched
    }

    /// Subscriptions on the journey's whole line or vehicle, each narrowed
    /// by the other dimension when it is present.
    fn line_or_vehicle_subscriptions(
        &self,
        journey: &EstimatedVehicleJourney,
    ) -> HashSet<Arc<Subscription>> {
        let line_ref = journey.line_ref.as_deref().filter(|v| !v.trim().is_empty());
        let vehicle_ref = journey
            .vehicle_ref
            .as_deref()
            .filter(|v| !v.trim().is_empty());

        let mut result = HashSet::new();
        if let Some(line) = line_ref {
            let mut subs = self.subscriptions.for_line(line);
            if let Some(vehicle) = vehicle_ref {
                subs.retain(|s| s.vehicle_refs.is_empty() || s.vehicle_refs.contains(vehicle));
            }
            result.extend(subs);
        }
        if let Some(vehicle) = vehicle_ref {
            let mut subs = self.subscriptions.for_vehicle(vehicle);
            if let Some(line) = line_ref {
                subs.retain(|s| s.line_refs.is_empty() || s.line_refs.contains(line));
            }
            result.extend(subs);
        }
        result
    }
}

fn should_ignore(journey: &EstimatedVehicleJourney) -> bool {
    journey
        .service_feature_refs
        .iter()
        .any(|feature| feature.eq_ignore_ascii_case(IGNORED_SERVICE_FEATURE))
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Derive the deviations of a journey from its future estimated calls.
///
/// A cancelled journey cancels every future call; otherwise a call is
/// delayed when its status says so or its expected time lies after the
/// aimed time, separately for departure and arrival.
pub fn deviations(journey: &EstimatedVehicleJourney, now: DateTime<Utc>) -> Vec<Deviation> {
    let cancelled_journey = journey.is_cancellation();
    let mut deviations = Vec::new();

    for call in journey
        .estimated_calls
        .iter()
        .flat_map(|calls| &calls.estimated_calls)
    {
        let Some(stop_point_ref) = call.stop_point_ref.clone() else {
            continue;
        };
        let departure_reference = call
            .expected_departure_time
            .or(call.aimed_departure_time);
        let is_future = departure_reference.is_some_and(|t| t > now);
        if !is_future {
            continue;
        }

        if cancelled_journey || call.is_cancellation() {
            deviations.push(Deviation::Cancelled { stop_point_ref });
            continue;
        }

        let delayed_departure = call.departure_status == Some(CallStatus::Delayed)
            || is_delayed(call.aimed_departure_time, call.expected_departure_time);
        let delayed_arrival = call.arrival_status == Some(CallStatus::Delayed)
            || is_delayed(call.aimed_arrival_time, call.expected_arrival_time);
        if delayed_departure || delayed_arrival {
            deviations.push(Deviation::Delayed {
                stop_point_ref,
                delayed_departure,
                delayed_arrival,
            });
        }
    }
    deviations
}

fn is_delayed(
    aimed: Option<DateTime<FixedOffset>>,
    expected: Option<DateTime<FixedOffset>>,
) -> bool {
    match (aimed, expected) {
        (Some(aimed), Some(expected)) => expected > aimed,
        _ => false,
    }
}

/// Build the per-stop index for one journey. Estimated calls win over
/// recorded calls on the same ref. Every quay key whose parent resolves is
/// duplicated under the parent ref; originals remain, and the last quay
/// written wins on parent-key collisions.
pub fn journey_stop_index(
    journey: &EstimatedVehicleJourney,
    quay_map: &QuayStopPlaceMap,
) -> HashMap<String, StopData> {
    let mut stops = HashMap::new();

    for call in journey
        .recorded_calls
        .iter()
        .flat_map(|calls| &calls.recorded_calls)
    {
        if let Some(stop_point_ref) = &call.stop_point_ref {
            stops.insert(
                stop_point_ref.clone(),
                StopData {
                    aimed_departure_time: call.aimed_departure_time,
                    arrival_boarding_activity: None,
                    departure_boarding_activity: None,
                },
            );
        }
    }
    for call in journey
        .estimated_calls
        .iter()
        .flat_map(|calls| &calls.estimated_calls)
    {
        if let Some(stop_point_ref) = &call.stop_point_ref {
            stops.insert(
                stop_point_ref.clone(),
                StopData {
                    aimed_departure_time: call.aimed_departure_time,
                    arrival_boarding_activity: call.arrival_boarding_activity,
                    departure_boarding_activity: call.departure_boarding_activity,
                },
            );
        }
    }

    let mut mapped = HashMap::new();
    for (stop_point_ref, data) in &stops {
        if stop_point_ref.starts_with(QUAY_REF_PREFIX) {
            if let Some(stop_place_ref) = quay_map.resolve(stop_point_ref) {
                mapped.insert(stop_place_ref, data.clone());
            }
        }
    }
    stops.extend(mapped);
    stops
}

#[derive(Clone, Copy)]
enum Direction {
    From,
    To,
}

/// The journey serves the subscription's direction of travel: the origin
/// stop is called before the destination stop, boarding is possible at
/// the origin and alighting at the destination.
fn valid_direction(subscription: &Subscription, stops: &HashMap<String, StopData>) -> bool {
    let from_time = resolve_one(stops, &subscription.from_stop_points, Direction::From);
    let to_time = resolve_one(stops, &subscription.to_stop_points, Direction::To);
    match (from_time, to_time) {
        (Some(from), Some(to)) => from < to,
        _ => false,
    }
}

/// Walk the stop points in order; the first one present in the journey
/// decides. A set boarding activity other than the side-appropriate one
/// rules the subscription out at that stop.
fn resolve_one(
    stops: &HashMap<String, StopData>,
    stop_points: &BTreeSet<String>,
    direction: Direction,
) -> Option<DateTime<FixedOffset>> {
    for stop_point in stop_points {
        let Some(data) = stops.get(stop_point) else {
            continue;
        };
        match direction {
            Direction::From => {
                if let Some(activity) = data.departure_boarding_activity {
                    if activity != DepartureBoardingActivity::Boarding {
                        trace!(stop = %stop_point, "Skipping FROM stop, no boarding at departure");
                        return None;
                    }
                }
            }
            Direction::To => {
                if let Some(activity) = data.arrival_boarding_activity {
                    if activity != ArrivalBoardingActivity::Alighting {
                        trace!(stop = %stop_point, "Skipping TO stop, no alighting at arrival");
                        return None;
                    }
                }
            }
        }
        return data.aimed_departure_time;
    }
    None
}

/// The delay concerns the side of the journey the subscription cares
/// about: a departure delay at one of its from stops, or an arrival delay
/// at one of its to stops. Quay refs are also checked as their parent.
fn subscribed_stop_delayed(
    subscription: &Subscription,
    stop_point: &str,
    delayed_departure: bool,
    delayed_arrival: bool,
    quay_map: &QuayStopPlaceMap,
) -> bool {
    let hits = |stop: &str| {
        (subscription.from_stop_points.contains(stop) && delayed_departure)
            || (subscription.to_stop_points.contains(stop) && delayed_arrival)
    };
    if hits(stop_point) {
        return true;
    }
    if stop_point.starts_with(QUAY_REF_PREFIX) {
        if let Some(stop_place_ref) = quay_map.resolve(stop_point) {
            return hits(&stop_place_ref);
        }
    }
    false
}

/// Empty filter sets match anything, and so does a blank journey value.
fn ref_included(value: Option<&str>, refs: &BTreeSet<String>) -> bool {
    if refs.is_empty() {
        return true;
    }
    match value {
        Some(value) if !value.trim().is_empty() => refs.contains(value),
        _ => true,
    }
}
