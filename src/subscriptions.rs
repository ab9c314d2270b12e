//! Subscriptions and the collaborator seams around them.
//!
//! The subscription store is owned by an external service; the core only
//! reads through `SubscriptionStore` and delivers through `Notifier`. The
//! in-memory index implements the store for single-process deployments
//! and tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::siri::EstimatedVehicleJourney;
use crate::stops::QuayStopPlaceMap;

/// A registered subscription: travel between two stop sets, optionally
/// narrowed to lines and vehicles. Empty line/vehicle sets match any.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub from_stop_points: BTreeSet<String>,
    #[serde(default)]
    pub to_stop_points: BTreeSet<String>,
    #[serde(default)]
    pub line_refs: BTreeSet<String>,
    #[serde(default)]
    pub vehicle_refs: BTreeSet<String>,
}

// Identity is the id; the same subscription is typically found via both
// its from and to stops and must collapse to one entry.
impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscription {}

impl Hash for Subscription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

pub trait SubscriptionStore: Send + Sync {
    /// Subscriptions having the stop point among their from or to stops.
    /// A quay id also matches subscriptions on its parent stop place.
    fn for_stop_point(&self, stop_point: &str) -> HashSet<Arc<Subscription>>;

    fn for_line(&self, line_ref: &str) -> HashSet<Arc<Subscription>>;

    fn for_vehicle(&self, vehicle_ref: &str) -> HashSet<Arc<Subscription>>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Delivery boundary towards subscribers. No at-least-once guarantee.
pub trait Notifier: Send + Sync {
    fn notify_on_stops(
        &self,
        subscriptions: &HashSet<Arc<Subscription>>,
        journey: &EstimatedVehicleJourney,
    ) -> Result<(), NotifyError>;

    fn notify_full_message(
        &self,
        subscriptions: &HashSet<Arc<Subscription>>,
        journey: &EstimatedVehicleJourney,
    ) -> Result<(), NotifyError>;
}

/// In-memory subscription index.
pub struct InMemorySubscriptionIndex {
    quay_map: Arc<QuayStopPlaceMap>,
    by_id: RwLock<HashMap<String, Arc<Subscription>>>,
    by_stop: RwLock<HashMap<String, HashSet<Arc<Subscription>>>>,
    by_line: RwLock<HashMap<String, HashSet<Arc<Subscription>>>>,
    by_vehicle: RwLock<HashMap<String, HashSet<Arc<Subscription>>>>,
}

impl InMemorySubscriptionIndex {
    pub fn new(quay_map: Arc<QuayStopPlaceMap>) -> Self {
        Self {
            quay_map,
            by_id: RwLock::new(HashMap::new()),
            by_stop: RwLock::new(HashMap::new()),
            by_line: RwLock::new(HashMap::new()),
            by_vehicle: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, subscription: Subscription) -> Arc<Subscription> {
        let subscription = Arc::new(subscription);
        self.by_id
            .write()
            .expect("index lock poisoned")
            .insert(subscription.id.clone(), subscription.clone());

        let mut by_stop = self.by_stop.write().expect("index lock poisoned");
        for stop in subscription
            .from_stop_points
            .iter()
            .chain(&subscription.to_stop_points)
        {
            by_stop
                .entry(stop.clone())
                .or_default()
                .insert(subscription.clone());
        }
        drop(by_stop);

        let mut by_line = self.by_line.write().expect("index lock poisoned");
        for line in &subscription.line_refs {
            by_line
                .entry(line.clone())
                .or_default()
                .insert(subscription.clone());
        }
        drop(by_line);

        let mut by_vehicle = self.by_vehicle.write().expect("index lock poisoned");
        for vehicle in &subscription.vehicle_refs {
            by_vehicle
                .entry(vehicle.clone())
                .or_default()
                .insert(subscription.clone());
        }
        drop(by_vehicle);

        subscription
    }

    pub fn remove(&self, id: &str) {
        let removed = self
            .by_id
            .write()
            .expect("index lock poisoned")
            .remove(id);
        let Some(subscription) = removed else {
            return;
        };
        for index in [&self.by_stop, &self.by_line, &self.by_vehicle] {
            let mut index = index.write().expect("index lock poisoned");
            for subs in index.values_mut() {
                subs.remove(&subscription);
            }
            index.retain(|_, subs| !subs.is_empty());
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.read().expect("index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SubscriptionStore for InMemorySubscriptionIndex {
    fn for_stop_point(&self, stop_point: &str) -> HashSet<Arc<Subscription>> {
        let by_stop = self.by_stop.read().expect("index lock poisoned");
        let mut result: HashSet<Arc<Subscription>> = by_stop
            .get(stop_point)
            .cloned()
            .unwrap_or_default();
        // Subscriptions on the parent stop place also cover its quays
        if stop_point.starts_with("NSR:Quay:") {
            if let Some(stop_place) = self.quay_map.resolve(stop_point) {
                if let Some(subs) = by_stop.get(&stop_place) {
                    result.extend(subs.iter().cloned());
                }
            }
        }
        result
    }

    fn for_line(&self, line_ref: &str) -> HashSet<Arc<Subscription>> {
        self.by_line
            .read()
            .expect("index lock poisoned")
            .get(line_ref)
            .cloned()
            .unwrap_or_default()
    }

    fn for_vehicle(&self, vehicle_ref: &str) -> HashSet<Arc<Subscription>> {
        self.by_vehicle
            .read()
            .expect("index lock poisoned")
            .get(vehicle_ref)
            .cloned()
            .unwrap_or_default()
    }
}

/// Notifier that only logs. Stands in until a delivery transport is wired.
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify_on_stops(
        &self,
        subscriptions: &HashSet<Arc<Subscription>>,
        journey: &EstimatedVehicleJourney,
    ) -> Result<(), NotifyError> {
        if !subscriptions.is_empty() {
            info!(
                count = subscriptions.len(),
                line = ?journey.line_ref,
                "Notifying subscriptions matched on stops"
            );
        }
        Ok(())
    }

    fn notify_full_message(
        &self,
        subscriptions: &HashSet<Arc<Subscription>>,
        journey: &EstimatedVehicleJourney,
    ) -> Result<(), NotifyError> {
        if !subscriptions.is_empty() {
            info!(
                count = subscriptions.len(),
                line = ?journey.line_ref,
                "Notifying line/vehicle subscriptions with full message"
            );
        }
        Ok(())
    }
}
