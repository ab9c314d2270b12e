//! Per-trigger leader election over the shared map.
//!
//! Each registered trigger has a lease entry under `lock/<trigger>` holding
//! the owner id and an expiry time. A background loop per trigger renews
//! the lease on a cadence shorter than the TTL and takes over expired
//! leases with compare-and-swap. Leadership is authoritative only while
//! the loop holds it: a failed renewal drops the local flag immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::map::{MapError, SharedMap};

const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Lease {
    holder_id: String,
    expires_at: DateTime<Utc>,
}

impl Lease {
    fn new(holder_id: &str, ttl: Duration) -> Self {
        Self {
            holder_id: holder_id.to_string(),
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30)),
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

pub struct ClusterCoordinator {
    map: Arc<dyn SharedMap>,
    holder_id: String,
    lease_ttl: Duration,
    renew_interval: Duration,
    leadership: RwLock<HashMap<String, Arc<AtomicBool>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterCoordinator {
    pub fn new(map: Arc<dyn SharedMap>) -> Self {
        Self::with_lease_ttl(map, DEFAULT_LEASE_TTL)
    }

    /// Renewal runs at a third of the TTL so a healthy holder never lets
    /// the lease lapse.
    pub fn with_lease_ttl(map: Arc<dyn SharedMap>, lease_ttl: Duration) -> Self {
        Self {
            map,
            holder_id: Uuid::new_v4().to_string(),
            lease_ttl,
            renew_interval: lease_ttl / 3,
            leadership: RwLock::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Whether this replica currently owns the trigger's lease.
    pub fn is_leader(&self, trigger: &str) -> bool {
        let leadership = self.leadership.read().expect("leadership lock poisoned");
        leadership
            .get(trigger)
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Current leadership flags per registered trigger.
    pub fn leadership(&self) -> HashMap<String, bool> {
        let leadership = self.leadership.read().expect("leadership lock poisoned");
        leadership
            .iter()
            .map(|(name, flag)| (name.clone(), flag.load(Ordering::Relaxed)))
            .collect()
    }

    /// Start participating in the election for a trigger. Idempotent.
    pub fn register(self: &Arc<Self>, trigger: &str) {
        let flag = {
            let mut leadership = self.leadership.write().expect("leadership lock poisoned");
            if leadership.contains_key(trigger) {
                return;
            }
            let flag = Arc::new(AtomicBool::new(false));
            leadership.insert(trigger.to_string(), flag.clone());
            flag
        };

        let coordinator = self.clone();
        let trigger = trigger.to_string();
        let handle = tokio::spawn(async move {
            coordinator.lease_loop(trigger, flag).await;
        });
        self.handles.lock().expect("handle lock poisoned").push(handle);
    }

    /// Stop all lease loops. Held leases expire on their own TTL.
    pub fn stop(&self) {
        let mut handles = self.handles.lock().expect("handle lock poisoned");
        for handle in handles.drain(..) {
            handle.abort();
        }
        let leadership = self.leadership.read().expect("leadership lock poisoned");
        for flag in leadership.values() {
            flag.store(false, Ordering::Relaxed);
        }
    }

    async fn lease_loop(&self, trigger: String, flag: Arc<AtomicBool>) {
        let key = format!("lock/{trigger}");
        loop {
            match self.try_hold(&key).await {
                Ok(held) => {
                    let was_leader = flag.swap(held, Ordering::Relaxed);
                    if held && !was_leader {
                        info!(trigger = %trigger, "Gained leadership");
                    } else if !held && was_leader {
                        info!(trigger = %trigger, "Lost leadership");
                    }
                }
                Err(e) => {
                    // Leadership is only valid while we can prove it.
                    if flag.swap(false, Ordering::Relaxed) {
                        warn!(trigger = %trigger, error = %e, "Dropping leadership, shared map unreachable");
                    }
                }
            }
            tokio::time::sleep(self.renew_interval).await;
        }
    }

    /// One election round: acquire an absent lease, renew our own, take
    /// over an expired one, back off from a live foreign one.
    async fn try_hold(&self, key: &str) -> Result<bool, MapError> {
        let next = serde_json::to_string(&Lease::new(&self.holder_id, self.lease_ttl))
            .map_err(|e| MapError::Unavailable(format!("serialize lease: {e}")))?;

        match self.map.get(key).await? {
            None => self.map.compare_and_swap(key, None, next).await,
            Some(raw) => {
                let lease: Lease = match serde_json::from_str(&raw) {
                    Ok(lease) => lease,
                    Err(e) => {
                        warn!(key, error = %e, "Replacing unreadable lease entry");
                        return self.map.compare_and_swap(key, Some(raw.as_str()), next).await;
                    }
                };
                if lease.holder_id == self.holder_id || lease.is_expired() {
                    self.map.compare_and_swap(key, Some(raw.as_str()), next).await
                } else {
                    Ok(false)
                }
            }
        }
    }
}
