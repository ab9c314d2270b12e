//! Leader-gated periodic triggers.
//!
//! Every registered trigger gets its own timer task so a slow upstream
//! call never delays the other cadences. A trigger only fires when this
//! replica holds the trigger's lease AND the target workflow has no
//! running invocation in this process. Missed ticks are skipped, never
//! replayed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::cluster::{ClusterCoordinator, InflightRegistry};

const WARMUP_DELAY: Duration = Duration::from_secs(5);

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

struct Trigger {
    name: String,
    period: Duration,
    workflow: String,
    fire: TaskFn,
}

pub struct TriggerScheduler {
    coordinator: Arc<ClusterCoordinator>,
    inflight: Arc<InflightRegistry>,
    warmup: Duration,
    triggers: Mutex<Vec<Trigger>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    last_fired: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl TriggerScheduler {
    pub fn new(coordinator: Arc<ClusterCoordinator>, inflight: Arc<InflightRegistry>) -> Self {
        Self::with_warmup(coordinator, inflight, WARMUP_DELAY)
    }

    pub fn with_warmup(
        coordinator: Arc<ClusterCoordinator>,
        inflight: Arc<InflightRegistry>,
        warmup: Duration,
    ) -> Self {
        Self {
            coordinator,
            inflight,
            warmup,
            triggers: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            last_fired: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// When each trigger last fired on this replica.
    pub fn last_fired(&self) -> HashMap<String, DateTime<Utc>> {
        self.last_fired
            .lock()
            .expect("last-fired lock poisoned")
            .clone()
    }

    /// Register a trigger that invokes `fire` roughly every `period`,
    /// gated on leadership for `name` and idleness of `workflow`.
    pub fn register_trigger<F, Fut>(&self, name: &str, period: Duration, workflow: &str, fire: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut triggers = self.triggers.lock().expect("trigger lock poisoned");
        triggers.push(Trigger {
            name: name.to_string(),
            period,
            workflow: workflow.to_string(),
            fire: Arc::new(move || Box::pin(fire())),
        });
    }

    /// Start all registered triggers. Each joins the election for its own
    /// name and then runs its timer loop until `stop`.
    pub fn start(&self) {
        let triggers = {
            let mut triggers = self.triggers.lock().expect("trigger lock poisoned");
            std::mem::take(&mut *triggers)
        };

        let mut handles = self.handles.lock().expect("handle lock poisoned");
        for trigger in triggers {
            self.coordinator.register(&trigger.name);

            let coordinator = self.coordinator.clone();
            let inflight = self.inflight.clone();
            let warmup = self.warmup;
            let last_fired = self.last_fired.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(warmup).await;
                let mut interval = tokio::time::interval(trigger.period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    if !coordinator.is_leader(&trigger.name) {
                        trace!(trigger = %trigger.name, "Skipping tick, not leader");
                        continue;
                    }
                    if !inflight.is_idle(&trigger.workflow) {
                        trace!(
                            trigger = %trigger.name,
                            workflow = %trigger.workflow,
                            running = inflight.running(&trigger.workflow),
                            "Skipping tick, workflow still running"
                        );
                        continue;
                    }
                    debug!(trigger = %trigger.name, "Triggered by timer");
                    last_fired
                        .lock()
                        .expect("last-fired lock poisoned")
                        .insert(trigger.name.clone(), Utc::now());
                    let guard = inflight.begin(&trigger.workflow);
                    let invocation = (trigger.fire)();
                    // In-flight work finishes on its own; only the timers
                    // are cancelled on shutdown.
                    tokio::spawn(async move {
                        invocation.await;
                        drop(guard);
                    });
                }
            }));
        }
    }

    /// Cancel the timer loops. Running workflow invocations complete.
    pub fn stop(&self) {
        let mut handles = self.handles.lock().expect("handle lock poisoned");
        for handle in handles.drain(..) {
            handle.abort();
        }
        self.coordinator.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MemoryMap, SharedMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler_with_map(map: Arc<dyn SharedMap>) -> Arc<TriggerScheduler> {
        let coordinator = Arc::new(ClusterCoordinator::with_lease_ttl(
            map,
            Duration::from_millis(90),
        ));
        let inflight = Arc::new(InflightRegistry::new());
        Arc::new(TriggerScheduler::with_warmup(
            coordinator,
            inflight,
            Duration::ZERO,
        ))
    }

    #[tokio::test]
    async fn fires_repeatedly_once_leader() {
        let scheduler = scheduler_with_map(Arc::new(MemoryMap::new()));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        scheduler.register_trigger("t", Duration::from_millis(30), "w", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(fired.load(Ordering::SeqCst) >= 2);
        assert!(scheduler.last_fired().contains_key("t"));
        scheduler.stop();
    }

    #[tokio::test]
    async fn suppressed_while_lease_held_elsewhere() {
        let map: Arc<dyn SharedMap> = Arc::new(MemoryMap::new());
        // A foreign replica holds the lease far into the future.
        map.set(
            "lock/t",
            r#"{"holder_id":"other-replica","expires_at":"2100-01-01T00:00:00Z"}"#.to_string(),
        )
        .await
        .unwrap();

        let scheduler = scheduler_with_map(map);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        scheduler.register_trigger("t", Duration::from_millis(30), "w", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        scheduler.stop();
    }

    #[tokio::test]
    async fn running_workflow_suppresses_new_invocations() {
        let scheduler = scheduler_with_map(Arc::new(MemoryMap::new()));
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        scheduler.register_trigger("t", Duration::from_millis(20), "w", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // Outlives several timer periods
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        });
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        scheduler.stop();
    }
}
