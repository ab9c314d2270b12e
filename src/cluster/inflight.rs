//! Per-process workflow inflight tracking.
//!
//! Advisory and per-replica: the scheduler uses it to avoid piling up
//! invocations of the same workflow locally. Cluster-wide de-duplication
//! is the leader election's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct InflightRegistry {
    counts: Mutex<HashMap<String, Arc<AtomicUsize>>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one invocation of the workflow as running. The returned guard
    /// decrements the count when dropped.
    pub fn begin(&self, workflow: &str) -> InflightGuard {
        let counter = {
            let mut counts = self.counts.lock().expect("inflight lock poisoned");
            counts
                .entry(workflow.to_string())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                .clone()
        };
        counter.fetch_add(1, Ordering::SeqCst);
        InflightGuard { counter }
    }

    pub fn running(&self, workflow: &str) -> usize {
        let counts = self.counts.lock().expect("inflight lock poisoned");
        counts
            .get(workflow)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn is_idle(&self, workflow: &str) -> bool {
        self.running(workflow) == 0
    }
}

pub struct InflightGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_until_begun_and_after_drop() {
        let registry = InflightRegistry::new();
        assert!(registry.is_idle("et-retriever"));

        let guard = registry.begin("et-retriever");
        assert!(!registry.is_idle("et-retriever"));
        assert_eq!(registry.running("et-retriever"), 1);

        // Another workflow is unaffected
        assert!(registry.is_idle("sx-retriever"));

        drop(guard);
        assert!(registry.is_idle("et-retriever"));
    }

    #[test]
    fn counts_overlapping_invocations() {
        let registry = InflightRegistry::new();
        let a = registry.begin("tiamat-refresh");
        let b = registry.begin("tiamat-refresh");
        assert_eq!(registry.running("tiamat-refresh"), 2);
        drop(a);
        assert_eq!(registry.running("tiamat-refresh"), 1);
        drop(b);
        assert!(registry.is_idle("tiamat-refresh"));
    }
}
