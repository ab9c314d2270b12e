//! Cross-replica coordination: the shared map, per-trigger leader
//! election and the per-process inflight registry.

pub mod inflight;
pub mod leader;
pub mod map;

pub use inflight::InflightRegistry;
pub use leader::ClusterCoordinator;
pub use map::{MapError, MemoryMap, SharedMap};

/// Shared-map key holding the cluster-wide requestor id.
pub const REQUESTOR_ID_KEY: &str = "AnsharRequestorId";

/// Establish the process-wide requestor id: propose a fresh one, let the
/// first writer win, and read back the winning value.
pub async fn establish_requestor_id(
    map: &dyn SharedMap,
    product_name: &str,
) -> Result<String, MapError> {
    let proposed = format!("{}-{}", product_name.to_lowercase(), uuid::Uuid::new_v4());
    let requestor_id = match map.put_if_absent(REQUESTOR_ID_KEY, proposed.clone()).await? {
        Some(existing) => existing,
        None => proposed.clone(),
    };
    tracing::debug!(%requestor_id, %proposed, "Using requestor id");
    Ok(requestor_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requestor_id_is_stable_across_replicas() {
        let map = MemoryMap::new();
        let first = establish_requestor_id(&map, "Avvik").await.unwrap();
        let second = establish_requestor_id(&map, "Avvik").await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("avvik-"));
    }
}
