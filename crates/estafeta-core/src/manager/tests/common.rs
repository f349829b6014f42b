use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::manager::{Manager, ManagerConfig};
use crate::message::HeaderValue;
use crate::store::DiskStore;

pub(super) fn test_manager() -> (Arc<Manager>, tempfile::TempDir) {
    test_manager_with_reap(Duration::from_secs(30))
}

pub(super) fn test_manager_with_reap(
    reap_interval: Duration,
) -> (Arc<Manager>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DiskStore::new(dir.path(), false));
    let manager = Manager::open(store, ManagerConfig { reap_interval }).unwrap();
    (manager, dir)
}

pub(super) fn headers(pairs: &[(&str, HeaderValue)]) -> HashMap<String, HeaderValue> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// Helper: put a message outside any transaction.
pub(super) fn put(
    manager: &Manager,
    queue: &str,
    body: &[u8],
    pairs: &[(&str, HeaderValue)],
) -> Uuid {
    manager
        .put(queue, body.to_vec(), headers(pairs), None)
        .unwrap()
}
