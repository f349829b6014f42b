use std::sync::Arc;
use std::time::Duration;

use super::common::*;
use crate::error::ManagerError;
use crate::manager::{Manager, ManagerConfig};
use crate::store::DiskStore;

#[test]
fn process_wide_start_is_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let _manager = Manager::start(
        Arc::new(DiskStore::new(dir.path(), false)),
        ManagerConfig::default(),
    )
    .unwrap();

    let other_dir = tempfile::tempdir().unwrap();
    let err = Manager::start(
        Arc::new(DiskStore::new(other_dir.path(), false)),
        ManagerConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ManagerError::ManagerAlreadyStarted));

    Manager::stop().unwrap();
    assert!(matches!(Manager::stop(), Err(ManagerError::ManagerNotStarted)));
}

#[test]
fn shutdown_aborts_open_transactions_and_releases_the_store() {
    let dir = tempfile::tempdir().unwrap();

    {
        let manager = Manager::open(
            Arc::new(DiskStore::new(dir.path(), false)),
            ManagerConfig::default(),
        )
        .unwrap();
        put(&manager, "q", b"X", &[]);
        let tid = manager.begin(Duration::from_secs(30)).unwrap();
        assert!(manager.get("q", None, Some(tid)).unwrap().is_some());
        manager.shutdown();
    }

    // A fresh manager can take over the same directory; the in-flight
    // transaction did not survive, so the message is back in the queue.
    let manager = Manager::open(
        Arc::new(DiskStore::new(dir.path(), false)),
        ManagerConfig::default(),
    )
    .unwrap();
    let got = manager.get("q", None, None).unwrap().unwrap();
    assert_eq!(got.body, b"X");
    manager.shutdown();
}

#[test]
fn reaper_aborts_transactions_past_their_deadline() {
    let (manager, _dir) = test_manager_with_reap(Duration::from_millis(20));

    let id = put(&manager, "q", b"X", &[]);

    let tid = manager.begin(Duration::from_millis(10)).unwrap();
    assert!(manager.get("q", None, Some(tid)).unwrap().is_some());

    // Give the reaper a few cycles to notice the blown deadline.
    std::thread::sleep(Duration::from_millis(300));

    assert!(matches!(
        manager.commit(tid),
        Err(ManagerError::NoSuchTransaction(_))
    ));

    // The abort released the lock and bumped the retry count.
    let got = manager.get("q", None, None).unwrap().unwrap();
    assert_eq!(got.id, id);
    assert_eq!(got.headers.redelivery(), 1);
}

#[test]
fn reaper_leaves_live_transactions_alone() {
    let (manager, _dir) = test_manager_with_reap(Duration::from_millis(20));

    let tid = manager.begin(Duration::from_secs(60)).unwrap();
    std::thread::sleep(Duration::from_millis(150));
    manager.commit(tid).unwrap();
}

#[test]
fn two_managers_cannot_share_a_store_directory() {
    let dir = tempfile::tempdir().unwrap();

    let owner = Manager::open(
        Arc::new(DiskStore::new(dir.path(), false)),
        ManagerConfig::default(),
    )
    .unwrap();

    let err = Manager::open(
        Arc::new(DiskStore::new(dir.path(), false)),
        ManagerConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ManagerError::Store(_)));

    owner.shutdown();
}
