use std::time::Duration;

use super::common::*;
use crate::error::ManagerError;
use crate::message::{reserved, HeaderValue, DLQ};

const TX_TIMEOUT: Duration = Duration::from_secs(30);

#[test]
fn staged_put_is_invisible_until_commit() {
    let (manager, _dir) = test_manager();

    let tid = manager.begin(TX_TIMEOUT).unwrap();
    manager
        .put("q", b"staged".to_vec(), headers(&[]), Some(tid))
        .unwrap();

    // Not observable before commit — not even through the same manager.
    assert!(manager.get("q", None, None).unwrap().is_none());
    assert!(manager.list("q").unwrap().is_empty());

    manager.commit(tid).unwrap();

    let got = manager.get("q", None, None).unwrap().unwrap();
    assert_eq!(got.body, b"staged");
}

#[test]
fn aborted_put_is_never_persisted() {
    let (manager, _dir) = test_manager();

    let tid = manager.begin(TX_TIMEOUT).unwrap();
    manager
        .put("q", b"staged".to_vec(), headers(&[]), Some(tid))
        .unwrap();
    manager.abort(tid).unwrap();

    assert!(manager.get("q", None, None).unwrap().is_none());
}

#[test]
fn aborted_get_returns_message_with_bumped_redelivery() {
    let (manager, _dir) = test_manager();

    let id = put(&manager, "q", b"X", &[]);

    let tid = manager.begin(TX_TIMEOUT).unwrap();
    let got = manager.get("q", None, Some(tid)).unwrap().unwrap();
    assert_eq!(got.id, id);
    assert_eq!(got.headers.redelivery(), 0);

    manager.abort(tid).unwrap();

    let again = manager.get("q", None, None).unwrap().unwrap();
    assert_eq!(again.id, id);
    assert_eq!(again.headers.redelivery(), 1);
}

#[test]
fn committed_get_consumes_the_message() {
    let (manager, _dir) = test_manager();

    put(&manager, "q", b"X", &[]);

    let tid = manager.begin(TX_TIMEOUT).unwrap();
    assert!(manager.get("q", None, Some(tid)).unwrap().is_some());
    manager.commit(tid).unwrap();

    assert!(manager.get("q", None, None).unwrap().is_none());
    assert!(manager.get(DLQ, None, None).unwrap().is_none());
}

#[test]
fn repeated_message_exhausts_into_the_dlq() {
    let (manager, _dir) = test_manager();

    let id = put(
        &manager,
        "q",
        b"X",
        &[
            (reserved::DELIVERY, HeaderValue::Symbol("repeated".into())),
            (reserved::MAX_DELIVERIES, HeaderValue::Int(2)),
        ],
    );

    // Two consume attempts that both fail and abort.
    for _ in 0..2 {
        let tid = manager.begin(TX_TIMEOUT).unwrap();
        let got = manager.get("q", None, Some(tid)).unwrap().unwrap();
        assert_eq!(got.id, id);
        manager.abort(tid).unwrap();
    }

    // Third attempt: the message is exhausted, the origin queue is dry.
    assert!(manager.get("q", None, None).unwrap().is_none());

    let parked = manager.get(DLQ, None, None).unwrap().unwrap();
    assert_eq!(parked.id, id);
    assert_eq!(parked.headers.redelivery(), 2);
}

#[test]
fn once_message_aborts_into_the_dlq() {
    let (manager, _dir) = test_manager();

    let id = put(
        &manager,
        "q",
        b"X",
        &[(reserved::DELIVERY, HeaderValue::Symbol("once".into()))],
    );

    let tid = manager.begin(TX_TIMEOUT).unwrap();
    let got = manager.get("q", None, Some(tid)).unwrap().unwrap();
    assert_eq!(got.id, id);
    manager.abort(tid).unwrap();

    // Never redelivered on the origin queue, recoverable from the DLQ.
    assert!(manager.get("q", None, None).unwrap().is_none());
    let parked = manager.get(DLQ, None, None).unwrap().unwrap();
    assert_eq!(parked.id, id);
}

#[test]
fn once_message_commit_removes_it_entirely() {
    let (manager, _dir) = test_manager();

    put(
        &manager,
        "q",
        b"X",
        &[(reserved::DELIVERY, HeaderValue::Symbol("once".into()))],
    );

    let tid = manager.begin(TX_TIMEOUT).unwrap();
    assert!(manager.get("q", None, Some(tid)).unwrap().is_some());

    // Mid-transaction the message already sits in the DLQ (locked).
    assert_eq!(manager.list(DLQ).unwrap().len(), 1);

    manager.commit(tid).unwrap();

    assert!(manager.get("q", None, None).unwrap().is_none());
    assert!(manager.get(DLQ, None, None).unwrap().is_none());
}

#[test]
fn once_message_without_transaction_is_deleted_outright() {
    let (manager, _dir) = test_manager();

    let id = put(
        &manager,
        "q",
        b"X",
        &[(reserved::DELIVERY, HeaderValue::Symbol("once".into()))],
    );

    let got = manager.get("q", None, None).unwrap().unwrap();
    assert_eq!(got.id, id);

    assert!(manager.get("q", None, None).unwrap().is_none());
    assert!(manager.get(DLQ, None, None).unwrap().is_none());
}

#[test]
fn closed_transactions_are_reported() {
    let (manager, _dir) = test_manager();

    let tid = manager.begin(TX_TIMEOUT).unwrap();
    manager.commit(tid).unwrap();

    assert!(matches!(
        manager.commit(tid),
        Err(ManagerError::NoSuchTransaction(_))
    ));
    assert!(matches!(
        manager.abort(tid),
        Err(ManagerError::NoSuchTransaction(_))
    ));
    assert!(matches!(
        manager.put("q", b"x".to_vec(), headers(&[]), Some(tid)),
        Err(ManagerError::NoSuchTransaction(_))
    ));
    assert!(matches!(
        manager.get("q", None, Some(tid)),
        Err(ManagerError::NoSuchTransaction(_))
    ));
}

#[test]
fn transaction_spans_multiple_operations() {
    let (manager, _dir) = test_manager();

    let consumed = put(&manager, "in", b"consume me", &[]);

    let tid = manager.begin(TX_TIMEOUT).unwrap();
    let got = manager.get("in", None, Some(tid)).unwrap().unwrap();
    assert_eq!(got.id, consumed);
    manager
        .put("out", b"produced".to_vec(), headers(&[]), Some(tid))
        .unwrap();
    manager.commit(tid).unwrap();

    assert!(manager.get("in", None, None).unwrap().is_none());
    let produced = manager.get("out", None, None).unwrap().unwrap();
    assert_eq!(produced.body, b"produced");
}
