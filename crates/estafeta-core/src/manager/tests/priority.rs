use super::common::*;
use crate::message::{reserved, HeaderValue};
use crate::selector::Selector;

#[test]
fn get_drains_in_priority_order() {
    let (manager, _dir) = test_manager();

    let a = put(&manager, "q", b"A", &[(reserved::PRIORITY, HeaderValue::Int(1))]);
    let b = put(&manager, "q", b"B", &[(reserved::PRIORITY, HeaderValue::Int(3))]);
    let c = put(&manager, "q", b"C", &[(reserved::PRIORITY, HeaderValue::Int(2))]);

    let first = manager.get("q", None, None).unwrap().unwrap();
    assert_eq!(first.id, b);
    assert_eq!(first.body, b"B");

    let second = manager.get("q", None, None).unwrap().unwrap();
    assert_eq!(second.id, c);

    let third = manager.get("q", None, None).unwrap().unwrap();
    assert_eq!(third.id, a);

    assert!(manager.get("q", None, None).unwrap().is_none());
}

#[test]
fn equal_priority_is_fifo() {
    let (manager, _dir) = test_manager();

    let ids: Vec<_> = (0..4)
        .map(|i| put(&manager, "q", format!("m{i}").as_bytes(), &[]))
        .collect();

    for expected in ids {
        let got = manager.get("q", None, None).unwrap().unwrap();
        assert_eq!(got.id, expected);
    }
}

#[test]
fn id_selector_picks_a_specific_message() {
    let (manager, _dir) = test_manager();

    let _first = put(&manager, "q", b"first", &[]);
    let second = put(&manager, "q", b"second", &[]);

    let got = manager
        .get("q", Some(&Selector::Id(second)), None)
        .unwrap()
        .unwrap();
    assert_eq!(got.id, second);

    // The untouched message is still there.
    assert_eq!(manager.list("q").unwrap().len(), 1);
}

#[test]
fn equality_selector_skips_non_matching_messages() {
    let (manager, _dir) = test_manager();

    put(&manager, "q", b"red", &[("color", HeaderValue::Str("red".into()))]);
    let blue = put(
        &manager,
        "q",
        b"blue",
        &[("color", HeaderValue::Str("blue".into()))],
    );

    let selector = Selector::Headers(headers(&[("color", HeaderValue::Str("blue".into()))]));
    let got = manager.get("q", Some(&selector), None).unwrap().unwrap();
    assert_eq!(got.id, blue);

    // No further match for the same selector.
    assert!(manager.get("q", Some(&selector), None).unwrap().is_none());
}

#[test]
fn reserved_headers_are_filled_on_put() {
    let (manager, _dir) = test_manager();

    put(&manager, "q", b"x", &[("origin", HeaderValue::Str("test".into()))]);

    let listed = manager.list("q").unwrap();
    assert_eq!(listed.len(), 1);
    let h = &listed[0];
    assert!(h.id().is_some());
    assert!(h.created().is_some());
    assert_eq!(h.priority(), 0);
    assert_eq!(h.max_deliveries(), 5);
    assert_eq!(
        h.get(reserved::DELIVERY).and_then(|v| v.as_symbol()),
        Some("best_effort")
    );
    assert_eq!(
        h.get("origin").and_then(|v| v.as_str()),
        Some("test")
    );
}
