mod helpers;

use std::collections::HashMap;
use std::time::Duration;

use estafeta_sdk::{Client, HeaderValue};

#[tokio::test]
async fn put_get_round_trip() {
    let server = helpers::TestServer::start();
    let client = Client::connect(server.addr()).await.unwrap();
    let orders = client.queue("orders");

    let mut headers = HashMap::new();
    headers.insert("kind".to_string(), HeaderValue::Str("invoice".to_string()));
    let id = orders
        .put(b"payload-1".to_vec(), headers, None)
        .await
        .unwrap();
    assert!(!id.is_empty());

    let message = orders.get(None, None).await.unwrap().expect("message");
    assert_eq!(message.id.to_string(), id);
    assert_eq!(message.body, b"payload-1");
    assert_eq!(
        message.headers.get("kind").and_then(|v| v.as_str()),
        Some("invoice")
    );

    assert!(orders.get(None, None).await.unwrap().is_none());
}

#[tokio::test]
async fn transaction_commit_and_abort_over_the_wire() {
    let server = helpers::TestServer::start();
    let client = Client::connect(server.addr()).await.unwrap();
    let queue = client.queue("jobs");

    queue.put(b"job-1".to_vec(), HashMap::new(), None).await.unwrap();

    // Abort: the message returns with its retry count bumped.
    let tx = client.begin(Duration::from_secs(30)).await.unwrap();
    assert!(
        !tx.id().is_empty(),
        "broker assigns every transaction an id"
    );
    let message = queue.get(None, Some(&tx)).await.unwrap().expect("message");
    assert_eq!(message.headers.redelivery(), 0);
    tx.abort().await.unwrap();

    let tx = client.begin(Duration::from_secs(30)).await.unwrap();
    let message = queue.get(None, Some(&tx)).await.unwrap().expect("message");
    assert_eq!(message.headers.redelivery(), 1);
    tx.commit().await.unwrap();

    assert!(queue.get(None, None).await.unwrap().is_none());
}

#[tokio::test]
async fn staged_put_is_invisible_to_a_second_client() {
    let server = helpers::TestServer::start();
    let producer = Client::connect(server.addr()).await.unwrap();
    let observer = Client::connect(server.addr()).await.unwrap();

    let tx = producer.begin(Duration::from_secs(30)).await.unwrap();
    producer
        .queue("audit")
        .put(b"entry".to_vec(), HashMap::new(), Some(&tx))
        .await
        .unwrap();

    assert!(observer
        .queue("audit")
        .get(None, None)
        .await
        .unwrap()
        .is_none());

    tx.commit().await.unwrap();

    assert!(observer
        .queue("audit")
        .get(None, None)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn topic_last_value_round_trip() {
    let server = helpers::TestServer::start();
    let client = Client::connect(server.addr()).await.unwrap();
    let prices = client.topic("prices");

    prices.publish(b"100".to_vec(), HashMap::new(), None).await.unwrap();

    let first = prices.retrieve(None, None).await.unwrap().expect("value");
    assert_eq!(first.body, b"100");

    // The handle has seen the current value.
    assert!(prices.retrieve(None, None).await.unwrap().is_none());

    prices.publish(b"105".to_vec(), HashMap::new(), None).await.unwrap();
    let second = prices.retrieve(None, None).await.unwrap().expect("value");
    assert_eq!(second.body, b"105");

    // Forgetting the seen id makes the current value observable again,
    // even though this handle has already retrieved it.
    assert!(prices.retrieve(None, None).await.unwrap().is_none());
    prices.reset_seen();
    let again = prices.retrieve(None, None).await.unwrap().expect("value");
    assert_eq!(again.id, second.id);
    assert_eq!(again.body, b"105");
}

#[tokio::test]
async fn get_where_predicate_selects_by_header() {
    let server = helpers::TestServer::start();
    let client = Client::connect(server.addr()).await.unwrap();
    let queue = client.queue("mixed");

    let mut small = HashMap::new();
    small.insert("size".to_string(), HeaderValue::Int(2));
    queue.put(b"small".to_vec(), small, None).await.unwrap();

    let mut large = HashMap::new();
    large.insert("size".to_string(), HeaderValue::Int(50));
    queue.put(b"large".to_vec(), large, None).await.unwrap();

    let message = queue
        .get_where(
            |headers, _now| {
                headers
                    .get("size")
                    .and_then(|v| v.as_int())
                    .is_some_and(|size| size > 10)
            },
            None,
        )
        .await
        .unwrap()
        .expect("matching message");
    assert_eq!(message.body, b"large");

    // The non-matching message is untouched.
    assert_eq!(queue.list().await.unwrap().len(), 1);
}
