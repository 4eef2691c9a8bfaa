mod common;

use bsonwire_bson::doc;
use bsonwire_client::{ClientError, ClientOptions, Connection, ConnectionState, Dispatch, SendOutcome};
use bsonwire_protocol::{Insert, Namespace, Query, Request};
use common::{standalone, wait_until, MockServer};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn reconnecting_options(server: &MockServer) -> ClientOptions {
    ClientOptions::new(server.address.clone())
        .with_reconnect_interval(Duration::from_millis(200))
        .with_max_reconnect_attempts(5)
}

fn insert(n: i32) -> Insert {
    Insert::new(Namespace::new("app", "events"), vec![doc! { "n" => n }])
}

#[tokio::test]
async fn queued_sends_flush_in_order_after_reconnect() {
    common::init_tracing();
    let server = MockServer::start(Arc::new(standalone)).await;
    let port = server.address.port;
    let conn = assert_ok!(Connection::connect(server.address.clone(), reconnecting_options(&server)).await);
    assert!(conn.is_connected());

    server.shutdown();
    drop(server);
    let dropped = wait_until(|| {
        let conn = conn.clone();
        async move { conn.state() != ConnectionState::Open }
    })
    .await;
    assert!(dropped, "connection never noticed the drop");

    for n in 1..=3 {
        let outcome = assert_ok!(conn.send(&insert(n), Dispatch::RoundRobin).await);
        assert_eq!(outcome, SendOutcome::Queued);
    }
    assert_eq!(conn.queued_len(), 3);

    let mut restarted = MockServer::start_on(port, Arc::new(standalone)).await;
    let mut order = Vec::new();
    while order.len() < 3 {
        if let Request::Insert(insert) = restarted.next_request().await {
            order.push(insert.documents[0].get_i32("n").unwrap());
        }
    }
    assert_eq!(order, vec![1, 2, 3]);

    let reopened = wait_until(|| {
        let conn = conn.clone();
        async move { conn.is_connected() }
    })
    .await;
    assert!(reopened);
    assert_eq!(conn.queued_len(), 0);
}

#[tokio::test]
async fn queued_request_gets_reply_after_reconnect() {
    common::init_tracing();
    let server = MockServer::start(Arc::new(standalone)).await;
    let port = server.address.port;
    let conn = assert_ok!(Connection::connect(server.address.clone(), reconnecting_options(&server)).await);

    server.shutdown();
    drop(server);
    assert!(
        wait_until(|| {
            let conn = conn.clone();
            async move { conn.state() != ConnectionState::Open }
        })
        .await
    );

    let waiting = {
        let conn = conn.clone();
        tokio::spawn(async move {
            let ping = Query::command("admin", doc! { "ping" => 1 });
            conn.request(&ping, Dispatch::RoundRobin).await
        })
    };
    assert!(
        wait_until(|| {
            let conn = conn.clone();
            async move { conn.queued_len() == 1 }
        })
        .await
    );

    let _restarted = MockServer::start_on(port, Arc::new(standalone)).await;
    let reply = assert_ok!(assert_ok!(waiting.await));
    assert!(!reply.is_error());
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    common::init_tracing();
    let server = MockServer::start(Arc::new(standalone)).await;
    let options = ClientOptions::new(server.address.clone())
        .with_reconnect_interval(Duration::from_millis(20))
        .with_max_reconnect_attempts(2);
    let conn = assert_ok!(Connection::connect(server.address.clone(), options).await);

    server.shutdown();
    drop(server);
    assert!(
        wait_until(|| {
            let conn = conn.clone();
            async move { conn.state() != ConnectionState::Open }
        })
        .await
    );

    let ping = Query::command("admin", doc! { "ping" => 1 });
    let result = conn.request(&ping, Dispatch::RoundRobin).await;
    assert!(matches!(result, Err(ClientError::NotConnected)));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(conn.queued_len(), 0);
}

#[tokio::test]
async fn close_fails_queued_requests() {
    common::init_tracing();
    let server = MockServer::start(Arc::new(standalone)).await;
    let conn = assert_ok!(Connection::connect(server.address.clone(), reconnecting_options(&server)).await);

    server.shutdown();
    drop(server);
    assert!(
        wait_until(|| {
            let conn = conn.clone();
            async move { conn.state() != ConnectionState::Open }
        })
        .await
    );

    let waiting = {
        let conn = conn.clone();
        tokio::spawn(async move {
            let ping = Query::command("admin", doc! { "ping" => 1 });
            conn.request(&ping, Dispatch::RoundRobin).await
        })
    };
    assert!(
        wait_until(|| {
            let conn = conn.clone();
            async move { conn.queued_len() == 1 }
        })
        .await
    );

    conn.close().await;
    let result = assert_ok!(waiting.await);
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert_eq!(conn.state(), ConnectionState::Closed);
}
