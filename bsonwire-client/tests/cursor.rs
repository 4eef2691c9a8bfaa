mod common;

use bsonwire_bson::{doc, Long};
use bsonwire_client::{Client, ClientError, ClientOptions, CursorState};
use bsonwire_protocol::{Namespace, Reply, Request, ResponseFlags};
use common::{command, ok_reply, standalone, MockServer};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

const CURSOR_ID: i64 = 42;

/// Serves `total` documents `{i: n}` in batches of at most `batch`.
fn paging_handler(total: i32, batch: i32) -> common::Handler {
    let offset = Arc::new(Mutex::new(0i32));
    Arc::new(move |request: &Request| {
        let requested = match request {
            Request::Query(query) if !query.namespace.is_command() => {
                *offset.lock() = 0;
                query.number_to_return
            }
            Request::GetMore(get_more) => {
                assert_eq!(get_more.cursor_id, Long::from_i64(CURSOR_ID));
                get_more.number_to_return
            }
            Request::KillCursors(_) => return None,
            _ => {
                return match command(request) {
                    Some(("count", _)) => Some(ok_reply(request, doc! { "n" => total })),
                    _ => standalone(request),
                }
            }
        };

        let mut offset = offset.lock();
        let size = match requested {
            0 => batch,
            n => batch.min(n.abs()),
        };
        let start = *offset;
        let end = (start + size).min(total);
        *offset = end;

        let documents = (start..end).map(|i| doc! { "i" => i }).collect();
        let cursor_id = if end < total && requested >= 0 {
            Long::from_i64(CURSOR_ID)
        } else {
            Long::ZERO
        };
        Some(
            Reply::new(request.request_id(), documents)
                .with_cursor_id(cursor_id)
                .with_starting_from(start),
        )
    })
}

async fn client_for(server: &MockServer) -> Client {
    assert_ok!(Client::connect(ClientOptions::new(server.address.clone())).await)
}

fn items() -> Namespace {
    Namespace::new("shop", "items")
}

#[tokio::test]
async fn to_array_pages_through_every_batch() {
    common::init_tracing();
    let server = MockServer::start(paging_handler(7, 3)).await;
    let client = client_for(&server).await;

    let mut cursor = client.find(items(), doc! {}).unwrap();
    assert_eq!(cursor.state(), CursorState::Init);

    let documents = assert_ok!(cursor.to_array().await);
    let seen: Vec<i32> = documents.iter().map(|d| d.get_i32("i").unwrap()).collect();
    assert_eq!(seen, (0..7).collect::<Vec<_>>());
    assert!(cursor.is_closed());
    assert!(cursor.cursor_id().is_zero());

    let again = assert_err!(cursor.to_array().await);
    assert!(matches!(again, ClientError::CursorClosed));
    assert!(matches!(
        cursor.next_object().await,
        Err(ClientError::CursorClosed)
    ));
}

#[tokio::test]
async fn modifiers_rejected_once_query_has_run() {
    common::init_tracing();
    let server = MockServer::start(paging_handler(5, 2)).await;
    let client = client_for(&server).await;

    let mut cursor = client.find(items(), doc! {}).unwrap();
    assert_ok!(cursor.sort(doc! { "i" => 1 }));
    assert_ok!(cursor.batch_size(2));

    let first = assert_ok!(cursor.next_object().await);
    assert_eq!(first.unwrap().get_i32("i"), Some(0));
    assert_eq!(cursor.state(), CursorState::Open);

    assert!(matches!(
        cursor.sort(doc! { "i" => -1 }),
        Err(ClientError::QueryAlreadyExecuted)
    ));
    assert!(matches!(cursor.limit(1), Err(ClientError::QueryAlreadyExecuted)));
    assert!(matches!(cursor.skip(1), Err(ClientError::QueryAlreadyExecuted)));

    cursor.close().await;
    assert!(matches!(cursor.skip(1), Err(ClientError::CursorClosed)));
}

#[tokio::test]
async fn each_visits_documents_in_order() {
    common::init_tracing();
    let server = MockServer::start(paging_handler(4, 3)).await;
    let client = client_for(&server).await;

    let mut seen = Vec::new();
    let mut cursor = client.find(items(), doc! {}).unwrap();
    assert_ok!(cursor.each(|doc| seen.push(doc.get_i32("i").unwrap())).await);
    assert_eq!(seen, vec![0, 1, 2, 3]);
    assert!(cursor.is_closed());
}

#[tokio::test]
async fn limit_reached_early_kills_server_cursor() {
    common::init_tracing();
    let mut server = MockServer::start(paging_handler(10, 3)).await;
    let client = client_for(&server).await;

    let mut cursor = client.find(items(), doc! {}).unwrap();
    assert_ok!(cursor.limit(4));
    let documents = assert_ok!(cursor.to_array().await);
    assert_eq!(documents.len(), 4);

    let mut get_mores = Vec::new();
    loop {
        match server.next_request().await {
            Request::GetMore(get_more) => get_mores.push(get_more.number_to_return),
            Request::KillCursors(kill) => {
                assert_eq!(kill.cursor_ids, vec![Long::from_i64(CURSOR_ID)]);
                break;
            }
            _ => {}
        }
    }
    // The GetMore only asks for what the limit still allows.
    assert_eq!(get_mores, vec![1]);
}

#[tokio::test]
async fn query_failure_surfaces_server_error() {
    common::init_tracing();
    let handler: common::Handler = Arc::new(|request: &Request| match request {
        Request::Query(query) if !query.namespace.is_command() => Some(
            Reply::new(request.request_id(), vec![doc! { "$err" => "invalid operator: $foo", "code" => 10068 }])
                .with_flags(ResponseFlags::new().with(ResponseFlags::QUERY_FAILURE)),
        ),
        _ => standalone(request),
    });
    let server = MockServer::start(handler).await;
    let client = client_for(&server).await;

    let mut cursor = client.find(items(), doc! { "a" => doc! { "$foo" => 1 } }).unwrap();
    match cursor.next_object().await {
        Err(ClientError::ServerError { code, message }) => {
            assert_eq!(code, Some(10068));
            assert!(message.contains("$foo"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(cursor.is_closed());
}

#[tokio::test]
async fn count_and_find_one() {
    common::init_tracing();
    let server = MockServer::start(paging_handler(6, 4)).await;
    let client = client_for(&server).await;

    let cursor = client.find(items(), doc! {}).unwrap();
    assert_eq!(assert_ok!(cursor.count(false).await), 6);

    let first = assert_ok!(client.find_one(items(), doc! {}).await);
    assert_eq!(first.and_then(|d| d.get_i32("i")), Some(0));
}
