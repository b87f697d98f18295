//! Session scenarios over an in-memory transport.

use std::time::Duration;

use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::protocol::{INVALID_ARGUMENT, UNKNOWN_ERROR};
use crate::transport::{ChannelTransport, RemoteEnd};

// ============================================================================
// Helpers
// ============================================================================

const SHORT: Option<Duration> = Some(Duration::from_millis(50));
const LONG: Option<Duration> = Some(Duration::from_secs(2));

fn options() -> SessionOptions {
    SessionOptions::new()
        .with_command_timeout(Duration::from_secs(2))
        .with_event_timeout(Duration::from_secs(2))
}

fn start() -> (Session, RemoteEnd) {
    let (transport, remote) = ChannelTransport::pair();
    (Session::start(transport, options()), remote)
}

/// Answers the next request with `result` and returns the request.
async fn answer(remote: &mut RemoteEnd, result: Value) -> Value {
    let request = remote.next_request().await.expect("request");
    let id = request["id"].as_u64().expect("request id");
    remote.respond(id, result);
    request
}

async fn subscribe(
    session: &Session,
    remote: &mut RemoteEnd,
    request: SubscriptionRequest,
    server_id: &str,
) -> (SubscriptionId, Value) {
    let (id, frame) = tokio::join!(
        session.subscribe(request),
        answer(remote, json!({ "subscription": server_id })),
    );
    (id.expect("subscribe"), frame)
}

/// Polls `condition` until it holds or two seconds pass.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_status_and_get_tree_answered_out_of_order() {
    let (session, mut remote) = start();

    let status = assert_ok!(session.send_command(Command::new("session.status", json!({}))));
    let tree = assert_ok!(
        session.send_command(Command::new("browsingContext.getTree", json!({})))
    );
    assert_eq!(status, CommandId::new(1));
    assert_eq!(tree, CommandId::new(2));

    let first = remote.next_request().await.expect("status frame");
    let second = remote.next_request().await.expect("getTree frame");
    assert_eq!(first["method"], "session.status");
    assert_eq!(first["id"], 1);
    assert_eq!(second["method"], "browsingContext.getTree");
    assert_eq!(second["id"], 2);
    assert!(first.get("goog:channel").is_none());

    remote.respond(2, json!({ "contexts": [] }));
    remote.respond(1, json!({ "ready": true, "message": "" }));

    let tree_result = assert_ok!(session.await_result(tree, LONG).await);
    let status_result = assert_ok!(session.await_result(status, LONG).await);
    assert_eq!(tree_result, json!({ "contexts": [] }));
    assert_eq!(status_result["ready"], true);
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn test_command_error_resolves_only_its_command() {
    let (session, mut remote) = start();

    let failing = assert_ok!(session.send_command(Command::new("script.evaluate", json!({}))));
    let sibling = assert_ok!(session.send_command(Command::new("session.status", json!({}))));
    remote.next_request().await.expect("frame");
    remote.next_request().await.expect("frame");

    remote.respond_error(failing.as_u64(), INVALID_ARGUMENT, "missing expression");

    let err = assert_err!(session.await_result(failing, LONG).await);
    assert!(matches!(err, Error::Command { id, .. } if id == failing));
    assert_eq!(err.code(), Some(INVALID_ARGUMENT));
    assert_eq!(session.pending_count(), 1);

    remote.respond(sibling.as_u64(), json!({ "ready": true }));
    assert_ok!(session.await_result(sibling, LONG).await);
}

#[tokio::test]
async fn test_late_response_after_timeout() {
    let (session, mut remote) = start();

    let id = assert_ok!(session.send_command(Command::new("session.status", json!({}))));
    remote.next_request().await.expect("frame");

    let err = assert_err!(session.await_result(id, SHORT).await);
    assert!(err.is_timeout());
    assert_eq!(session.pending_count(), 1);

    remote.respond(id.as_u64(), json!({ "ready": false }));
    let value = assert_ok!(session.await_result(id, LONG).await);
    assert_eq!(value["ready"], false);
}

#[tokio::test]
async fn test_execute_command() {
    let (session, mut remote) = start();

    let (result, request) = tokio::join!(
        session.execute_command("browsingContext.getTree", json!({ "maxDepth": 0 })),
        answer(&mut remote, json!({ "contexts": [{ "context": "ctx-1" }] })),
    );

    assert_eq!(request["params"]["maxDepth"], 0);
    let result = assert_ok!(result);
    assert_eq!(result["contexts"][0]["context"], "ctx-1");
}

#[tokio::test]
async fn test_duplicate_response_is_ignored() {
    let (session, mut remote) = start();

    let (result, _) = tokio::join!(
        session.execute_command("session.status", json!({})),
        answer(&mut remote, json!({ "ready": true })),
    );
    assert_ok!(result);

    remote.respond(1, json!({ "ready": true }));
    let (second, request) = tokio::join!(
        session.execute_command("session.status", json!({})),
        answer(&mut remote, json!({ "ready": false })),
    );
    assert_eq!(request["id"], 2);
    let second = assert_ok!(second);
    assert_eq!(second["ready"], false);
    assert!(session.take_protocol_errors().is_empty());
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_fails_pending_command_and_waits() {
    let (session, mut remote) = start();

    let id = assert_ok!(session.send_command(Command::new("session.status", json!({}))));
    let waiter = assert_ok!(session.expect_event("log.entryAdded"));
    remote.next_request().await.expect("frame");

    remote.close();

    assert!(matches!(
        session.await_result(id, LONG).await,
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        waiter.wait(Duration::from_secs(2)).await,
        Err(Error::ConnectionClosed)
    ));
    assert!(session.is_closed());
    assert!(matches!(
        session.send_command(Command::new("session.status", json!({}))),
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        session.drain_n_messages(1, LONG).await,
        Err(Error::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (session, remote) = start();
    let other = session.clone();

    assert_ok!(session.close().await);
    assert_ok!(other.close().await);

    assert!(session.is_closed());
    assert!(remote.is_session_closed());
    assert!(matches!(session.send_raw("{}"), Err(Error::ConnectionClosed)));
    assert!(matches!(
        session.expect_event("log"),
        Err(Error::ConnectionClosed)
    ));
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn test_channel_a_then_b_drain_in_order() {
    let (session, mut remote) = start();

    let (_, frame_a) = subscribe(
        &session,
        &mut remote,
        SubscriptionRequest::new(["log.entryAdded"]).channel("A"),
        "sub-A",
    )
    .await;
    let (_, frame_b) = subscribe(
        &session,
        &mut remote,
        SubscriptionRequest::new(["log.entryAdded"]).channel("B"),
        "sub-B",
    )
    .await;
    assert_eq!(frame_a["method"], "session.subscribe");
    assert_eq!(frame_a["goog:channel"], "A");
    assert_eq!(frame_b["goog:channel"], "B");

    remote.emit("log.entryAdded", json!({ "text": "hi" }), Some("A"));
    remote.emit("log.entryAdded", json!({ "text": "hi" }), Some("B"));

    let events = assert_ok!(session.drain_n_messages(2, LONG).await);
    let channels: Vec<_> = events.iter().map(Event::channel).collect();
    assert_eq!(channels, vec![Channel::named("A"), Channel::named("B")]);
}

#[tokio::test]
async fn test_identical_subscribe_does_not_duplicate() {
    let (session, mut remote) = start();
    let request = SubscriptionRequest::new(["log.entryAdded"]);

    let (first, _) = subscribe(&session, &mut remote, request.clone(), "sub-1").await;
    let (second, _) = subscribe(&session, &mut remote, request, "sub-2").await;
    assert_ne!(first, second);

    let subscriptions = session.subscriptions();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].ids, vec![first, second]);

    remote.emit("log.entryAdded", json!({}), None);
    assert_ok!(session.drain_n_messages(1, LONG).await);
    assert_ok!(
        session
            .assert_no_events_in_queue(Vec::<String>::new(), SHORT)
            .await
    );
}

#[tokio::test]
async fn test_subscribe_rolls_back_on_error() {
    let (session, mut remote) = start();

    let (result, _) = tokio::join!(
        session.subscribe(SubscriptionRequest::new(["log"])),
        async {
            let request = remote.next_request().await.expect("request");
            let id = request["id"].as_u64().expect("id");
            remote.respond_error(id, INVALID_ARGUMENT, "no such module");
        },
    );

    let err = assert_err!(result);
    assert!(err.is_command_error());
    assert!(session.subscriptions().is_empty());
}

#[tokio::test]
async fn test_subscribe_timeout_keeps_subscription() {
    let (transport, mut remote) = ChannelTransport::pair();
    let session = Session::start(
        transport,
        options().with_command_timeout(Duration::from_millis(50)),
    );

    let (result, request) = tokio::join!(
        session.subscribe(SubscriptionRequest::new(["log.entryAdded"])),
        remote.next_request(),
    );
    assert!(assert_err!(result).is_timeout());
    assert_eq!(session.subscriptions().len(), 1);

    // The server accepts late; its events are still buffered
    let request = request.expect("subscribe frame");
    remote.respond(request["id"].as_u64().expect("id"), json!({ "subscription": "sub-late" }));
    remote.emit("log.entryAdded", json!({}), None);
    assert_ok!(session.drain_n_messages(1, LONG).await);
    assert!(
        eventually(|| {
            session.subscriptions()[0].ids == vec![SubscriptionId::new("sub-late")]
        })
        .await
    );

    // A late rejection removes the entry
    let (result, request) = tokio::join!(
        session.subscribe(SubscriptionRequest::new(["network"])),
        remote.next_request(),
    );
    assert!(assert_err!(result).is_timeout());
    assert_eq!(session.subscriptions().len(), 2);

    let request = request.expect("subscribe frame");
    remote.respond_error(request["id"].as_u64().expect("id"), INVALID_ARGUMENT, "no such module");
    assert!(eventually(|| session.subscriptions().len() == 1).await);
}

#[tokio::test]
async fn test_unsubscribe_event_of_subscribed_module() {
    let (session, mut remote) = start();
    subscribe(
        &session,
        &mut remote,
        SubscriptionRequest::new(["browsingContext"]),
        "sub-1",
    )
    .await;

    let (result, request) = tokio::join!(
        session.unsubscribe(Unsubscribe::events(["browsingContext.load"])),
        answer(&mut remote, json!({})),
    );
    assert_ok!(result);
    assert_eq!(request["method"], "session.unsubscribe");
    assert_eq!(request["params"]["events"], json!(["browsingContext.load"]));

    remote.emit("browsingContext.load", json!({ "context": "ctx-1" }), None);
    remote.emit("browsingContext.contextCreated", json!({ "context": "ctx-1" }), None);

    let events = assert_ok!(session.drain_n_messages(1, LONG).await);
    assert_eq!(events[0].method, "browsingContext.contextCreated");
    assert!(session.buffered_events().is_empty());
}

#[tokio::test]
async fn test_context_scoped_log_entries() {
    let (session, remote) = start();
    assert_ok!(session.register_subscription(
        &SubscriptionRequest::new(["log.entryAdded"]).contexts(["ctx-1"])
    ));

    remote.emit(
        "log.entryAdded",
        json!({ "text": "other", "source": { "realm": "r-2", "context": "ctx-2" } }),
        None,
    );
    remote.emit(
        "log.entryAdded",
        json!({ "text": "own", "source": { "realm": "r-1", "context": "ctx-1" } }),
        None,
    );

    let events = assert_ok!(session.drain_n_messages(1, LONG).await);
    assert_eq!(events[0].get_string("text"), "own");
    assert_eq!(events[0].context.as_deref(), Some("ctx-1"));
    assert!(session.buffered_events().is_empty());
}

#[tokio::test]
async fn test_custom_channel_field() {
    let (transport, remote) = ChannelTransport::pair();
    let mut remote = remote.with_channel_field("x:channel");
    let session = Session::start(transport, options().with_channel_field("x:channel"));

    let (_, frame) = subscribe(
        &session,
        &mut remote,
        SubscriptionRequest::new(["log"]).channel("A"),
        "sub-1",
    )
    .await;
    assert_eq!(frame["x:channel"], "A");
    assert!(frame.get("goog:channel").is_none());

    remote.emit("log.entryAdded", json!({ "n": 1 }), Some("B"));
    remote.emit("log.entryAdded", json!({ "n": 2 }), Some("A"));

    let events = assert_ok!(session.drain_n_messages(1, LONG).await);
    assert_eq!(events[0].get_u64("n"), 2);
    assert_eq!(events[0].channel(), Channel::named("A"));
    assert!(session.buffered_events().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_batch_is_atomic() {
    let (session, mut remote) = start();
    subscribe(
        &session,
        &mut remote,
        SubscriptionRequest::new(["log.entryAdded", "network.responseCompleted"]),
        "sub-1",
    )
    .await;

    let err = assert_err!(
        session
            .unsubscribe(Unsubscribe::events([
                "log.entryAdded",
                "browsingContext.load",
            ]))
            .await
    );
    assert!(matches!(err, Error::InvalidArgument { .. }));
    assert_eq!(session.subscriptions().len(), 1);

    // Nothing was sent for the rejected batch
    assert_ok!(session.send_raw("marker"));
    assert_eq!(
        remote.recv().await,
        Some(OutboundMessage::Text("marker".to_string()))
    );

    remote.emit("log.entryAdded", json!({}), None);
    assert_ok!(session.drain_n_messages(1, LONG).await);
}

#[tokio::test]
async fn test_unsubscribe_by_id() {
    let (session, mut remote) = start();
    let (id, _) = subscribe(
        &session,
        &mut remote,
        SubscriptionRequest::new(["log"]),
        "sub-1",
    )
    .await;
    assert_eq!(id, SubscriptionId::new("sub-1"));

    let (result, request) = tokio::join!(
        session.unsubscribe(Unsubscribe::ids([id])),
        answer(&mut remote, json!({})),
    );
    assert_ok!(result);
    assert_eq!(request["method"], "session.unsubscribe");
    assert_eq!(request["params"]["subscriptions"], json!(["sub-1"]));
    assert!(session.subscriptions().is_empty());

    remote.emit("log.entryAdded", json!({}), None);
    assert_ok!(
        session
            .assert_no_events_in_queue(["log"], SHORT)
            .await
    );
}

#[tokio::test]
async fn test_unsubscribed_events_are_not_buffered() {
    let (session, remote) = start();
    assert_ok!(session.register_subscription(&SubscriptionRequest::new(["network"])));

    remote.emit("log.entryAdded", json!({}), None);
    remote.emit("network.beforeRequestSent", json!({}), None);

    let events = assert_ok!(session.drain_n_messages(1, LONG).await);
    assert_eq!(events[0].method, "network.beforeRequestSent");
    assert!(session.buffered_events().is_empty());
}

// ============================================================================
// Event Waits
// ============================================================================

#[tokio::test]
async fn test_assert_no_events_keeps_unrelated_frames() {
    let (session, remote) = start();
    assert_ok!(session.register_subscription(&SubscriptionRequest::new(["log", "network"])));

    remote.emit("log.entryAdded", json!({ "text": "keep" }), None);
    assert_ok!(
        session
            .assert_no_events_in_queue(["network.responseCompleted"], SHORT)
            .await
    );

    let kept = assert_ok!(session.drain_n_messages(1, LONG).await);
    assert_eq!(kept[0].get_string("text"), "keep");

    remote.emit("network.responseCompleted", json!({}), None);
    let err = assert_err!(
        session
            .assert_no_events_in_queue(["network.responseCompleted"], LONG)
            .await
    );
    assert!(matches!(err, Error::UnexpectedEvent { ref method } if method == "network.responseCompleted"));
    assert_eq!(session.buffered_events().len(), 1);
}

#[tokio::test]
async fn test_drain_matching_leaves_others_queued() {
    let (session, remote) = start();
    assert_ok!(session.register_subscription(&SubscriptionRequest::new(["log", "network"])));

    remote.emit("log.entryAdded", json!({}), None);
    remote.emit("network.responseCompleted", json!({}), None);
    remote.emit("log.entryAdded", json!({}), None);

    let network = assert_ok!(session.drain_matching(1, "network", LONG).await);
    assert_eq!(network[0].method, "network.responseCompleted");

    let rest = assert_ok!(session.drain_n_messages(2, LONG).await);
    assert!(rest.iter().all(|e| e.method == "log.entryAdded"));
    assert!(session.clear_events().is_empty());
}

#[tokio::test]
async fn test_drain_timeout_takes_nothing() {
    let (session, remote) = start();
    assert_ok!(session.register_subscription(&SubscriptionRequest::new(["log"])));

    remote.emit("log.entryAdded", json!({}), None);
    let err = assert_err!(session.drain_n_messages(2, SHORT).await);
    assert!(err.is_timeout());
    assert_eq!(session.buffered_events().len(), 1);
}

#[tokio::test]
async fn test_drain_with_unbounded_deadline() {
    let (session, remote) = start();
    assert_ok!(session.register_subscription(&SubscriptionRequest::new(["log"])));

    remote.emit("log.entryAdded", json!({ "n": 1 }), None);
    let events = assert_ok!(session.drain_n_messages(1, Some(Duration::MAX)).await);
    assert_eq!(events[0].get_u64("n"), 1);

    remote.emit("log.entryAdded", json!({ "n": 2 }), None);
    let err = assert_err!(
        session
            .assert_no_events_in_queue(["log"], Some(Duration::MAX))
            .await
    );
    assert!(matches!(err, Error::UnexpectedEvent { .. }));
}

#[tokio::test]
async fn test_drain_sorted_by_key() {
    let (session, remote) = start();
    assert_ok!(session.register_subscription(&SubscriptionRequest::new(["network"])));

    for request in [3, 1, 2] {
        remote.emit(
            "network.beforeRequestSent",
            json!({ "request": request }),
            None,
        );
    }

    let events = assert_ok!(
        session
            .drain_sorted(3, "network", |e| e.get_u64("request"), LONG)
            .await
    );
    let order: Vec<_> = events.iter().map(|e| e.get_u64("request")).collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_wait_for_event_matches_context() {
    let (session, remote) = start();

    let waiter = assert_ok!(
        session.expect_event(EventFilter::new("browsingContext.load").context("ctx-2"))
    );
    remote.emit("browsingContext.load", json!({ "context": "ctx-1" }), None);
    remote.emit("browsingContext.load", json!({ "context": "ctx-2" }), None);

    let event = assert_ok!(waiter.wait(Duration::from_secs(2)).await);
    assert_eq!(event.context.as_deref(), Some("ctx-2"));
    assert_eq!(session.router.registry.lock().waiter_count(), 0);
}

#[tokio::test]
async fn test_wait_for_event_timeout_deregisters() {
    let (session, remote) = start();

    let err = assert_err!(session.wait_for_event("log.entryAdded", SHORT).await);
    assert!(err.is_timeout());
    assert_eq!(session.router.registry.lock().waiter_count(), 0);

    // Only waiters registered before the event see it
    let waiter = assert_ok!(session.expect_event("log"));
    remote.emit("log.entryAdded", json!({}), None);
    assert_ok!(waiter.wait(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_listen_stream() {
    let (session, remote) = start();

    let stream = assert_ok!(session.listen(EventFilter::new("log").channel("A")));
    remote.emit("log.entryAdded", json!({ "n": 1 }), Some("A"));
    remote.emit("log.entryAdded", json!({ "n": 2 }), Some("B"));
    remote.emit("log.entryAdded", json!({ "n": 3 }), Some("A"));

    let events = assert_ok!(stream.take(2, Duration::from_secs(2)).await);
    let numbers: Vec<_> = events.iter().map(|e| e.get_u64("n")).collect();
    assert_eq!(numbers, vec![1, 3]);
    assert!(stream.try_next().is_none());

    drop(stream);
    assert_eq!(session.router.registry.lock().waiter_count(), 0);
}

// ============================================================================
// Protocol Errors
// ============================================================================

#[tokio::test]
async fn test_malformed_frames_reach_error_sink() {
    let (session, remote) = start();

    remote.send_binary(vec![0x01, 0x02, 0x03]);
    remote.send_text("not json");
    remote.send_json(&json!({ "error": UNKNOWN_ERROR, "message": "boom" }));

    let binary = assert_ok!(session.next_protocol_error(LONG).await);
    assert_eq!(binary.code, INVALID_ARGUMENT);

    let unparsable = assert_ok!(session.next_protocol_error(LONG).await);
    assert_eq!(unparsable.code, INVALID_ARGUMENT);

    let reported = assert_ok!(session.next_protocol_error(LONG).await);
    assert_eq!(reported.code, UNKNOWN_ERROR);
    assert_eq!(reported.message, "boom");

    assert!(session.take_protocol_errors().is_empty());
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn test_send_raw_and_binary() {
    let (session, mut remote) = start();

    assert_ok!(session.send_raw("{\"id\":"));
    assert_ok!(session.send_binary(vec![0xff]));

    assert_eq!(
        remote.recv().await,
        Some(OutboundMessage::Text("{\"id\":".to_string()))
    );
    assert_eq!(
        remote.recv().await,
        Some(OutboundMessage::Binary(vec![0xff]))
    );
}
