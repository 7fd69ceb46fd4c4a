use docsync::application::ports::auth_port::Capability;
use docsync::domain::ids::{ClientId, DeviceId, DocId};
use docsync::server::dispatch::{Dispatcher, HandshakeOutcome};
use docsync::server::rooms::{ConnectionId, RoomMember};
use docsync::server::wire::WireResult;
use docsync::testing::fakes::{FixedAuthorizer, InMemoryServerProvider, PrefixAuthenticator};
use serde_json::{json, Value};
use tokio::sync::mpsc;

type TestDispatcher = Dispatcher<InMemoryServerProvider<Value, Value>, PrefixAuthenticator, FixedAuthorizer>;

fn dispatcher(cap: Capability) -> TestDispatcher {
    Dispatcher::new(
        std::sync::Arc::new(InMemoryServerProvider::new()),
        std::sync::Arc::new(PrefixAuthenticator::default()),
        std::sync::Arc::new(FixedAuthorizer(cap)),
    )
}

fn member(device: &str) -> (RoomMember, mpsc::UnboundedReceiver<docsync::server::wire::WireMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        RoomMember {
            client_id: ClientId::from(format!("user-1:{device}")),
            device_id: DeviceId::from(device),
            outbound: tx,
        },
        rx,
    )
}

#[tokio::test]
async fn handshake_rejects_missing_token() {
    let dispatcher = dispatcher(Capability::Edit);
    let outcome = dispatcher.handshake(None, Some("device-1")).await;
    assert!(matches!(outcome, HandshakeOutcome::Rejected(_)));
}

#[tokio::test]
async fn handshake_rejects_missing_device_id() {
    let dispatcher = dispatcher(Capability::Edit);
    let outcome = dispatcher.handshake(Some("valid-alice"), None).await;
    assert!(matches!(outcome, HandshakeOutcome::Rejected(_)));
}

#[tokio::test]
async fn handshake_rejects_invalid_token() {
    let dispatcher = dispatcher(Capability::Edit);
    let outcome = dispatcher.handshake(Some("not-a-valid-token"), Some("device-1")).await;
    assert!(matches!(outcome, HandshakeOutcome::Rejected(_)));
}

#[tokio::test]
async fn handshake_accepts_prefixed_token() {
    let dispatcher = dispatcher(Capability::Edit);
    let outcome = dispatcher.handshake(Some("valid-alice"), Some("device-1")).await;
    match outcome {
        HandshakeOutcome::Accepted(actor) => assert_eq!(actor.user_id, "alice"),
        HandshakeOutcome::Rejected(reason) => panic!("unexpected rejection: {reason}"),
    }
}

#[tokio::test]
async fn sync_assigns_increasing_clock() {
    let dispatcher = dispatcher(Capability::Edit);
    let doc_id = DocId::generate();
    let actor = match dispatcher.handshake(Some("valid-alice"), Some("device-1")).await {
        HandshakeOutcome::Accepted(actor) => actor,
        HandshakeOutcome::Rejected(reason) => panic!("unexpected rejection: {reason}"),
    };
    let (m, _rx) = member("device-1");
    let conn = ConnectionId::generate();

    let first = dispatcher
        .handle_sync(
            conn,
            &m,
            &actor,
            json!({ "docId": doc_id.as_str(), "clock": 0, "operations": ["a"] }),
        )
        .await;
    let WireResult::Ok { data } = first else {
        panic!("expected ok response");
    };
    assert_eq!(data["clock"], json!(1));

    let second = dispatcher
        .handle_sync(
            conn,
            &m,
            &actor,
            json!({ "docId": doc_id.as_str(), "clock": 1, "operations": ["b"] }),
        )
        .await;
    let WireResult::Ok { data } = second else {
        panic!("expected ok response");
    };
    assert_eq!(data["clock"], json!(2));
}

/// §4.9: a sync-operations denial is a null-data response carrying the
/// client's own requested clock back, not an error object — the caller
/// can't distinguish "denied" from "nothing new" any other way.
#[tokio::test]
async fn sync_rejects_when_authorizer_denies() {
    let dispatcher = dispatcher(Capability::None);
    let doc_id = DocId::generate();
    let actor = match dispatcher.handshake(Some("valid-alice"), Some("device-1")).await {
        HandshakeOutcome::Accepted(actor) => actor,
        HandshakeOutcome::Rejected(reason) => panic!("unexpected rejection: {reason}"),
    };
    let (m, _rx) = member("device-1");
    let conn = ConnectionId::generate();

    let response = dispatcher
        .handle_sync(conn, &m, &actor, json!({ "docId": doc_id.as_str(), "clock": 7 }))
        .await;
    let WireResult::Ok { data } = response else {
        panic!("expected a null-data ok response, not an error");
    };
    assert_eq!(data["docId"], json!(doc_id.as_str()));
    assert_eq!(data["operations"], Value::Null);
    assert_eq!(data["serializedDoc"], Value::Null);
    assert_eq!(data["clock"], json!(7));
}

/// §4.9 step 3: `dirty` fan-out excludes the sending socket AND every other
/// socket on the same device, since those tabs already learned via the
/// intra-device `BroadcastHub`; a socket on a different device still needs it.
#[tokio::test]
async fn sync_broadcast_excludes_sender_connection_and_sender_device() {
    let dispatcher = dispatcher(Capability::Edit);
    let doc_id = DocId::generate();
    let actor = match dispatcher.handshake(Some("valid-alice"), Some("device-1")).await {
        HandshakeOutcome::Accepted(actor) => actor,
        HandshakeOutcome::Rejected(reason) => panic!("unexpected rejection: {reason}"),
    };

    let (sender_member, mut sender_rx) = member("device-1");
    let sender_conn = ConnectionId::generate();
    let (same_device_member, mut same_device_rx) = member("device-1");
    let same_device_conn = ConnectionId::generate();
    let (other_device_member, mut other_device_rx) = member("device-2");
    let other_device_conn = ConnectionId::generate();

    dispatcher.rooms().join(&doc_id, sender_conn, sender_member.clone());
    dispatcher.rooms().join(&doc_id, same_device_conn, same_device_member);
    dispatcher.rooms().join(&doc_id, other_device_conn, other_device_member);

    dispatcher
        .handle_sync(
            sender_conn,
            &sender_member,
            &actor,
            json!({ "docId": doc_id.as_str(), "clock": 0, "operations": ["a"] }),
        )
        .await;

    assert!(sender_rx.try_recv().is_err());
    assert!(same_device_rx.try_recv().is_err());
    assert!(other_device_rx.try_recv().is_ok());
}

#[tokio::test]
async fn presence_broadcast_excludes_only_sender_connection() {
    let dispatcher = dispatcher(Capability::Edit);
    let doc_id = DocId::generate();
    let actor = match dispatcher.handshake(Some("valid-alice"), Some("device-1")).await {
        HandshakeOutcome::Accepted(actor) => actor,
        HandshakeOutcome::Rejected(reason) => panic!("unexpected rejection: {reason}"),
    };

    let (sender_member, mut sender_rx) = member("device-1");
    let sender_conn = ConnectionId::generate();
    let (peer_member, mut peer_rx) = member("device-1");
    let peer_conn = ConnectionId::generate();

    dispatcher.rooms().join(&doc_id, sender_conn, sender_member.clone());
    dispatcher.rooms().join(&doc_id, peer_conn, peer_member);

    dispatcher
        .handle_presence(
            sender_conn,
            &actor,
            json!({ "docId": doc_id.as_str(), "presence": { "alice": { "cursor": 3 } } }),
        )
        .await;

    assert!(sender_rx.try_recv().is_err());
    assert!(peer_rx.try_recv().is_ok());
}

#[tokio::test]
async fn disconnect_sweeps_every_room_and_emits_leave_patch() {
    let dispatcher = dispatcher(Capability::Edit);
    let doc_a = DocId::generate();
    let doc_b = DocId::generate();

    let (leaving_member, _rx) = member("device-1");
    let leaving_conn = ConnectionId::generate();
    let (peer_member, mut peer_rx) = member("device-2");
    let peer_conn = ConnectionId::generate();

    dispatcher.rooms().join(&doc_a, leaving_conn, leaving_member.clone());
    dispatcher.rooms().join(&doc_b, leaving_conn, leaving_member);
    dispatcher.rooms().join(&doc_a, peer_conn, peer_member);

    dispatcher.handle_disconnect(leaving_conn, "user-1:device-1").await;

    assert!(dispatcher.rooms().rooms_containing(leaving_conn).is_empty());
    let pushed = peer_rx.try_recv().expect("peer should see a leave presence push");
    let docsync::server::wire::WireMessage::Push { event, payload } = pushed else {
        panic!("expected a push message");
    };
    assert_eq!(event, "presence");
    assert_eq!(payload["docId"], Value::String(doc_a.as_str().to_string()));
}
