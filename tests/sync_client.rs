use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docsync::application::ports::request_channel::ChannelEvent;
use docsync::application::services::{ChangeOrigin, GetDocRequest, SyncClient, SyncEvent, SyncOutcome};
use docsync::domain::errors::SyncError;
use docsync::domain::ids::{DeviceId, DocId};
use docsync::testing::fakes::{FakeRequestChannel, InMemoryClientProvider};
use docsync::testing::text_log_binding::TextLogBinding;
use serde_json::json;

type TestClient = SyncClient<TextLogBinding, InMemoryClientProvider<String, String>, FakeRequestChannel>;

fn new_client(channel: Arc<FakeRequestChannel>, device: &str) -> Arc<TestClient> {
    SyncClient::new(
        Arc::new(TextLogBinding::new()),
        Arc::new(InMemoryClientProvider::new()),
        channel,
        "user-1",
        DeviceId::from(device),
    )
}

/// Scenario: offline append, online consolidate. A local commit made while
/// the channel reports network errors keeps retrying with backoff; once the
/// responder starts succeeding, the very next retry consolidates and the
/// event bus reports `Consolidated`.
#[tokio::test(start_paused = true)]
async fn offline_append_then_online_consolidate() {
    let online = Arc::new(AtomicBool::new(false));
    let online_for_responder = online.clone();
    let channel = FakeRequestChannel::new(move |event, _payload| {
        if event != "sync-operations" {
            return Ok(serde_json::Value::Null);
        }
        if online_for_responder.load(Ordering::SeqCst) {
            Ok(json!({ "data": { "operations": null, "serializedDoc": null, "clock": 1 } }))
        } else {
            Err(SyncError::Network("offline".to_string()))
        }
    });

    let client = new_client(channel, "device-1");
    let mut events = client.events();

    let doc = client
        .get_doc(GetDocRequest::create_new(TextLogBinding::DOC_TYPE))
        .await
        .unwrap()
        .unwrap();
    doc.append("hello");

    // First attempt fails while offline.
    let first = events.recv().await.unwrap();
    assert!(matches!(
        first,
        SyncEvent::Sync {
            outcome: SyncOutcome::Failed { .. },
            ..
        }
    ));

    online.store(true, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(1)).await;

    let second = loop {
        match events.recv().await.unwrap() {
            event @ SyncEvent::Sync { .. } => break event,
            _ => continue,
        }
    };
    assert!(matches!(
        second,
        SyncEvent::Sync {
            outcome: SyncOutcome::Consolidated { .. },
            ..
        }
    ));
}

/// Scenario: intra-device fan-out. Two `SyncClient`s for the same
/// `(userId, deviceId)` share a `BroadcastHub` channel; operations a push
/// cycle pulls down as genuinely new (`server_ops`) on one client are
/// forwarded to every sibling tab without a second network round trip.
#[tokio::test]
async fn intra_device_push_forwards_new_server_ops_to_sibling_client() {
    let channel = FakeRequestChannel::new(|event, _payload| {
        if event == "sync-operations" {
            Ok(json!({ "data": { "operations": ["remote-op"], "serializedDoc": null, "clock": 2 } }))
        } else {
            Ok(serde_json::Value::Null)
        }
    });
    let client_a = new_client(channel.clone(), "device-1");
    let client_b = new_client(channel, "device-1");
    let mut events_b = client_b.events();

    let doc_a = client_a
        .get_doc(GetDocRequest::create_new(TextLogBinding::DOC_TYPE))
        .await
        .unwrap()
        .unwrap();
    doc_a.append("local-edit");

    let event = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match events_b.recv().await.unwrap() {
                event @ SyncEvent::Change {
                    origin: ChangeOrigin::Broadcast,
                    ..
                } => return event,
                _ => continue,
            }
        }
    })
    .await
    .expect("sibling client should observe the broadcasted server operations");

    let SyncEvent::Change { operations, .. } = event else {
        unreachable!()
    };
    assert_eq!(operations.as_slice(), ["remote-op".to_string()]);
}

/// Scenario: presence debounce. Rapid `set_presence` calls within the
/// debounce window collapse to a single flush sent over the channel.
#[tokio::test(start_paused = true)]
async fn rapid_presence_updates_collapse_to_one_flush() {
    let flush_count = Arc::new(AtomicUsize::new(0));
    let counter = flush_count.clone();
    let channel = FakeRequestChannel::new(move |event, _payload| {
        if event == "presence" {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(serde_json::Value::Null)
    });
    let client = new_client(channel.clone(), "device-1");
    channel.emit(ChannelEvent::Connected);
    tokio::task::yield_now().await;
    assert!(client.is_connected());

    let doc_id = DocId::from("doc-presence");
    client.set_presence(doc_id.clone(), json!({ "cursor": 1 }));
    tokio::time::advance(Duration::from_millis(10)).await;
    client.set_presence(doc_id.clone(), json!({ "cursor": 2 }));
    tokio::time::advance(Duration::from_millis(10)).await;
    client.set_presence(doc_id, json!({ "cursor": 3 }));

    tokio::time::advance(Duration::from_millis(100)).await;
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }

    assert_eq!(flush_count.load(Ordering::SeqCst), 1, "debounced updates should flush exactly once");
}

/// Scenario: presence leave on disconnect. Disconnecting resets the
/// connection flag, abandons in-flight push retries, and fans a leave patch
/// out over the intra-device hub for every cached document.
#[tokio::test]
async fn disconnect_clears_connection_state() {
    let channel = FakeRequestChannel::silent();
    let client = new_client(channel.clone(), "device-1");
    let mut events = client.events();

    let doc = client
        .get_doc(GetDocRequest::create_new(TextLogBinding::DOC_TYPE))
        .await
        .unwrap()
        .unwrap();
    let _ = doc;

    channel.emit(ChannelEvent::Connected);
    assert!(matches!(events.recv().await.unwrap(), SyncEvent::Connect));
    assert!(client.is_connected());

    channel.emit(ChannelEvent::Disconnected {
        reason: "socket closed".to_string(),
    });
    let event = events.recv().await.unwrap();
    assert!(matches!(event, SyncEvent::Disconnect { .. }));
    assert!(!client.is_connected());
}
