use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::application::ports::request_channel::{ChannelEvent, RequestChannel};
use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::ids::DocId;
use crate::server::wire::WireMessage;

const RECONNECT_BASE: Duration = Duration::from_millis(100);
const RECONNECT_CAP: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 256;

fn reconnect_delay(attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis((RECONNECT_BASE.as_millis() as u64 * factor).min(RECONNECT_CAP.as_millis() as u64))
}

/// The one concrete `RequestChannel` the core ships (§4.3): a
/// `tokio-tungstenite` WebSocket client framing every request/response/push
/// as one JSON `WireMessage` per text frame. Owns a background task that
/// reconnects with capped exponential backoff and re-sends the handshake on
/// every attempt; `request()` and the public API are just a thin façade over
/// channels into that task.
pub struct WsRequestChannel {
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    pending: Arc<DashMap<String, oneshot::Sender<Value>>>,
    events: broadcast::Sender<ChannelEvent>,
    next_req_id: AtomicU64,
}

enum OutboundFrame {
    Request { req_id: String, event: String, payload: Value },
}

impl WsRequestChannel {
    pub fn connect(url: String, token: String, device_id: String) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let pending: Arc<DashMap<String, oneshot::Sender<Value>>> = Arc::new(DashMap::new());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let channel = Arc::new(Self {
            outbound_tx,
            pending: pending.clone(),
            events: events_tx.clone(),
            next_req_id: AtomicU64::new(1),
        });

        tokio::spawn(run_connection_loop(url, token, device_id, outbound_rx, pending, events_tx));
        channel
    }

    fn mint_req_id(&self) -> String {
        format!("r{}", self.next_req_id.fetch_add(1, Ordering::SeqCst))
    }
}

async fn run_connection_loop(
    url: String,
    token: String,
    device_id: String,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    pending: Arc<DashMap<String, oneshot::Sender<Value>>>,
    events_tx: broadcast::Sender<ChannelEvent>,
) {
    let mut attempt = 0u32;
    loop {
        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _response)) => {
                attempt = 0;
                let (mut sink, mut stream) = stream.split();

                let handshake = WireMessage::Handshake {
                    token: token.clone(),
                    device_id: device_id.clone(),
                };
                let Ok(text) = serde_json::to_string(&handshake) else {
                    return;
                };
                if sink.send(WsMessage::Text(text)).await.is_err() {
                    let _ = events_tx.send(ChannelEvent::ConnectError {
                        message: "failed to send handshake".to_string(),
                    });
                    continue;
                }

                let _ = events_tx.send(ChannelEvent::Connected);

                loop {
                    tokio::select! {
                        outbound = outbound_rx.recv() => {
                            match outbound {
                                Some(OutboundFrame::Request { req_id, event, payload }) => {
                                    let message = WireMessage::Request { req_id, event, payload };
                                    let Ok(text) = serde_json::to_string(&message) else { continue };
                                    if sink.send(WsMessage::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                None => return,
                            }
                        }
                        incoming = stream.next() => {
                            match incoming {
                                Some(Ok(WsMessage::Text(text))) => {
                                    dispatch_incoming(&text, &pending, &events_tx);
                                }
                                Some(Ok(WsMessage::Close(_))) | None => break,
                                Some(Err(_)) => break,
                                _ => {}
                            }
                        }
                    }
                }

                let _ = events_tx.send(ChannelEvent::Disconnected {
                    reason: "connection closed".to_string(),
                });
            }
            Err(err) => {
                let _ = events_tx.send(ChannelEvent::ConnectError {
                    message: err.to_string(),
                });
            }
        }

        tokio::time::sleep(reconnect_delay(attempt)).await;
        attempt += 1;
    }
}

fn dispatch_incoming(
    text: &str,
    pending: &DashMap<String, oneshot::Sender<Value>>,
    events_tx: &broadcast::Sender<ChannelEvent>,
) {
    let Ok(message) = serde_json::from_str::<WireMessage>(text) else {
        return;
    };
    match message {
        WireMessage::Response { req_id, result } => {
            if let Some((_, sender)) = pending.remove(&req_id) {
                let value = match result {
                    crate::server::wire::WireResult::Ok { data } => serde_json::json!({ "data": data }),
                    crate::server::wire::WireResult::Err { error } => serde_json::json!({
                        "error": { "type": error.error_type, "message": error.message }
                    }),
                };
                let _ = sender.send(value);
            }
        }
        WireMessage::Push { event, payload } => match event.as_str() {
            "dirty" => {
                if let Some(doc_id) = payload.get("docId").and_then(Value::as_str) {
                    let _ = events_tx.send(ChannelEvent::Dirty {
                        doc_id: DocId::from(doc_id),
                    });
                }
            }
            "presence" => {
                if let (Some(doc_id), Some(presence)) = (
                    payload.get("docId").and_then(Value::as_str),
                    payload.get("presence").cloned(),
                ) {
                    if let Ok(patch) = serde_json::from_value(presence) {
                        let _ = events_tx.send(ChannelEvent::Presence {
                            doc_id: DocId::from(doc_id),
                            presence: patch,
                        });
                    }
                }
            }
            _ => {}
        },
        _ => {}
    }
}

#[async_trait]
impl RequestChannel for WsRequestChannel {
    async fn request(&self, event: &str, payload: Value, timeout: Duration) -> SyncResult<Value> {
        let req_id = self.mint_req_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(req_id.clone(), tx);

        if self
            .outbound_tx
            .send(OutboundFrame::Request {
                req_id: req_id.clone(),
                event: event.to_string(),
                payload,
            })
            .is_err()
        {
            self.pending.remove(&req_id);
            return Err(SyncError::Network("channel is closed".to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                self.pending.remove(&req_id);
                Err(SyncError::Network("channel closed before response arrived".to_string()))
            }
            Err(_) => {
                self.pending.remove(&req_id);
                Err(SyncError::timeout(event))
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}
