use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::domain::errors::SyncResult;
use crate::domain::ids::DocId;
use crate::domain::presence::Patch;

/// Default request timeout applied when a caller doesn't specify one (§4.3).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Server-pushed and lifecycle events a `RequestChannel` delivers out of band
/// from request/response pairs. `Dirty` and `Presence` come from the server;
/// the rest describe the transport's own connection lifecycle.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    ConnectError { message: String },
    Dirty { doc_id: DocId },
    Presence { doc_id: DocId, presence: Patch },
}

/// A duplex request/response-plus-push connection to the server (§4.3). One
/// `RequestChannel` instance is the transport for every document a client has
/// open; `PushEngine` and `PresenceStore` share it, distinguishing traffic by
/// `doc_id` embedded in the request payload.
#[async_trait]
pub trait RequestChannel: Send + Sync + 'static {
    /// Sends `event` with `payload` and awaits the matching response,
    /// resolving to `SyncError::timeout` if none arrives within `timeout`.
    async fn request(&self, event: &str, payload: Value, timeout: Duration) -> SyncResult<Value>;

    async fn request_default(&self, event: &str, payload: Value) -> SyncResult<Value> {
        self.request(event, payload, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Subscribes to this channel's lifecycle and server-push events. Each
    /// call returns an independent receiver; events broadcast to all of them.
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;
}
