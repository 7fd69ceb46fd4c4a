use async_trait::async_trait;

use crate::domain::errors::SyncResult;
use crate::domain::ids::DocId;

/// An authenticated connection, resolved once at handshake time and then
/// threaded through every dispatch call for that socket.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub context: Option<serde_json::Value>,
}

/// What an `Actor` may do against a given document. Mirrors the
/// `Capability` tri-state the server checks per event (§4.9): a `sync` or
/// `presence` request needing `Edit` from an actor holding only `View` is
/// rejected with `SyncError::Authorization`, never silently downgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    None,
    View,
    Edit,
}

/// Resolves the bearer token presented at WebSocket handshake (query param,
/// header, or cookie — whichever the transport extracted) into an `Actor`.
/// Returns `Ok(None)` for a well-formed but invalid/expired token; only
/// malformed input or a backing-store failure should surface as `Err`.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(&self, token: &str) -> SyncResult<Option<Actor>>;
}

/// Resolves what an already-authenticated `Actor` may do against one
/// document, re-checked on every `sync`/`presence` request rather than
/// cached for the socket's lifetime (documents can be unshared mid-session).
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    async fn authorize(&self, doc_id: &DocId, actor: &Actor) -> SyncResult<Capability>;
}
