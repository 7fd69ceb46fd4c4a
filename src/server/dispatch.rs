use std::sync::Arc;

use serde_json::Value;

use crate::application::ports::auth_port::{Actor, Authenticator, Authorizer, Capability};
use crate::application::ports::server_provider::{ServerProvider, ServerSyncRequest};
use crate::domain::ids::{Clock, DocId};
use crate::domain::presence::Patch;

use super::rooms::{ConnectionId, RoomMember, Rooms};
use super::wire::WireResult;

/// Distinguishes a handshake rejection (connection never opens) from an
/// authenticated connection (§4.9).
pub enum HandshakeOutcome {
    Accepted(Actor),
    Rejected(&'static str),
}

/// The server half of DocSync (§4.9): authenticates connections, tracks
/// per-document rooms, authorizes every event, and fans dirty/presence
/// signals out to the right sockets. Holds no socket state itself — that
/// lives in `Rooms`, keyed by `ConnectionId`.
pub struct Dispatcher<P, Auth, Authz>
where
    P: ServerProvider,
    Auth: Authenticator,
    Authz: Authorizer,
{
    provider: Arc<P>,
    authenticator: Arc<Auth>,
    authorizer: Arc<Authz>,
    rooms: Arc<Rooms>,
}

impl<P, Auth, Authz> Dispatcher<P, Auth, Authz>
where
    P: ServerProvider,
    Auth: Authenticator,
    Authz: Authorizer,
{
    pub fn new(provider: Arc<P>, authenticator: Arc<Auth>, authorizer: Arc<Authz>) -> Self {
        Self {
            provider,
            authenticator,
            authorizer,
            rooms: Arc::new(Rooms::new()),
        }
    }

    pub fn rooms(&self) -> &Arc<Rooms> {
        &self.rooms
    }

    /// Validates a handshake `{token, deviceId}` (§4.9). Connection-level
    /// rejections are returned as the exact strings the spec names, rather
    /// than the `SyncError` taxonomy used for event-level responses.
    pub async fn handshake(&self, token: Option<&str>, device_id: Option<&str>) -> HandshakeOutcome {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return HandshakeOutcome::Rejected("Authentication required: no token provided");
        };
        if device_id.filter(|d| !d.is_empty()).is_none() {
            return HandshakeOutcome::Rejected("Device ID required");
        }
        match self.authenticator.authenticate(token).await {
            Ok(Some(actor)) => HandshakeOutcome::Accepted(actor),
            Ok(None) => HandshakeOutcome::Rejected("Authentication failed: invalid token"),
            Err(_) => HandshakeOutcome::Rejected("Authentication error: token verification failed"),
        }
    }

    pub async fn handle_sync(
        &self,
        conn_id: ConnectionId,
        member: &RoomMember,
        actor: &Actor,
        payload: Value,
    ) -> WireResult {
        let Some(doc_id) = payload.get("docId").and_then(Value::as_str).map(DocId::from) else {
            return WireResult::err("ValidationError", "docId is required");
        };

        let clock = payload
            .get("clock")
            .and_then(Value::as_u64)
            .map(Clock)
            .unwrap_or(Clock::NONE);

        let cap = match self.authorizer.authorize(&doc_id, actor).await {
            Ok(cap) => cap,
            Err(err) => return WireResult::err(err.wire_type(), err.to_string()),
        };
        if cap == Capability::None {
            // Denial is reported as a null-data sync response, not an error
            // object — only presence/unsubscribe/delete denials use the
            // error shape (§4.9).
            return WireResult::ok(serde_json::json!({
                "docId": doc_id.as_str(),
                "operations": Value::Null,
                "serializedDoc": Value::Null,
                "clock": clock.0,
            }));
        }

        self.rooms.join(&doc_id, conn_id, member.clone());

        let operations: Vec<P::Op> = payload
            .get("operations")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let has_operations = !operations.is_empty();

        if let Some(presence) = payload.get("presence").filter(|v| !v.is_null()) {
            if let Ok(patch) = serde_json::from_value::<Patch>(presence.clone()) {
                self.rooms.merge_presence(&doc_id, &patch);
                self.rooms.broadcast_presence(&doc_id, conn_id, &patch);
            }
        }

        let response = match self
            .provider
            .sync(ServerSyncRequest {
                doc_id: doc_id.clone(),
                clock,
                operations,
            })
            .await
        {
            Ok(response) => response,
            Err(err) => return WireResult::err(err.wire_type(), err.to_string()),
        };

        if has_operations {
            self.rooms
                .broadcast_dirty(&doc_id, conn_id, &member.device_id);
        }

        WireResult::ok(serde_json::json!({
            "docId": response.doc_id.as_str(),
            "operations": response.operations,
            "serializedDoc": response.serialized_doc,
            "clock": response.clock.0,
        }))
    }

    pub async fn handle_presence(
        &self,
        conn_id: ConnectionId,
        actor: &Actor,
        payload: Value,
    ) -> WireResult {
        let Some(doc_id) = payload.get("docId").and_then(Value::as_str).map(DocId::from) else {
            return WireResult::err("ValidationError", "docId is required");
        };
        match self.authorizer.authorize(&doc_id, actor).await {
            Ok(Capability::None) | Err(_) => {
                return WireResult::err("AuthorizationError", "not permitted to update presence")
            }
            Ok(_) => {}
        }
        let Some(patch) = payload
            .get("presence")
            .and_then(|v| serde_json::from_value::<Patch>(v.clone()).ok())
        else {
            return WireResult::err("ValidationError", "presence payload is malformed");
        };
        self.rooms.merge_presence(&doc_id, &patch);
        self.rooms.broadcast_presence(&doc_id, conn_id, &patch);
        WireResult::ok(Value::Null)
    }

    pub async fn handle_unsubscribe(&self, conn_id: ConnectionId, payload: Value) -> WireResult {
        let Some(doc_id) = payload.get("docId").and_then(Value::as_str).map(DocId::from) else {
            return WireResult::ok(serde_json::json!({ "success": false }));
        };
        if let Some(member) = self.rooms.leave(&doc_id, conn_id) {
            let leave_patch = Patch::leave(member.client_id);
            self.rooms.merge_presence(&doc_id, &leave_patch);
            self.rooms.broadcast_presence(&doc_id, conn_id, &leave_patch);
        }
        WireResult::ok(serde_json::json!({ "success": true }))
    }

    pub async fn handle_delete(&self, actor: &Actor, payload: Value) -> WireResult {
        let Some(doc_id) = payload.get("docId").and_then(Value::as_str).map(DocId::from) else {
            return WireResult::ok(serde_json::json!({ "success": false }));
        };
        match self.authorizer.authorize(&doc_id, actor).await {
            Ok(Capability::Edit) => WireResult::ok(serde_json::json!({ "success": true })),
            _ => WireResult::err("AuthorizationError", "not permitted to delete this document"),
        }
    }

    /// Sweeps every room a socket belonged to, emitting a `{clientId: null}`
    /// presence patch to each (§4.9, "On disconnect").
    pub async fn handle_disconnect(&self, conn_id: ConnectionId, client_id_hint: &str) {
        for doc_id in self.rooms.rooms_containing(conn_id) {
            if let Some(member) = self.rooms.leave(&doc_id, conn_id) {
                let patch = Patch::leave(member.client_id);
                self.rooms.merge_presence(&doc_id, &patch);
                self.rooms.broadcast_presence(&doc_id, conn_id, &patch);
            }
        }
        tracing::debug!(client_id = client_id_hint, "connection disconnected, rooms swept");
    }
}
