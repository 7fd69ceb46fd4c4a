use std::collections::HashMap;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::ids::{ClientId, DeviceId, DocId};
use crate::domain::presence::Patch;

use super::wire::WireMessage;

/// Identifies one live socket within a room, independent of the identity it
/// authenticated as (a user may have many sockets across tabs and devices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Clone)]
pub struct RoomMember {
    pub client_id: ClientId,
    pub device_id: DeviceId,
    pub outbound: mpsc::UnboundedSender<WireMessage>,
}

/// Server-side fan-out groups keyed by `doc:<docId>` (§4.9), plus the
/// per-document presence map sockets merge into and read from. Sockets join
/// on first `sync-operations`/`presence` for a doc and leave on
/// `unsubscribe-doc` or disconnect.
#[derive(Default)]
pub struct Rooms {
    members: DashMap<DocId, HashMap<ConnectionId, RoomMember>>,
    presence: DashMap<DocId, HashMap<ClientId, Value>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, doc_id: &DocId, conn_id: ConnectionId, member: RoomMember) {
        self.members
            .entry(doc_id.clone())
            .or_default()
            .insert(conn_id, member);
    }

    /// Removes a socket from a room, returning its membership record if it
    /// was present (used to build the presence leave patch on unsubscribe).
    pub fn leave(&self, doc_id: &DocId, conn_id: ConnectionId) -> Option<RoomMember> {
        let mut removed = None;
        if let Some(mut members) = self.members.get_mut(doc_id) {
            removed = members.remove(&conn_id);
            if members.is_empty() {
                drop(members);
                self.members.remove(doc_id);
            }
        }
        removed
    }

    /// Every `(docId, connId)` a socket is currently subscribed to, used to
    /// sweep all its rooms on disconnect (§4.9).
    pub fn rooms_containing(&self, conn_id: ConnectionId) -> Vec<DocId> {
        self.members
            .iter()
            .filter(|entry| entry.value().contains_key(&conn_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Sends `dirty {docId}` to every socket in the room except `exclude`
    /// itself and every other socket belonging to `exclude_device` (§4.9
    /// step 3 — the intra-device BroadcastHub already covers those tabs).
    pub fn broadcast_dirty(&self, doc_id: &DocId, exclude: ConnectionId, exclude_device: &DeviceId) {
        let Some(members) = self.members.get(doc_id) else {
            return;
        };
        let payload = serde_json::json!({ "docId": doc_id.as_str() });
        for (conn_id, member) in members.iter() {
            if *conn_id == exclude || &member.device_id == exclude_device {
                continue;
            }
            let _ = member.outbound.send(WireMessage::push("dirty", payload.clone()));
        }
    }

    /// Sends `presence {docId, presence}` to every other socket in the room.
    pub fn broadcast_presence(&self, doc_id: &DocId, exclude: ConnectionId, patch: &Patch) {
        let Some(members) = self.members.get(doc_id) else {
            return;
        };
        let payload = serde_json::json!({ "docId": doc_id.as_str(), "presence": patch });
        for (conn_id, member) in members.iter() {
            if *conn_id == exclude {
                continue;
            }
            let _ = member
                .outbound
                .send(WireMessage::push("presence", payload.clone()));
        }
    }

    pub fn merge_presence(&self, doc_id: &DocId, patch: &Patch) {
        let mut entry = self.presence.entry(doc_id.clone()).or_default();
        for (client, value) in &patch.0 {
            if value.is_null() {
                entry.remove(client);
            } else {
                entry.insert(client.clone(), value.clone());
            }
        }
    }

    pub fn presence_snapshot(&self, doc_id: &DocId) -> HashMap<ClientId, Value> {
        self.presence.get(doc_id).map(|m| m.clone()).unwrap_or_default()
    }
}
