use std::collections::HashMap;

use serde_json::Value;

use crate::domain::ids::ClientId;
use crate::domain::presence::{Patch, Presence};

/// Per-document presence state plus this client's own pending value (§4.4).
/// `own` is set by `SyncClient::set_presence` after its debounce timer fires;
/// `own_patch` is what gets attached to the next `sync-operations` request
/// and broadcast intra-device.
#[derive(Debug, Default)]
pub struct PresenceStore {
    state: Presence,
    own: Option<(ClientId, Value)>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self {
            state: Presence::new(),
            own: None,
        }
    }

    /// Merges an inbound patch (from the server or from BroadcastHub).
    /// Returns whether state actually changed, so callers can skip notifying
    /// subscribers on a no-op patch.
    pub fn apply_patch(&mut self, patch: &Patch) -> bool {
        self.state.apply_patch(patch)
    }

    pub fn get(&self, client: &ClientId) -> Option<&Value> {
        self.state.get(client)
    }

    pub fn snapshot(&self) -> HashMap<ClientId, Value> {
        self.state.snapshot()
    }

    pub fn set_own(&mut self, client: ClientId, value: Value) {
        self.own = Some((client, value));
    }

    pub fn clear_own(&mut self) {
        self.own = None;
    }

    /// The local client's own presence as a one-entry patch, if it has any —
    /// attached to pushes and broadcasts per §4.7/§4.8.
    pub fn own_patch(&self) -> Option<Patch> {
        self.own
            .as_ref()
            .map(|(client, value)| Patch::set(client.clone(), value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn own_patch_absent_until_set() {
        let store = PresenceStore::new();
        assert!(store.own_patch().is_none());
    }

    #[test]
    fn own_patch_reflects_last_set_value() {
        let mut store = PresenceStore::new();
        let client = ClientId::from("u1:d1".to_string());
        store.set_own(client.clone(), json!({"cursor": 3}));
        let patch = store.own_patch().unwrap();
        assert_eq!(patch.0.get(&client), Some(&json!({"cursor": 3})));
    }

    #[test]
    fn clear_own_removes_patch() {
        let mut store = PresenceStore::new();
        let client = ClientId::from("u1:d1".to_string());
        store.set_own(client, json!(1));
        store.clear_own();
        assert!(store.own_patch().is_none());
    }
}
