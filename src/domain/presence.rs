use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::ClientId;

/// A sparse mapping `clientId -> value | null`. `null` means "forget this
/// client"; keys absent from the patch are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(pub HashMap<ClientId, Value>);

impl Patch {
    pub fn leave(client: ClientId) -> Self {
        let mut map = HashMap::new();
        map.insert(client, Value::Null);
        Self(map)
    }

    pub fn set(client: ClientId, value: Value) -> Self {
        let mut map = HashMap::new();
        map.insert(client, value);
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-document presence state: `clientId -> value`. Absence of a key means
/// "unknown", not "left" — only an explicit `null` patch removes a key.
#[derive(Debug, Clone, Default)]
pub struct Presence(HashMap<ClientId, Value>);

impl Presence {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get(&self, client: &ClientId) -> Option<&Value> {
        self.0.get(client)
    }

    pub fn snapshot(&self) -> HashMap<ClientId, Value> {
        self.0.clone()
    }

    /// Merges a patch by key: `null`/absent-after-merge deletes, anything
    /// else overwrites. Returns whether the merge actually changed state, so
    /// callers can skip notifying subscribers on a no-op patch.
    pub fn apply_patch(&mut self, patch: &Patch) -> bool {
        let mut changed = false;
        for (client, value) in &patch.0 {
            if value.is_null() {
                if self.0.remove(client).is_some() {
                    changed = true;
                }
            } else {
                let replaced = self.0.insert(client.clone(), value.clone());
                if replaced.as_ref() != Some(value) {
                    changed = true;
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cid(s: &str) -> ClientId {
        ClientId::from(s.to_string())
    }

    #[test]
    fn null_then_value_yields_value() {
        let mut p = Presence::new();
        p.apply_patch(&Patch::leave(cid("a")));
        p.apply_patch(&Patch::set(cid("a"), json!({"x": 1})));
        assert_eq!(p.get(&cid("a")), Some(&json!({"x": 1})));
    }

    #[test]
    fn value_then_null_yields_empty() {
        let mut p = Presence::new();
        p.apply_patch(&Patch::set(cid("a"), json!({"x": 1})));
        p.apply_patch(&Patch::leave(cid("a")));
        assert_eq!(p.get(&cid("a")), None);
        assert!(p.snapshot().is_empty());
    }

    #[test]
    fn patch_leaves_other_keys_untouched() {
        let mut p = Presence::new();
        p.apply_patch(&Patch::set(cid("a"), json!(1)));
        p.apply_patch(&Patch::set(cid("b"), json!(2)));
        p.apply_patch(&Patch::leave(cid("a")));
        assert_eq!(p.get(&cid("a")), None);
        assert_eq!(p.get(&cid("b")), Some(&json!(2)));
    }

    #[test]
    fn reapplying_identical_patch_reports_no_change() {
        let mut p = Presence::new();
        assert!(p.apply_patch(&Patch::set(cid("a"), json!(1))));
        assert!(!p.apply_patch(&Patch::set(cid("a"), json!(1))));
    }
}
