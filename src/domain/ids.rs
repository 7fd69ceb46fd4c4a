use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

/// Opaque lowercase ULID string identifying a document for its entire lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Mints a fresh, time-sortable id. Used by `DocStore` when creating a
    /// document client-side (the server never assigns a `DocId`).
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_lowercase()))
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        Self(s.to_lowercase())
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_lowercase())
    }
}

/// Persistent per-device identifier, minted once and kept in device-local
/// storage. Stable across process restarts of the same installation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Per-process identity, derived from `(userId, deviceId)`. Stable across
/// reconnections of the same tab/process; a fresh process (new tab, new
/// device) gets a new one even for the same user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(user_id: &str, device_id: &DeviceId) -> Self {
        Self(format!("{user_id}:{device_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `deviceId` this client id was derived from, used by the server to
    /// exclude every tab of the sending device from `dirty` fan-out.
    pub fn device_id(&self) -> Option<&str> {
        self.0.split_once(':').map(|(_, device)| device)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Server-assigned, strictly increasing (per docId, per server instance)
/// integer tagging a consolidated snapshot. `0` means "no snapshot yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Clock(pub u64);

impl Clock {
    pub const NONE: Clock = Clock(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn next(&self) -> Clock {
        Clock(self.0 + 1)
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_generate_is_lowercase_and_unique() {
        let a = DocId::generate();
        let b = DocId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str(), a.as_str().to_lowercase());
    }

    #[test]
    fn client_id_recovers_device_id() {
        let device = DeviceId::generate();
        let client = ClientId::new("user-1", &device);
        assert_eq!(client.device_id(), Some(device.as_str()));
    }

    #[test]
    fn clock_zero_means_no_snapshot() {
        assert!(Clock::NONE.is_none());
        assert!(!Clock::NONE.next().is_none());
        assert_eq!(Clock::NONE.next(), Clock(1));
    }
}
