use tokio::sync::broadcast;

use crate::domain::errors::SyncError;
use crate::domain::ids::DocId;
use crate::domain::ops::OpBatch;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Where a `Change` event's operations came from — a local commit, a server
/// push applied during consolidation, or an intra-device broadcast from a
/// peer tab (§4.5, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
    Broadcast,
}

/// Outcome of one push attempt, reported on the `Sync` event regardless of
/// whether it succeeded (§4.7, §4.8: callers observe push failures via the
/// event bus, not via a returned `Result`).
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Consolidated { clock: crate::domain::ids::Clock },
    Failed { error_type: &'static str, message: String },
}

/// The events `SyncClient` publishes, monomorphized over the binding's `Op`
/// type so the whole bus stays free of dynamic dispatch (design notes §9).
#[derive(Debug, Clone)]
pub enum SyncEvent<O> {
    Connect,
    Disconnect { reason: String },
    ConnectError { message: String },
    Change {
        doc_id: DocId,
        origin: ChangeOrigin,
        operations: OpBatch<O>,
    },
    Sync {
        doc_id: DocId,
        outcome: SyncOutcome,
    },
    DocLoad { doc_id: DocId },
    DocUnload { doc_id: DocId },
}

/// Thin wrapper over `tokio::sync::broadcast` giving every subscriber
/// delivery in registration order, matching the reference server's
/// `subscribe_plugin_events` shape.
pub struct EventBus<O> {
    sender: broadcast::Sender<SyncEvent<O>>,
}

impl<O: Clone + Send + Sync + 'static> EventBus<O> {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent<O>> {
        self.sender.subscribe()
    }

    /// Publishing with no subscribers is expected (e.g. headless sync before
    /// any UI attaches) and is not an error.
    pub fn publish(&self, event: SyncEvent<O>) {
        let _ = self.sender.send(event);
    }
}

impl<O: Clone + Send + Sync + 'static> Default for EventBus<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncOutcome {
    pub fn from_error(error: &SyncError) -> Self {
        Self::Failed {
            error_type: error.wire_type(),
            message: error.to_string(),
        }
    }
}
