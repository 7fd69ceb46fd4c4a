use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::domain::ids::{ClientId, DocId};
use crate::domain::ops::OpBatch;
use crate::domain::presence::Patch;

const CHANNEL_CAPACITY: usize = 256;

/// A message fanned out to every tab/process sharing a `ClientId` (§4.5).
#[derive(Debug, Clone)]
pub enum HubMessage<O> {
    Operations {
        doc_id: DocId,
        operations: OpBatch<O>,
        presence: Option<Patch>,
    },
    Presence {
        doc_id: DocId,
        presence: Patch,
    },
}

/// Intra-device message bus, one logical channel per `ClientId`, created
/// lazily on first subscriber. Mirrors the reference server's
/// `plugin_events: broadcast::Sender<PluginScopedEvent>` pattern, scoped down
/// from one global channel to one per client identity.
///
/// Channels are pruned lazily: a publish or subscribe call that finds a
/// channel with no receivers left removes it, rather than tearing it down the
/// instant the last receiver drops (broadcast::Sender has no drop hook to key
/// off of).
pub struct BroadcastHub<O> {
    channels: DashMap<ClientId, broadcast::Sender<HubMessage<O>>>,
}

impl<O: Clone + Send + Sync + 'static> BroadcastHub<O> {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    pub fn subscribe(&self, client: &ClientId) -> broadcast::Receiver<HubMessage<O>> {
        self.channels
            .entry(client.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publishes to every other subscriber of `client`. A send with no
    /// subscribers (or a lazily stale channel) is a no-op, not an error —
    /// intra-device fan-out is best-effort by construction.
    pub fn publish(&self, client: &ClientId, message: HubMessage<O>) {
        let Some(sender) = self.channels.get(client) else {
            return;
        };
        if sender.receiver_count() == 0 {
            drop(sender);
            self.channels.remove(client);
            return;
        }
        let _ = sender.send(message);
    }
}

impl<O: Clone + Send + Sync + 'static> Default for BroadcastHub<O> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_of_same_client_receive_published_message() {
        let hub: BroadcastHub<i32> = BroadcastHub::new();
        let client = ClientId::from("u1:d1".to_string());
        let mut rx = hub.subscribe(&client);

        hub.publish(
            &client,
            HubMessage::Operations {
                doc_id: DocId::from("doc-1"),
                operations: OpBatch::new(vec![1, 2]),
                presence: None,
            },
        );

        let received = rx.recv().await.unwrap();
        match received {
            HubMessage::Operations { operations, .. } => {
                assert_eq!(operations.as_slice(), &[1, 2]);
            }
            _ => panic!("expected Operations message"),
        }
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_a_noop() {
        let hub: BroadcastHub<i32> = BroadcastHub::new();
        let client = ClientId::from("u1:d1".to_string());
        hub.publish(
            &client,
            HubMessage::Presence {
                doc_id: DocId::from("doc-1"),
                presence: Patch::leave(client.clone()),
            },
        );
    }
}
