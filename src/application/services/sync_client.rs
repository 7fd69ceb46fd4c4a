use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::application::ports::client_provider::ClientProvider;
use crate::application::ports::request_channel::{ChannelEvent, RequestChannel};
use crate::domain::doc_binding::DocBinding;
use crate::domain::errors::SyncResult;
use crate::domain::ids::{ClientId, DeviceId, DocId};
use crate::domain::ops::OpBatch;
use crate::domain::presence::Patch;

use super::broadcast_hub::{BroadcastHub, HubMessage};
use super::doc_store::{DocStore, GetDocRequest, LocalCommitHook};
use super::event_bus::{ChangeOrigin, EventBus, SyncEvent};
use super::push_engine::PushEngine;

/// Default debounce applied to `set_presence` calls before they're merged
/// locally and sent to the server (§4.8).
pub const DEFAULT_PRESENCE_DEBOUNCE: Duration = Duration::from_millis(40);

/// Composition root for one identity's sync session (§4.8): owns the doc
/// cache, the push engine, the intra-device hub, and the connection, and
/// wires their events together. One `SyncClient` per `(userId, deviceId)`.
pub struct SyncClient<B, P, Ch>
where
    B: DocBinding,
    P: ClientProvider<Serialized = B::Serialized, Op = B::Op>,
    Ch: RequestChannel,
{
    doc_store: Arc<DocStore<B, P>>,
    push_engine: Arc<PushEngine<B, P, Ch>>,
    hub: Arc<BroadcastHub<B::Op>>,
    events: Arc<EventBus<B::Op>>,
    channel: Arc<Ch>,
    client_id: ClientId,
    device_id: DeviceId,
    presence_debounce: Duration,
    presence_generations: DashMap<DocId, Arc<AtomicU64>>,
    connected: Arc<AtomicBool>,
}

impl<B, P, Ch> SyncClient<B, P, Ch>
where
    B: DocBinding,
    P: ClientProvider<Serialized = B::Serialized, Op = B::Op>,
    Ch: RequestChannel,
{
    pub fn new(
        binding: Arc<B>,
        provider: Arc<P>,
        channel: Arc<Ch>,
        user_id: &str,
        device_id: DeviceId,
    ) -> Arc<Self> {
        let client_id = ClientId::new(user_id, &device_id);
        let hub = Arc::new(BroadcastHub::new());
        let events = Arc::new(EventBus::new());

        let (commit_tx, mut commit_rx) =
            tokio::sync::mpsc::unbounded_channel::<(DocId, OpBatch<B::Op>)>();
        let on_local_commit: LocalCommitHook<B::Op> =
            Arc::new(move |doc_id, ops| {
                let _ = commit_tx.send((doc_id, ops));
            });

        let doc_store = Arc::new(DocStore::new(binding, provider.clone(), on_local_commit));
        let push_engine = Arc::new(PushEngine::new(
            doc_store.clone(),
            provider,
            channel.clone(),
            hub.clone(),
            events.clone(),
            client_id.clone(),
        ));

        let client = Arc::new(Self {
            doc_store,
            push_engine: push_engine.clone(),
            hub: hub.clone(),
            events,
            channel: channel.clone(),
            client_id: client_id.clone(),
            device_id,
            presence_debounce: DEFAULT_PRESENCE_DEBOUNCE,
            presence_generations: DashMap::new(),
            connected: Arc::new(AtomicBool::new(false)),
        });

        tokio::spawn(async move {
            while let Some((doc_id, _ops)) = commit_rx.recv().await {
                push_engine.trigger(doc_id);
            }
        });

        client.spawn_channel_listener();
        client.spawn_hub_listener();
        client
    }

    pub fn doc_store(&self) -> &Arc<DocStore<B, P>> {
        &self.doc_store
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent<B::Op>> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn get_doc(&self, req: GetDocRequest) -> SyncResult<Option<B::Doc>> {
        let doc_id_for_event = req.id.clone();
        let doc = self.doc_store.get_doc(req).await?;
        if doc.is_some() {
            if let Some(doc_id) = doc_id_for_event {
                self.events.publish(SyncEvent::DocLoad { doc_id });
            }
        }
        Ok(doc)
    }

    pub async fn unload_doc(&self, doc_id: &DocId) {
        self.doc_store.unload_doc(doc_id).await;
        self.events.publish(SyncEvent::DocUnload {
            doc_id: doc_id.clone(),
        });
    }

    /// Debounces, merges locally, broadcasts intra-device, and (if connected)
    /// sends `value` as this client's presence for `doc_id` (§4.8).
    pub fn set_presence(self: &Arc<Self>, doc_id: DocId, value: Value) {
        let generation = self
            .presence_generations
            .entry(doc_id.clone())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();
        let my_generation = generation.fetch_add(1, Ordering::SeqCst) + 1;
        let client = self.clone();
        let debounce = self.presence_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if generation.load(Ordering::SeqCst) != my_generation {
                return;
            }
            client.flush_presence(doc_id, value).await;
        });
    }

    async fn flush_presence(&self, doc_id: DocId, value: Value) {
        let own_client = self.client_id.clone();
        self.doc_store
            .with_presence(&doc_id, |store| store.set_own(own_client.clone(), value.clone()))
            .await;

        let patch = Patch::set(own_client, value);
        self.hub.publish(
            &self.client_id,
            HubMessage::Presence {
                doc_id: doc_id.clone(),
                presence: patch.clone(),
            },
        );

        if self.is_connected() {
            let payload = json!({ "docId": doc_id.as_str(), "presence": patch });
            if let Err(err) = self.channel.request_default("presence", payload).await {
                tracing::warn!(%doc_id, error = %err, "presence update failed, dropped (best-effort)");
            }
        }
    }

    fn spawn_channel_listener(self: &Arc<Self>) {
        let client = self.clone();
        let mut rx = self.channel.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ChannelEvent::Connected) => client.handle_connect().await,
                    Ok(ChannelEvent::Disconnected { reason }) => client.handle_disconnect(reason).await,
                    Ok(ChannelEvent::ConnectError { message }) => {
                        client.events.publish(SyncEvent::ConnectError { message });
                    }
                    Ok(ChannelEvent::Dirty { doc_id }) => client.push_engine.trigger(doc_id),
                    Ok(ChannelEvent::Presence { doc_id, presence }) => {
                        client.doc_store.with_presence(&doc_id, |store| {
                            store.apply_patch(&presence);
                        }).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "channel event subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn handle_connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.events.publish(SyncEvent::Connect);
        for doc_id in self.doc_store.cached_doc_ids().await {
            self.push_engine.trigger(doc_id);
        }
    }

    async fn handle_disconnect(&self, reason: String) {
        self.connected.store(false, Ordering::SeqCst);
        self.push_engine.reset_all();
        self.presence_generations.clear();
        for doc_id in self.doc_store.cached_doc_ids().await {
            self.doc_store
                .with_presence(&doc_id, |store| store.clear_own())
                .await;
            self.hub.publish(
                &self.client_id,
                HubMessage::Presence {
                    doc_id,
                    presence: Patch::leave(self.client_id.clone()),
                },
            );
        }
        self.events.publish(SyncEvent::Disconnect { reason });
    }

    fn spawn_hub_listener(self: &Arc<Self>) {
        let client = self.clone();
        let mut rx = self.hub.subscribe(&self.client_id);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(HubMessage::Operations {
                        doc_id,
                        operations,
                        presence,
                    }) => {
                        client
                            .doc_store
                            .apply_remote_operations(&doc_id, operations.as_slice())
                            .await;
                        if let Some(presence) = presence {
                            client
                                .doc_store
                                .with_presence(&doc_id, |store| {
                                    store.apply_patch(&presence);
                                })
                                .await;
                        }
                        // A sibling tab's push moved this doc's server clock;
                        // fold any push already in flight into pending so it
                        // gets reissued against the new base (§4.5).
                        client.push_engine.trigger(doc_id.clone());
                        client.events.publish(SyncEvent::Change {
                            doc_id,
                            origin: ChangeOrigin::Broadcast,
                            operations,
                        });
                    }
                    Ok(HubMessage::Presence { doc_id, presence }) => {
                        client
                            .doc_store
                            .with_presence(&doc_id, |store| {
                                store.apply_patch(&presence);
                            })
                            .await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "hub subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }
}
