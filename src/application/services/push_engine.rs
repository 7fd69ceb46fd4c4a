use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};

use crate::application::ports::client_provider::{ClientProvider, DocEntry, TxMode};
use crate::application::ports::request_channel::RequestChannel;
use crate::domain::doc_binding::DocBinding;
use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::ids::{ClientId, Clock, DocId};
use crate::domain::ops::{flatten, OpBatch};
use crate::domain::presence::Patch;

use super::broadcast_hub::{BroadcastHub, HubMessage};
use super::doc_store::DocStore;
use super::event_bus::{ChangeOrigin, EventBus, SyncEvent, SyncOutcome};

const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_CAP: Duration = Duration::from_secs(30);

fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    let millis = RETRY_BASE.as_millis() as u64 * factor;
    Duration::from_millis(millis.min(RETRY_CAP.as_millis() as u64))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushStatus {
    Idle,
    Pushing,
    PushingWithPending,
}

/// Per-document push state machine (§4.7). Generic over the same `B`/`P` the
/// `DocStore` it shares is generic over, plus a `RequestChannel` transport.
pub struct PushEngine<B, P, Ch>
where
    B: DocBinding,
    P: ClientProvider<Serialized = B::Serialized, Op = B::Op>,
    Ch: RequestChannel,
{
    doc_store: Arc<DocStore<B, P>>,
    provider: Arc<P>,
    channel: Arc<Ch>,
    hub: Arc<BroadcastHub<B::Op>>,
    events: Arc<EventBus<B::Op>>,
    client_id: ClientId,
    statuses: DashMap<DocId, PushStatus>,
    retry_attempts: DashMap<DocId, u32>,
    generation: AtomicU64,
}

impl<B, P, Ch> PushEngine<B, P, Ch>
where
    B: DocBinding,
    P: ClientProvider<Serialized = B::Serialized, Op = B::Op>,
    Ch: RequestChannel,
{
    pub fn new(
        doc_store: Arc<DocStore<B, P>>,
        provider: Arc<P>,
        channel: Arc<Ch>,
        hub: Arc<BroadcastHub<B::Op>>,
        events: Arc<EventBus<B::Op>>,
        client_id: ClientId,
    ) -> Self {
        Self {
            doc_store,
            provider,
            channel,
            hub,
            events,
            client_id,
            statuses: DashMap::new(),
            retry_attempts: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Flags `doc_id` dirty: a local commit, an incoming `dirty` push, or a
    /// fresh connection all funnel through here (§4.7's transition table).
    pub fn trigger(self: &Arc<Self>, doc_id: DocId) {
        let should_spawn = match self.statuses.entry(doc_id.clone()) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(PushStatus::Pushing);
                true
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => match *slot.get() {
                PushStatus::Idle => {
                    slot.insert(PushStatus::Pushing);
                    true
                }
                PushStatus::Pushing => {
                    slot.insert(PushStatus::PushingWithPending);
                    false
                }
                PushStatus::PushingWithPending => false,
            },
        };
        if should_spawn {
            let engine = self.clone();
            tokio::spawn(async move { engine.run_cycle(doc_id).await });
        }
    }

    /// Clears every push status and abandons any in-flight retry loop.
    /// Called on disconnect (§4.8); reconnecting re-triggers every cached doc.
    pub fn reset_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.statuses.clear();
        self.retry_attempts.clear();
    }

    async fn run_cycle(self: Arc<Self>, doc_id: DocId) {
        let my_generation = self.generation.load(Ordering::SeqCst);
        loop {
            match self.push_once(&doc_id).await {
                Ok(()) => {
                    self.retry_attempts.remove(&doc_id);
                }
                Err(err) if !err.is_retryable_at_push_layer() => {
                    // A storage-layer failure is local and won't be fixed by
                    // retrying against the same disk; go idle and wait for
                    // the next external trigger instead of looping (§7).
                    tracing::warn!(%doc_id, error = %err, "push failed at storage layer, not retrying");
                    self.events.publish(SyncEvent::Sync {
                        doc_id: doc_id.clone(),
                        outcome: SyncOutcome::from_error(&err),
                    });
                    self.retry_attempts.remove(&doc_id);
                    self.statuses.insert(doc_id.clone(), PushStatus::Idle);
                    return;
                }
                Err(err) => {
                    let attempt = {
                        let mut entry = self.retry_attempts.entry(doc_id.clone()).or_insert(0);
                        *entry += 1;
                        *entry
                    };
                    tracing::warn!(%doc_id, error = %err, attempt, "push failed, will retry");
                    self.events.publish(SyncEvent::Sync {
                        doc_id: doc_id.clone(),
                        outcome: SyncOutcome::from_error(&err),
                    });
                    tokio::time::sleep(backoff_delay(attempt - 1)).await;
                    if self.generation.load(Ordering::SeqCst) != my_generation {
                        return;
                    }
                    continue;
                }
            }

            let reissue = match self.statuses.get(&doc_id).map(|s| *s) {
                Some(PushStatus::PushingWithPending) => {
                    self.statuses.insert(doc_id.clone(), PushStatus::Pushing);
                    true
                }
                _ => {
                    self.statuses.insert(doc_id.clone(), PushStatus::Idle);
                    false
                }
            };
            if !reissue {
                return;
            }
        }
    }

    async fn push_once(&self, doc_id: &DocId) -> SyncResult<()> {
        let mut tx = self.provider.begin(TxMode::ReadOnly).await?;
        let batches = tx.get_operations(doc_id).await?;
        let read_count = batches.len();
        let client_ops = flatten(&batches);

        let stored = tx.get_serialized_doc(doc_id).await?;
        let clock = stored.as_ref().map(|e| e.clock).unwrap_or(Clock::NONE);
        drop(tx);

        let own_presence = self
            .doc_store
            .with_presence(doc_id, |p| p.own_patch())
            .await
            .flatten();

        let payload = json!({
            "docId": doc_id.as_str(),
            "clock": clock.0,
            "operations": OpBatch::new(client_ops.clone()),
            "presence": own_presence,
        });

        let response = self.channel.request_default("sync-operations", payload).await?;
        self.handle_response(doc_id, read_count, &client_ops, response).await
    }

    async fn handle_response(
        &self,
        doc_id: &DocId,
        read_count: usize,
        client_ops: &[B::Op],
        response: Value,
    ) -> SyncResult<()> {
        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(match error.get("type").and_then(Value::as_str) {
                Some("AuthorizationError") => SyncError::Authorization(message),
                Some("ValidationError") => SyncError::Validation(message),
                Some("DatabaseError") => SyncError::Database(anyhow::anyhow!(message)),
                _ => SyncError::Network(message),
            });
        }

        let data = response.get("data").cloned().unwrap_or(Value::Null);
        let server_ops: Vec<B::Op> = data
            .get("operations")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let squashed: Option<B::Serialized> = data
            .get("serializedDoc")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let new_clock = data
            .get("clock")
            .and_then(Value::as_u64)
            .map(Clock)
            .unwrap_or(Clock::NONE);

        if self
            .consolidate(doc_id, read_count, client_ops, &server_ops, squashed, new_clock)
            .await
            && !server_ops.is_empty()
        {
            self.doc_store.apply_remote_operations(doc_id, &server_ops).await;
            self.events.publish(SyncEvent::Change {
                doc_id: doc_id.clone(),
                origin: ChangeOrigin::Remote,
                operations: OpBatch::new(server_ops.clone()),
            });
            let own_patch = self
                .doc_store
                .with_presence(doc_id, |p| p.own_patch())
                .await
                .flatten();
            self.hub.publish(
                &self.client_id,
                HubMessage::Operations {
                    doc_id: doc_id.clone(),
                    operations: OpBatch::new(server_ops),
                    presence: own_patch,
                },
            );
        }
        self.events.publish(SyncEvent::Sync {
            doc_id: doc_id.clone(),
            outcome: SyncOutcome::Consolidated { clock: new_clock },
        });
        Ok(())
    }

    /// The readwrite consolidation transaction (§4.7 steps 1-7). Returns
    /// whether it committed, so the caller knows whether to apply/broadcast
    /// `server_ops` to the in-memory doc.
    async fn consolidate(
        &self,
        doc_id: &DocId,
        read_count: usize,
        client_ops: &[B::Op],
        server_ops: &[B::Op],
        squashed: Option<B::Serialized>,
        new_clock: Clock,
    ) -> bool {
        let mut tx = match self.provider.begin(TxMode::ReadWrite).await {
            Ok(tx) => tx,
            Err(err) => {
                tracing::warn!(%doc_id, error = %err, "failed to open consolidation transaction");
                return false;
            }
        };

        if let Err(err) = tx.delete_operations(doc_id, read_count).await {
            tracing::warn!(%doc_id, error = %err, "failed to delete consumed op batches");
            return false;
        }

        let current = match tx.get_serialized_doc(doc_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!(%doc_id, "doc removed concurrently, aborting consolidation");
                return false;
            }
            Err(err) => {
                tracing::warn!(%doc_id, error = %err, "failed to re-read snapshot");
                return false;
            }
        };

        if current.clock >= new_clock {
            tracing::debug!(%doc_id, clock = %current.clock, new_clock = %new_clock, "already consolidated at or past new clock");
            return false;
        }

        if server_ops.is_empty() && client_ops.is_empty() && squashed.is_none() {
            return false;
        }

        let doc_type = self.doc_store.doc_type_of(doc_id).await;
        let new_serialized = match (squashed, doc_type) {
            (Some(squashed), _) => squashed,
            (None, Some(doc_type)) => {
                let binding = self.doc_store.binding();
                let doc = match binding.deserialize(&doc_type, &current.serialized_doc) {
                    Ok(doc) => doc,
                    Err(err) => {
                        tracing::warn!(%doc_id, error = %err, "failed to deserialize snapshot for consolidation");
                        return false;
                    }
                };
                let all_ops: Vec<B::Op> = server_ops
                    .iter()
                    .cloned()
                    .chain(client_ops.iter().cloned())
                    .collect();
                binding.apply_operations(&doc, &all_ops);
                binding.serialize(&doc)
            }
            (None, None) => {
                tracing::warn!(%doc_id, "no cached doc type; cannot fold operations into snapshot");
                return false;
            }
        };

        // Re-check once more before writing, to close the window opened by
        // deserializing/applying above (§4.7 step 6).
        match tx.get_serialized_doc(doc_id).await {
            Ok(Some(recheck)) if recheck.clock == current.clock => {}
            Ok(_) => {
                tracing::debug!(%doc_id, "lost consolidation race on recheck, aborting");
                return false;
            }
            Err(err) => {
                tracing::warn!(%doc_id, error = %err, "failed to recheck snapshot before commit");
                return false;
            }
        }

        if let Err(err) = tx
            .save_serialized_doc(
                doc_id,
                DocEntry {
                    serialized_doc: new_serialized,
                    clock: new_clock,
                },
            )
            .await
        {
            tracing::warn!(%doc_id, error = %err, "failed to save consolidated snapshot");
            return false;
        }

        if let Err(err) = tx.commit().await {
            tracing::warn!(%doc_id, error = %err, "failed to commit consolidation transaction");
            return false;
        }

        true
    }

    /// Resets the own-presence patch attached to the next push — callers
    /// go through `PresenceStore` directly via `DocStore::with_presence`.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Builds the `{clientId: null}` leave patch broadcast on disconnect
    /// (§4.8) for one document's own presence.
    pub fn own_leave_patch(&self) -> Patch {
        Patch::leave(self.client_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::testing::fakes::{FakeRequestChannel, InMemoryClientProvider};
    use crate::testing::text_log_binding::TextLogBinding;

    fn engine(
        responder: impl Fn(&str, Value) -> SyncResult<Value> + Send + Sync + 'static,
    ) -> Arc<PushEngine<TextLogBinding, InMemoryClientProvider<String, String>, FakeRequestChannel>> {
        let doc_store = Arc::new(DocStore::new(
            Arc::new(TextLogBinding::new()),
            Arc::new(InMemoryClientProvider::new()),
            Arc::new(|_, _| {}),
        ));
        Arc::new(PushEngine::new(
            doc_store.clone(),
            Arc::new(InMemoryClientProvider::new()),
            FakeRequestChannel::new(responder),
            Arc::new(BroadcastHub::new()),
            Arc::new(EventBus::new()),
            ClientId::from("user-1:device-1".to_string()),
        ))
    }

    /// Regression test for a bug where the retry-error path dropped the push
    /// status to `Idle` during the backoff sleep. A `trigger()` racing that
    /// window would then spawn a second, independent `run_cycle` for the same
    /// `doc_id` — this asserts the status never leaves `Pushing`/
    /// `PushingWithPending` across the sleep, and that a concurrent `trigger()`
    /// during backoff folds into one retry cycle instead of spawning another.
    #[tokio::test(start_paused = true)]
    async fn trigger_during_backoff_folds_into_pending_instead_of_spawning_again() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let counter = call_count.clone();
        let engine = engine(move |_event, _payload| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                Err(SyncError::Network("offline".to_string()))
            } else {
                Ok(json!({ "data": { "operations": null, "serializedDoc": null, "clock": n } }))
            }
        });

        let doc_id = DocId::from("doc-1");
        engine.trigger(doc_id.clone());

        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 1, "first attempt should have run and failed");
        assert_ne!(
            engine.statuses.get(&doc_id).map(|s| *s),
            Some(PushStatus::Idle),
            "status must not drop to Idle while the retry backoff is sleeping"
        );

        // A concurrent local commit arrives mid-backoff.
        engine.trigger(doc_id.clone());
        assert_eq!(
            engine.statuses.get(&doc_id).map(|s| *s),
            Some(PushStatus::PushingWithPending),
            "concurrent trigger during backoff should fold into the same cycle, not spawn another"
        );

        tokio::time::advance(RETRY_CAP).await;
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            call_count.load(Ordering::SeqCst),
            3,
            "expected exactly one retry attempt plus one reissue for the pending commit, no duplicate cycle"
        );
        assert_eq!(engine.statuses.get(&doc_id).map(|s| *s), Some(PushStatus::Idle));
    }
}
