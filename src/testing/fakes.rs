use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::application::ports::auth_port::{Actor, Authenticator, Authorizer, Capability};
use crate::application::ports::client_provider::{ClientProvider, ClientTx, DocEntry, TxMode};
use crate::application::ports::request_channel::{ChannelEvent, RequestChannel};
use crate::application::ports::server_provider::{ServerProvider, ServerSyncRequest, ServerSyncResponse};
use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::ids::{Clock, DocId};
use crate::domain::ops::OpBatch;

struct DocRecord<S, O> {
    entry: Option<DocEntry<S>>,
    operations: Vec<OpBatch<O>>,
}

impl<S, O> Default for DocRecord<S, O> {
    fn default() -> Self {
        Self {
            entry: None,
            operations: Vec::new(),
        }
    }
}

/// In-memory `ClientProvider` for tests (§4.10). A single global
/// `tokio::sync::Mutex` stands in for the "per-docId mutex" simulation the
/// port doc comment allows for providers with no native transaction: `begin`
/// holds the guard for the lifetime of the returned `ClientTx`, so every
/// transaction is genuinely atomic with respect to every other, not just to
/// operations on the same doc.
pub struct InMemoryClientProvider<S, O> {
    state: Arc<tokio::sync::Mutex<HashMap<DocId, DocRecord<S, O>>>>,
}

impl<S, O> InMemoryClientProvider<S, O> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }
}

impl<S, O> Default for InMemoryClientProvider<S, O> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InMemoryClientTx<S, O> {
    guard: tokio::sync::OwnedMutexGuard<HashMap<DocId, DocRecord<S, O>>>,
}

#[async_trait]
impl<S, O> ClientTx<S, O> for InMemoryClientTx<S, O>
where
    S: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    async fn get_serialized_doc(&mut self, doc_id: &DocId) -> SyncResult<Option<DocEntry<S>>> {
        Ok(self.guard.get(doc_id).and_then(|r| r.entry.clone()))
    }

    async fn save_serialized_doc(&mut self, doc_id: &DocId, entry: DocEntry<S>) -> SyncResult<()> {
        self.guard.entry(doc_id.clone()).or_default().entry = Some(entry);
        Ok(())
    }

    async fn save_operations(&mut self, doc_id: &DocId, operations: OpBatch<O>) -> SyncResult<()> {
        self.guard.entry(doc_id.clone()).or_default().operations.push(operations);
        Ok(())
    }

    async fn get_operations(&mut self, doc_id: &DocId) -> SyncResult<Vec<OpBatch<O>>> {
        Ok(self
            .guard
            .get(doc_id)
            .map(|r| r.operations.clone())
            .unwrap_or_default())
    }

    async fn delete_operations(&mut self, doc_id: &DocId, count: usize) -> SyncResult<()> {
        if let Some(record) = self.guard.get_mut(doc_id) {
            let n = count.min(record.operations.len());
            record.operations.drain(0..n);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SyncResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<S, O> ClientProvider for InMemoryClientProvider<S, O>
where
    S: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    type Serialized = S;
    type Op = O;

    async fn begin(&self, _mode: TxMode) -> SyncResult<Box<dyn ClientTx<S, O> + '_>> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryClientTx { guard }))
    }
}

struct ServerRecord<O> {
    clock: u64,
    history: Vec<(u64, Vec<O>)>,
}

impl<O> Default for ServerRecord<O> {
    fn default() -> Self {
        Self {
            clock: 0,
            history: Vec::new(),
        }
    }
}

/// In-memory `ServerProvider` for tests. Mirrors
/// `PostgresServerProvider`'s clock-assignment semantics exactly (including
/// never returning a squashed snapshot) so tests written against this fake
/// stay true to the shipped adapter's behavior.
pub struct InMemoryServerProvider<S, O> {
    state: Arc<Mutex<HashMap<DocId, ServerRecord<O>>>>,
    _marker: PhantomData<fn() -> S>,
}

impl<S, O> InMemoryServerProvider<S, O> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            _marker: PhantomData,
        }
    }
}

impl<S, O> Default for InMemoryServerProvider<S, O> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S, O> ServerProvider for InMemoryServerProvider<S, O>
where
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    O: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Serialized = S;
    type Op = O;

    async fn sync(&self, req: ServerSyncRequest<O>) -> SyncResult<ServerSyncResponse<O, S>> {
        let mut state = self.state.lock().unwrap();
        let record = state.entry(req.doc_id.clone()).or_default();
        let new_clock = record.clock + 1;
        record.clock = new_clock;

        if !req.operations.is_empty() {
            record.history.push((new_clock, req.operations.clone()));
        }

        let missing: Vec<O> = record
            .history
            .iter()
            .filter(|(clock, _)| *clock > req.clock.0 && *clock < new_clock)
            .flat_map(|(_, ops)| ops.iter().cloned())
            .collect();

        Ok(ServerSyncResponse {
            doc_id: req.doc_id,
            operations: if missing.is_empty() { None } else { Some(missing) },
            serialized_doc: None,
            clock: Clock(new_clock),
        })
    }
}

type Responder = dyn Fn(&str, Value) -> SyncResult<Value> + Send + Sync;

/// Scripted `RequestChannel` fake for tests. Every `request` call is routed
/// through a caller-supplied responder closure; `emit` lets a test simulate a
/// server-pushed `dirty`/`presence` event or a connection lifecycle change
/// without a real socket.
pub struct FakeRequestChannel {
    responder: Arc<Responder>,
    events: broadcast::Sender<ChannelEvent>,
}

impl FakeRequestChannel {
    pub fn new(responder: impl Fn(&str, Value) -> SyncResult<Value> + Send + Sync + 'static) -> Arc<Self> {
        let (tx, _) = broadcast::channel(64);
        Arc::new(Self {
            responder: Arc::new(responder),
            events: tx,
        })
    }

    /// Always answers with `Ok(Value::Null)`, for tests that only care about
    /// push-side events.
    pub fn silent() -> Arc<Self> {
        Self::new(|_, _| Ok(Value::Null))
    }

    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl RequestChannel for FakeRequestChannel {
    async fn request(&self, event: &str, payload: Value, _timeout: Duration) -> SyncResult<Value> {
        (self.responder)(event, payload)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

/// `Authenticator` fake: a token of the form `"<prefix><userId>"` resolves to
/// an actor with that `userId`; anything else is an invalid token.
pub struct PrefixAuthenticator {
    prefix: &'static str,
}

impl PrefixAuthenticator {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }
}

impl Default for PrefixAuthenticator {
    fn default() -> Self {
        Self::new("valid-")
    }
}

#[async_trait]
impl Authenticator for PrefixAuthenticator {
    async fn authenticate(&self, token: &str) -> SyncResult<Option<Actor>> {
        Ok(token.strip_prefix(self.prefix).map(|user_id| Actor {
            user_id: user_id.to_string(),
            context: None,
        }))
    }
}

/// `Authorizer` fake granting a fixed capability to every actor on every
/// document.
pub struct FixedAuthorizer(pub Capability);

impl Default for FixedAuthorizer {
    fn default() -> Self {
        Self(Capability::Edit)
    }
}

#[async_trait]
impl Authorizer for FixedAuthorizer {
    async fn authorize(&self, _doc_id: &DocId, _actor: &Actor) -> SyncResult<Capability> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_provider_round_trips_serialized_doc() {
        let provider: InMemoryClientProvider<String, String> = InMemoryClientProvider::new();
        let doc_id = DocId::generate();
        provider
            .save_serialized_doc(
                &doc_id,
                DocEntry {
                    serialized_doc: "hello".to_string(),
                    clock: Clock(1),
                },
            )
            .await
            .unwrap();
        let entry = provider.get_serialized_doc(&doc_id).await.unwrap().unwrap();
        assert_eq!(entry.serialized_doc, "hello");
        assert_eq!(entry.clock, Clock(1));
    }

    #[tokio::test]
    async fn client_provider_deletes_oldest_operations_first() {
        let provider: InMemoryClientProvider<String, String> = InMemoryClientProvider::new();
        let doc_id = DocId::generate();
        provider
            .save_operations(&doc_id, OpBatch::new(vec!["a".to_string()]))
            .await
            .unwrap();
        provider
            .save_operations(&doc_id, OpBatch::new(vec!["b".to_string()]))
            .await
            .unwrap();

        let mut tx = provider.begin(TxMode::ReadWrite).await.unwrap();
        tx.delete_operations(&doc_id, 1).await.unwrap();
        let remaining = tx.get_operations(&doc_id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].as_slice(), ["b".to_string()]);
    }

    #[tokio::test]
    async fn server_provider_assigns_increasing_clocks() {
        let provider: InMemoryServerProvider<String, String> = InMemoryServerProvider::new();
        let doc_id = DocId::generate();
        let first = provider
            .sync(ServerSyncRequest {
                doc_id: doc_id.clone(),
                clock: Clock::NONE,
                operations: vec!["a".to_string()],
            })
            .await
            .unwrap();
        let second = provider
            .sync(ServerSyncRequest {
                doc_id: doc_id.clone(),
                clock: first.clock,
                operations: vec!["b".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(first.clock, Clock(1));
        assert_eq!(second.clock, Clock(2));
        assert!(second.operations.is_none());
    }

    #[tokio::test]
    async fn server_provider_reports_missing_operations_for_stale_caller() {
        let provider: InMemoryServerProvider<String, String> = InMemoryServerProvider::new();
        let doc_id = DocId::generate();
        provider
            .sync(ServerSyncRequest {
                doc_id: doc_id.clone(),
                clock: Clock::NONE,
                operations: vec!["a".to_string()],
            })
            .await
            .unwrap();
        let caught_up = provider
            .sync(ServerSyncRequest {
                doc_id: doc_id.clone(),
                clock: Clock::NONE,
                operations: vec![],
            })
            .await
            .unwrap();
        assert_eq!(caught_up.operations, Some(vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn prefix_authenticator_accepts_only_prefixed_tokens() {
        let auth = PrefixAuthenticator::default();
        assert!(auth.authenticate("valid-alice").await.unwrap().is_some());
        assert!(auth.authenticate("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fake_request_channel_routes_through_responder() {
        let channel = FakeRequestChannel::new(|event, _| Ok(Value::String(event.to_string())));
        let response = channel.request_default("sync-operations", Value::Null).await.unwrap();
        assert_eq!(response, Value::String("sync-operations".to_string()));
    }
}
