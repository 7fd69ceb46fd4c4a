use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::{FutureExt, Shared};
use tokio::sync::RwLock;

use crate::application::ports::client_provider::{ClientProvider, DocEntry};
use crate::domain::doc_binding::{ChangeNotice, DocBinding};
use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::ids::{Clock, DocId};
use crate::domain::ops::OpBatch;

use super::presence_store::PresenceStore;

/// What `DocStore::get_doc` was asked for (§4.6).
#[derive(Debug, Clone)]
pub struct GetDocRequest {
    pub doc_type: String,
    pub id: Option<DocId>,
    pub create_if_missing: bool,
}

impl GetDocRequest {
    pub fn existing(doc_type: impl Into<String>, id: DocId) -> Self {
        Self {
            doc_type: doc_type.into(),
            id: Some(id),
            create_if_missing: false,
        }
    }

    pub fn create_new(doc_type: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            id: None,
            create_if_missing: true,
        }
    }

    pub fn load_or_create(doc_type: impl Into<String>, id: DocId) -> Self {
        Self {
            doc_type: doc_type.into(),
            id: Some(id),
            create_if_missing: true,
        }
    }
}

type LoadFuture<Doc> = Shared<Pin<Box<dyn Future<Output = Option<Doc>> + Send>>>;

enum CacheState<Doc> {
    Loading(LoadFuture<Doc>),
    Ready(Doc),
}

struct CacheEntry<Doc> {
    state: CacheState<Doc>,
    doc_type: String,
    refcount: usize,
    presence: PresenceStore,
}

/// Hook invoked after a local commit has been durably appended to the op
/// log, used by the push engine to flag the doc dirty. Kept as an injected
/// closure rather than a direct dependency so `DocStore` stays ignorant of
/// the push state machine (§4.6/§4.7 are deliberately separate components).
pub type LocalCommitHook<Op> = Arc<dyn Fn(DocId, OpBatch<Op>) + Send + Sync>;

/// Refcounted cache of live document handles (§4.6, design notes §9). Generic
/// over any `B: DocBinding` and a `ClientProvider` whose associated types
/// match it — the cache itself never inspects `Doc`/`Serialized`/`Op`.
pub struct DocStore<B, P>
where
    B: DocBinding,
    P: ClientProvider<Serialized = B::Serialized, Op = B::Op>,
{
    binding: Arc<B>,
    provider: Arc<P>,
    on_local_commit: LocalCommitHook<B::Op>,
    cache: Arc<RwLock<HashMap<DocId, CacheEntry<B::Doc>>>>,
}

impl<B, P> DocStore<B, P>
where
    B: DocBinding,
    P: ClientProvider<Serialized = B::Serialized, Op = B::Op>,
{
    pub fn new(binding: Arc<B>, provider: Arc<P>, on_local_commit: LocalCommitHook<B::Op>) -> Self {
        Self {
            binding,
            provider,
            on_local_commit,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Loads, or loads-and-creates, or creates a document per `req` (§4.6).
    /// Returns `Ok(None)` exactly when `req.id` was given, `create_if_missing`
    /// was false, and no such document exists locally.
    pub async fn get_doc(&self, req: GetDocRequest) -> SyncResult<Option<B::Doc>> {
        match req.id.clone() {
            None => self.create_new(req.doc_type).await.map(Some),
            Some(id) => self.get_or_load(req.doc_type, id, req.create_if_missing).await,
        }
    }

    async fn create_new(&self, doc_type: String) -> SyncResult<B::Doc> {
        let (doc, doc_id) = self.binding.create(&doc_type, None)?;
        self.persist_initial(&doc_id, &doc).await?;
        self.register_on_change(&doc_id, &doc);

        let mut cache = self.cache.write().await;
        cache.insert(
            doc_id,
            CacheEntry {
                state: CacheState::Ready(doc.clone()),
                doc_type,
                refcount: 1,
                presence: PresenceStore::new(),
            },
        );
        Ok(doc)
    }

    async fn get_or_load(
        &self,
        doc_type: String,
        id: DocId,
        create_if_missing: bool,
    ) -> SyncResult<Option<B::Doc>> {
        let shared = {
            let mut cache = self.cache.write().await;
            if let Some(entry) = cache.get_mut(&id) {
                entry.refcount += 1;
                match &entry.state {
                    CacheState::Ready(doc) => return Ok(Some(doc.clone())),
                    CacheState::Loading(fut) => fut.clone(),
                }
            } else {
                let fut = self.build_load_future(doc_type.clone(), id.clone(), create_if_missing);
                cache.insert(
                    id.clone(),
                    CacheEntry {
                        state: CacheState::Loading(fut.clone()),
                        doc_type,
                        refcount: 1,
                        presence: PresenceStore::new(),
                    },
                );
                fut
            }
        };

        let resolved = shared.await;
        let mut cache = self.cache.write().await;
        match (cache.get_mut(&id), resolved) {
            (Some(entry), Some(doc)) => {
                entry.state = CacheState::Ready(doc.clone());
                Ok(Some(doc))
            }
            (Some(_), None) => {
                cache.remove(&id);
                Ok(None)
            }
            (None, resolved) => Ok(resolved),
        }
    }

    fn build_load_future(
        &self,
        doc_type: String,
        id: DocId,
        create_if_missing: bool,
    ) -> LoadFuture<B::Doc> {
        let binding = self.binding.clone();
        let provider = self.provider.clone();
        let on_local_commit = self.on_local_commit.clone();

        let fut: Pin<Box<dyn Future<Output = Option<B::Doc>> + Send>> = Box::pin(async move {
            let existing = provider.get_serialized_doc(&id).await.ok().flatten();
            let doc = match existing {
                Some(DocEntry { serialized_doc, .. }) => {
                    binding.deserialize(&doc_type, &serialized_doc).ok()
                }
                None if create_if_missing => {
                    let (doc, _) = binding.create(&doc_type, Some(id.clone())).ok()?;
                    let serialized = binding.serialize(&doc);
                    let _ = provider
                        .save_serialized_doc(
                            &id,
                            DocEntry {
                                serialized_doc: serialized,
                                clock: Clock::NONE,
                            },
                        )
                        .await;
                    Some(doc)
                }
                None => None,
            }?;

            let doc_for_cb = doc.clone();
            let id_for_cb = id.clone();
            binding.on_change(
                &doc_for_cb,
                Box::new(move |notice: ChangeNotice<B::Op>| {
                    let provider = provider.clone();
                    let on_local_commit = on_local_commit.clone();
                    let doc_id = id_for_cb.clone();
                    tokio::spawn(async move {
                        let ops = notice.operations;
                        if let Err(err) = provider.save_operations(&doc_id, ops.clone()).await {
                            tracing::warn!(%doc_id, error = %err, "failed to persist local operation batch");
                            return;
                        }
                        on_local_commit(doc_id, ops);
                    });
                }),
            );

            Some(doc)
        });
        fut.shared()
    }

    async fn persist_initial(&self, doc_id: &DocId, doc: &B::Doc) -> SyncResult<()> {
        let serialized = self.binding.serialize(doc);
        self.provider
            .save_serialized_doc(
                doc_id,
                DocEntry {
                    serialized_doc: serialized,
                    clock: Clock::NONE,
                },
            )
            .await
    }

    fn register_on_change(&self, doc_id: &DocId, doc: &B::Doc) {
        let provider = self.provider.clone();
        let on_local_commit = self.on_local_commit.clone();
        let doc_id = doc_id.clone();
        self.binding.on_change(
            doc,
            Box::new(move |notice: ChangeNotice<B::Op>| {
                let provider = provider.clone();
                let on_local_commit = on_local_commit.clone();
                let doc_id = doc_id.clone();
                tokio::spawn(async move {
                    let ops = notice.operations;
                    if let Err(err) = provider.save_operations(&doc_id, ops.clone()).await {
                        tracing::warn!(%doc_id, error = %err, "failed to persist local operation batch");
                        return;
                    }
                    on_local_commit(doc_id, ops);
                });
            }),
        );
    }

    /// Drops one reference; at zero, evicts the cache entry and disposes the
    /// binding's resources for it. A no-op if `doc_id` isn't cached.
    pub async fn unload_doc(&self, doc_id: &DocId) {
        let doc_to_dispose = {
            let mut cache = self.cache.write().await;
            let Some(entry) = cache.get_mut(doc_id) else {
                return;
            };
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount > 0 {
                None
            } else {
                match cache.remove(doc_id).map(|e| e.state) {
                    Some(CacheState::Ready(doc)) => Some(doc),
                    _ => None,
                }
            }
        };
        if let Some(doc) = doc_to_dispose {
            self.binding.dispose(doc);
        }
    }

    pub async fn refcount(&self, doc_id: &DocId) -> Option<usize> {
        self.cache.read().await.get(doc_id).map(|e| e.refcount)
    }

    /// Every doc currently resident in the cache, used to re-arm pushes on
    /// reconnect and to sweep presence leave patches on disconnect (§4.8).
    pub async fn cached_doc_ids(&self) -> Vec<DocId> {
        self.cache.read().await.keys().cloned().collect()
    }

    /// The registered doc type for a cached entry, needed by the push engine
    /// to deserialize a squashed snapshot or a freshly consolidated one.
    pub async fn doc_type_of(&self, doc_id: &DocId) -> Option<String> {
        self.cache.read().await.get(doc_id).map(|e| e.doc_type.clone())
    }

    pub async fn with_presence<R>(
        &self,
        doc_id: &DocId,
        f: impl FnOnce(&mut PresenceStore) -> R,
    ) -> Option<R> {
        let mut cache = self.cache.write().await;
        cache.get_mut(doc_id).map(|entry| f(&mut entry.presence))
    }

    /// Applies server/broadcast-originated operations to the cached doc, if
    /// still resident. Used by `PushEngine`'s post-consolidation step and by
    /// `BroadcastHub::Operations` handling (§4.7, §4.5).
    pub async fn apply_remote_operations(&self, doc_id: &DocId, ops: &[B::Op]) {
        let cache = self.cache.read().await;
        if let Some(CacheEntry {
            state: CacheState::Ready(doc),
            ..
        }) = cache.get(doc_id)
        {
            self.binding.apply_operations(doc, ops);
        }
    }

    pub fn error_for_unregistered(doc_type: &str) -> SyncError {
        SyncError::UnknownType(doc_type.to_string())
    }

    /// Exposes the binding for components (the push engine's consolidation
    /// step) that must deserialize/apply/serialize outside the cached live
    /// doc — e.g. to fold server ops into a snapshot read fresh from storage.
    pub fn binding(&self) -> &Arc<B> {
        &self.binding
    }
}
