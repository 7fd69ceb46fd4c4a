use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::errors::SyncResult;
use crate::domain::ids::{Clock, DocId};

/// A client's `sync-operations` request as it reaches the server's dispatch
/// logic (§4.9), already stripped of its wire envelope.
#[derive(Debug, Clone)]
pub struct ServerSyncRequest<O> {
    pub doc_id: DocId,
    pub clock: Clock,
    pub operations: Vec<O>,
}

/// What `ServerProvider::sync` hands back to the dispatcher. `operations` is
/// the set of ops the caller is missing (clock > the request's clock),
/// `serialized_doc` a squashed-history fallback when the gap is too large to
/// replay operation-by-operation. Exactly one of the two is populated when the
/// caller is behind; both are `None` when the caller was already current.
#[derive(Debug, Clone)]
pub struct ServerSyncResponse<O, S> {
    pub doc_id: DocId,
    pub operations: Option<Vec<O>>,
    pub serialized_doc: Option<S>,
    pub clock: Clock,
}

/// The server-side counterpart of `ClientProvider`. Unlike the client, the
/// server never runs the consolidation loop — it owns the authoritative clock
/// and only ever appends, so one atomic `sync` call covers the whole
/// operation: assign the next clock, persist the incoming operations at it,
/// and report what the caller is missing. Concrete adapters back this with a
/// single SQL transaction (see `infrastructure::postgres_provider`).
#[async_trait]
pub trait ServerProvider: Send + Sync + 'static {
    type Serialized: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Op: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    async fn sync(
        &self,
        req: ServerSyncRequest<Self::Op>,
    ) -> SyncResult<ServerSyncResponse<Self::Op, Self::Serialized>>;
}
