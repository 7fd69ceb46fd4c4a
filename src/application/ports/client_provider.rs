use async_trait::async_trait;

use crate::domain::errors::SyncResult;
use crate::domain::ids::{Clock, DocId};
use crate::domain::ops::OpBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// A `docs` store entry: the serialized document at the clock of its last
/// consolidation.
#[derive(Debug, Clone)]
pub struct DocEntry<S> {
    pub serialized_doc: S,
    pub clock: Clock,
}

/// A single transaction against a `ClientProvider`. All reads and writes
/// issued through one `ClientTx` observe the same snapshot; dropping it
/// without calling `commit` rolls back every write made through it — the
/// same discipline `sqlx::Transaction` gives the shipped adapters.
#[async_trait]
pub trait ClientTx<S, O>: Send
where
    S: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    async fn get_serialized_doc(&mut self, doc_id: &DocId) -> SyncResult<Option<DocEntry<S>>>;
    async fn save_serialized_doc(&mut self, doc_id: &DocId, entry: DocEntry<S>) -> SyncResult<()>;
    async fn save_operations(&mut self, doc_id: &DocId, operations: OpBatch<O>) -> SyncResult<()>;
    async fn get_operations(&mut self, doc_id: &DocId) -> SyncResult<Vec<OpBatch<O>>>;
    async fn delete_operations(&mut self, doc_id: &DocId, count: usize) -> SyncResult<()>;
    async fn commit(self: Box<Self>) -> SyncResult<()>;
}

/// A transactional local KV with two logical stores: `docs` (serialized
/// snapshot + clock, keyed by docId) and `operations` (append log keyed by
/// `(docId, seq)`). Implementations back this with their own native
/// transactions (`sqlx::Transaction` for the shipped SQLite/Postgres
/// adapters); a provider with no true transaction support should simulate one
/// with a per-docId mutex, per the design notes in SPEC_FULL.md §9.
#[async_trait]
pub trait ClientProvider: Send + Sync + 'static {
    type Serialized: Clone + Send + Sync + 'static;
    type Op: Clone + Send + Sync + 'static;

    async fn begin(
        &self,
        mode: TxMode,
    ) -> SyncResult<Box<dyn ClientTx<Self::Serialized, Self::Op> + '_>>;

    async fn get_serialized_doc(
        &self,
        doc_id: &DocId,
    ) -> SyncResult<Option<DocEntry<Self::Serialized>>> {
        let mut tx = self.begin(TxMode::ReadOnly).await?;
        tx.get_serialized_doc(doc_id).await
    }

    async fn save_serialized_doc(
        &self,
        doc_id: &DocId,
        entry: DocEntry<Self::Serialized>,
    ) -> SyncResult<()> {
        let mut tx = self.begin(TxMode::ReadWrite).await?;
        tx.save_serialized_doc(doc_id, entry).await?;
        tx.commit().await
    }

    async fn get_operations(&self, doc_id: &DocId) -> SyncResult<Vec<OpBatch<Self::Op>>> {
        let mut tx = self.begin(TxMode::ReadOnly).await?;
        tx.get_operations(doc_id).await
    }

    async fn save_operations(
        &self,
        doc_id: &DocId,
        operations: OpBatch<Self::Op>,
    ) -> SyncResult<()> {
        let mut tx = self.begin(TxMode::ReadWrite).await?;
        tx.save_operations(doc_id, operations).await?;
        tx.commit().await
    }
}
