use serde::de::DeserializeOwned;
use serde::Serialize;

use super::errors::SyncError;
use super::ids::DocId;
use super::ops::OpBatch;

/// Delivered to a `DocBinding::on_change` callback after every local commit.
pub struct ChangeNotice<Op> {
    pub operations: OpBatch<Op>,
}

pub type ChangeCallback<Op> = Box<dyn Fn(ChangeNotice<Op>) + Send + Sync>;

/// The capability set the core requires of a document model. The core treats
/// `Doc`, `Serialized`, `Op` as opaque; `DocStore` and `PushEngine` are
/// generic over any `B: DocBinding`. Implementations own whatever batching
/// discipline their underlying model needs (e.g. coalescing a yrs transaction
/// into one `on_change` notification).
pub trait DocBinding: Send + Sync + 'static {
    type Doc: Clone + Send + Sync + 'static;
    type Serialized: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Op: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Fresh document of `doc_type`, optionally at a caller-chosen id.
    /// Returns `SyncError::UnknownType` if `doc_type` is not registered.
    fn create(&self, doc_type: &str, id: Option<DocId>) -> Result<(Self::Doc, DocId), SyncError>;

    /// Round-trips a live document to its opaque serialized form.
    fn serialize(&self, doc: &Self::Doc) -> Self::Serialized;

    /// Rehydrates a serialized document back into a live handle.
    fn deserialize(
        &self,
        doc_type: &str,
        serialized: &Self::Serialized,
    ) -> Result<Self::Doc, SyncError>;

    /// Applies one batch of operations, in order, to a live document.
    fn apply_operations(&self, doc: &Self::Doc, ops: &[Self::Op]);

    /// Registers a callback invoked with the operations produced by each
    /// local commit. Implementations may invoke this any number of times
    /// over the document's life (the core itself registers exactly once,
    /// right after a document enters the cache).
    fn on_change(&self, doc: &Self::Doc, callback: ChangeCallback<Self::Op>);

    /// Releases all listeners and internal resources held for `doc`. Called
    /// exactly once, when a document's refcount drops to zero.
    fn dispose(&self, doc: Self::Doc);
}
