use std::sync::{Arc, Mutex};

use crate::domain::doc_binding::{ChangeCallback, ChangeNotice, DocBinding};
use crate::domain::errors::SyncError;
use crate::domain::ids::DocId;
use crate::domain::ops::OpBatch;

/// The reference `DocBinding` named in §4.1: a plain-text append log. Every
/// operation is a string appended to the document's content; applying ops is
/// commutative only in the trivial sense that append order is preserved, so
/// tests exercising ordering invariants (§8) get a real signal. Used by the
/// test suite and by nothing else in the core.
pub struct TextLogBinding {
    doc_type: &'static str,
}

impl TextLogBinding {
    pub const DOC_TYPE: &'static str = "text-log";

    pub fn new() -> Self {
        Self {
            doc_type: Self::DOC_TYPE,
        }
    }

    fn check_type(&self, doc_type: &str) -> Result<(), SyncError> {
        if doc_type == self.doc_type {
            Ok(())
        } else {
            Err(SyncError::UnknownType(doc_type.to_string()))
        }
    }
}

impl Default for TextLogBinding {
    fn default() -> Self {
        Self::new()
    }
}

struct TextDocInner {
    content: String,
    listeners: Vec<ChangeCallback<String>>,
}

/// A live handle onto the append log. Cheaply `Clone`, like any CRDT/live-doc
/// handle in this corpus — all clones share the same underlying buffer.
#[derive(Clone)]
pub struct TextDoc {
    inner: Arc<Mutex<TextDocInner>>,
}

impl TextDoc {
    fn new(content: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TextDocInner {
                content,
                listeners: Vec::new(),
            })),
        }
    }

    /// Appends `text` as one local commit, notifying every registered
    /// `on_change` listener with a one-operation batch.
    pub fn append(&self, text: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.content.push_str(text);
        for listener in &inner.listeners {
            listener(ChangeNotice {
                operations: OpBatch::new(vec![text.to_string()]),
            });
        }
    }

    pub fn content(&self) -> String {
        self.inner.lock().unwrap().content.clone()
    }
}

impl DocBinding for TextLogBinding {
    type Doc = TextDoc;
    type Serialized = String;
    type Op = String;

    fn create(&self, doc_type: &str, id: Option<DocId>) -> Result<(Self::Doc, DocId), SyncError> {
        self.check_type(doc_type)?;
        let id = id.unwrap_or_else(DocId::generate);
        Ok((TextDoc::new(String::new()), id))
    }

    fn serialize(&self, doc: &Self::Doc) -> Self::Serialized {
        doc.content()
    }

    fn deserialize(
        &self,
        doc_type: &str,
        serialized: &Self::Serialized,
    ) -> Result<Self::Doc, SyncError> {
        self.check_type(doc_type)?;
        Ok(TextDoc::new(serialized.clone()))
    }

    fn apply_operations(&self, doc: &Self::Doc, ops: &[Self::Op]) {
        let mut inner = doc.inner.lock().unwrap();
        for op in ops {
            inner.content.push_str(op);
        }
    }

    fn on_change(&self, doc: &Self::Doc, callback: ChangeCallback<Self::Op>) {
        doc.inner.lock().unwrap().listeners.push(callback);
    }

    fn dispose(&self, doc: Self::Doc) {
        doc.inner.lock().unwrap().listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_unregistered_doc_type() {
        let binding = TextLogBinding::new();
        let err = binding.create("other", None).unwrap_err();
        assert!(matches!(err, SyncError::UnknownType(t) if t == "other"));
    }

    #[test]
    fn serialize_deserialize_round_trips_content() {
        let binding = TextLogBinding::new();
        let (doc, _) = binding.create(TextLogBinding::DOC_TYPE, None).unwrap();
        doc.append("hello");
        let serialized = binding.serialize(&doc);
        let restored = binding.deserialize(TextLogBinding::DOC_TYPE, &serialized).unwrap();
        assert_eq!(restored.content(), "hello");
    }

    #[test]
    fn apply_operations_preserves_order() {
        let binding = TextLogBinding::new();
        let (doc, _) = binding.create(TextLogBinding::DOC_TYPE, None).unwrap();
        binding.apply_operations(&doc, &["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(doc.content(), "abc");
    }

    #[test]
    fn on_change_fires_with_appended_operation() {
        let binding = TextLogBinding::new();
        let (doc, _) = binding.create(TextLogBinding::DOC_TYPE, None).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        binding.on_change(
            &doc,
            Box::new(move |notice| {
                seen_clone.lock().unwrap().extend(notice.operations.as_slice().to_vec());
            }),
        );
        doc.append("x");
        assert_eq!(*seen.lock().unwrap(), vec!["x".to_string()]);
    }
}
