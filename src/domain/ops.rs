use serde::{Deserialize, Serialize};

/// One committed group of operations from a single local edit. The core
/// never inspects the contents of `O`; it only orders and flattens batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpBatch<O>(pub Vec<O>);

impl<O> OpBatch<O> {
    pub fn new(ops: Vec<O>) -> Self {
        Self(ops)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[O] {
        &self.0
    }
}

/// Flattens a sequence of batches (read from the op log in insertion order)
/// into one ordered op list, the shape `DocBinding::apply_operations` expects.
pub fn flatten<O: Clone>(batches: &[OpBatch<O>]) -> Vec<O> {
    batches.iter().flat_map(|b| b.0.iter().cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_preserves_batch_and_intra_batch_order() {
        let batches = vec![OpBatch::new(vec![1, 2]), OpBatch::new(vec![3])];
        assert_eq!(flatten(&batches), vec![1, 2, 3]);
    }

    #[test]
    fn flatten_empty_batches_is_empty() {
        let batches: Vec<OpBatch<i32>> = vec![OpBatch::new(vec![]), OpBatch::new(vec![])];
        assert!(flatten(&batches).is_empty());
    }
}
