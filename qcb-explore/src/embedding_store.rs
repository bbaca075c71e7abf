//! Embedding storage keyed by code id
//!
//! Pure data: no normalization, no deduplication. Every stored vector has the
//! configured dimension and only finite components.

use crate::error::{CodebookError, CodebookResult};
use crate::types::CodeId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingStore {
    dimension: usize,
    vectors: BTreeMap<CodeId, Vec<f32>>,
}

impl EmbeddingStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: BTreeMap::new(),
        }
    }

    /// Fails with `DimensionMismatch` on a wrong length and `Validation`
    /// when a component is NaN or infinite
    pub fn check_vector(&self, vector: &[f32]) -> CodebookResult<()> {
        if vector.len() != self.dimension {
            return Err(CodebookError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
            return Err(CodebookError::Validation(format!(
                "Embedding component {} is not finite",
                position
            )));
        }
        Ok(())
    }

    /// Insert or replace the vector for a code
    pub fn upsert(&mut self, code_id: CodeId, vector: Vec<f32>) -> CodebookResult<()> {
        self.check_vector(&vector)?;
        self.vectors.insert(code_id, vector);
        Ok(())
    }

    pub fn remove(&mut self, code_id: CodeId) -> Option<Vec<f32>> {
        self.vectors.remove(&code_id)
    }

    pub fn get(&self, code_id: CodeId) -> Option<&[f32]> {
        self.vectors.get(&code_id).map(Vec::as_slice)
    }

    /// All stored vectors in ascending id order
    pub fn all(&self) -> impl Iterator<Item = (CodeId, &[f32])> + '_ {
        self.vectors.iter().map(|(id, v)| (*id, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
