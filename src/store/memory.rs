use std::collections::BTreeMap;

use super::{ArrayData, DataStore, ElementType};
use crate::error::CloudError;

/// In-memory store keyed by dataset path.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    datasets: BTreeMap<String, ArrayData>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the array at `path`.
    pub fn insert(&mut self, path: impl Into<String>, data: ArrayData) {
        drop(self.datasets.insert(path.into(), data));
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, path: impl Into<String>, data: ArrayData) -> Self {
        self.insert(path, data);
        self
    }

    /// Iterate datasets in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayData)> {
        self.datasets.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of datasets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    /// Whether the store holds no datasets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

impl DataStore for MemoryStore {
    fn element_type(&self, path: &str) -> Option<ElementType> {
        self.datasets.get(path).map(ArrayData::element_type)
    }

    fn read(&self, path: &str) -> Result<ArrayData, CloudError> {
        self.datasets
            .get(path)
            .cloned()
            .ok_or_else(|| CloudError::MissingDataset(path.to_owned()))
    }
}
