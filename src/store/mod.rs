//! Read-only, path-addressed typed array storage.
//!
//! Datasets follow the single-cell standard layout (`/X/data`, `/var/index`,
//! `/obs/<field>`, `/uns/<field>_categorical`, `/obsm/X_umap`). Three
//! backends exist: [`ZarrStore`] for AnnData `.zarr` directories,
//! [`ContainerStore`] for memory-mapped `.cellc` cache files, and
//! [`MemoryStore`] for in-process construction and tests.
//!
//! Every reader goes through a [`StoreHandle`], the one access guard shared
//! by all consumers of a store.

mod container;
mod memory;
mod zarr;

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use container::{ContainerStore, ContainerWriter};
pub use memory::MemoryStore;
pub use zarr::{ZarrStore, ZarrWriter};
use serde::{Deserialize, Serialize};

use crate::error::CloudError;

/// Element type of a stored array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    /// UTF-8 strings.
    String,
    /// Signed 8-bit integers (categorical codes).
    Int8,
    /// Signed 16-bit integers.
    Int16,
    /// Signed 32-bit integers.
    Int32,
    /// Signed 64-bit integers.
    Int64,
    /// 32-bit floats.
    Float32,
    /// 64-bit floats.
    Float64,
    /// Booleans (one byte each on disk).
    Bool,
}

impl ElementType {
    /// Width in bytes of one element in a little-endian blob. Strings have no
    /// fixed width.
    #[must_use]
    pub fn width(self) -> Option<usize> {
        match self {
            Self::String => None,
            Self::Int8 | Self::Bool => Some(1),
            Self::Int16 => Some(2),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A fully materialized one-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// String values.
    Str(Vec<String>),
    /// 8-bit integer values.
    I8(Vec<i8>),
    /// 16-bit integer values.
    I16(Vec<i16>),
    /// 32-bit integer values.
    I32(Vec<i32>),
    /// 64-bit integer values.
    I64(Vec<i64>),
    /// 32-bit float values.
    F32(Vec<f32>),
    /// 64-bit float values.
    F64(Vec<f64>),
    /// Boolean values.
    Bool(Vec<bool>),
}

impl ArrayData {
    /// Element type of this array.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Str(_) => ElementType::String,
            Self::I8(_) => ElementType::Int8,
            Self::I16(_) => ElementType::Int16,
            Self::I32(_) => ElementType::Int32,
            Self::I64(_) => ElementType::Int64,
            Self::F32(_) => ElementType::Float32,
            Self::F64(_) => ElementType::Float64,
            Self::Bool(_) => ElementType::Bool,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Str(v) => v.len(),
            Self::I8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    /// Whether the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer view, widened to `i64`. `None` for strings and floats.
    #[must_use]
    pub fn to_i64(&self) -> Option<Vec<i64>> {
        match self {
            Self::I8(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            Self::I16(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            Self::I32(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            Self::I64(v) => Some(v.clone()),
            Self::Bool(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            Self::Str(_) | Self::F32(_) | Self::F64(_) => None,
        }
    }

    /// Numeric view, widened to `f64`. `None` for strings.
    #[must_use]
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            Self::F32(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            Self::F64(v) => Some(v.clone()),
            Self::Str(_) => None,
            other => other
                .to_i64()
                .map(|v| v.into_iter().map(|x| x as f64).collect()),
        }
    }

    /// Numeric view narrowed to `f32`. `None` for strings.
    #[must_use]
    pub fn to_f32(&self) -> Option<Vec<f32>> {
        match self {
            Self::F32(v) => Some(v.clone()),
            other => other
                .to_f64()
                .map(|v| v.into_iter().map(|x| x as f32).collect()),
        }
    }

    /// Non-negative integer view for index arrays (`indices`, `indptr`).
    ///
    /// # Errors
    ///
    /// [`CloudError::Format`] if the array is not integer-typed or holds a
    /// negative value.
    pub fn to_indices(&self, path: &str) -> Result<Vec<usize>, CloudError> {
        let values = self.to_i64().ok_or_else(|| {
            CloudError::Format(format!(
                "{path}: expected integer indices, found {}",
                self.element_type()
            ))
        })?;
        values
            .into_iter()
            .map(|v| {
                usize::try_from(v).map_err(|_| {
                    CloudError::Format(format!("{path}: negative index {v}"))
                })
            })
            .collect()
    }

    /// String view. `None` for non-string arrays.
    #[must_use]
    pub fn into_strings(self) -> Option<Vec<String>> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// A read-only source of typed arrays addressed by slash-separated paths.
pub trait DataStore {
    /// Element type stored at `path`, or `None` when the path is absent.
    fn element_type(&self, path: &str) -> Option<ElementType>;

    /// Read the full array stored at `path`.
    ///
    /// # Errors
    ///
    /// [`CloudError::MissingDataset`] when the path is absent, or
    /// [`CloudError::Format`] when the stored bytes cannot be decoded.
    fn read(&self, path: &str) -> Result<ArrayData, CloudError>;

    /// Whether `path` names a dataset in this store.
    fn contains(&self, path: &str) -> bool {
        self.element_type(path).is_some()
    }
}

/// Shared access guard around one open store.
///
/// Random-access reads on a single backend are not assumed thread-safe, so
/// every reader serializes on the inner mutex.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<Box<dyn DataStore + Send>>>,
}

impl StoreHandle {
    /// Wrap a store behind the access guard.
    pub fn new(store: impl DataStore + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    /// Open a dataset on disk: a directory is read as an AnnData zarr
    /// store, a file as a `.cellc` container.
    ///
    /// # Errors
    ///
    /// Propagates I/O and format errors from [`ZarrStore::open`] or
    /// [`ContainerStore::open`].
    pub fn open(path: &Path) -> Result<Self, CloudError> {
        if path.is_dir() {
            Ok(Self::new(ZarrStore::open(path)?))
        } else {
            Ok(Self::new(ContainerStore::open(path)?))
        }
    }

    /// Run `f` with exclusive access to the store.
    ///
    /// # Errors
    ///
    /// [`CloudError::StorePoisoned`] if a previous reader panicked while
    /// holding the guard, otherwise whatever `f` returns.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&dyn DataStore) -> Result<R, CloudError>,
    ) -> Result<R, CloudError> {
        let guard = self.inner.lock().map_err(|_| CloudError::StorePoisoned)?;
        f(guard.as_ref())
    }

    /// Read one array under the guard.
    ///
    /// # Errors
    ///
    /// See [`DataStore::read`].
    pub fn read(&self, path: &str) -> Result<ArrayData, CloudError> {
        self.with(|store| store.read(path))
    }

    /// Presence check under the guard.
    ///
    /// # Errors
    ///
    /// [`CloudError::StorePoisoned`] only.
    pub fn element_type(
        &self,
        path: &str,
    ) -> Result<Option<ElementType>, CloudError> {
        self.with(|store| Ok(store.element_type(path)))
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_views_widen() {
        let a = ArrayData::I8(vec![-1, 0, 3]);
        assert_eq!(a.to_i64(), Some(vec![-1, 0, 3]));
        assert_eq!(a.to_f64(), Some(vec![-1.0, 0.0, 3.0]));
        assert_eq!(ArrayData::Bool(vec![true, false]).to_f32(), Some(vec![1.0, 0.0]));
        assert!(ArrayData::Str(vec!["a".to_owned()]).to_f64().is_none());
    }

    #[test]
    fn negative_index_is_format_error() {
        let a = ArrayData::I32(vec![0, -2]);
        assert!(matches!(a.to_indices("/X/indices"), Err(CloudError::Format(_))));
        let f = ArrayData::F32(vec![0.0]);
        assert!(matches!(f.to_indices("/X/indptr"), Err(CloudError::Format(_))));
    }

    #[test]
    fn handle_serializes_access() {
        let mut mem = MemoryStore::new();
        mem.insert("/var/index", ArrayData::Str(vec!["g0".to_owned()]));
        let handle = StoreHandle::new(mem);
        let clone = handle.clone();
        let t = std::thread::spawn(move || clone.read("/var/index"));
        let local = handle.read("/var/index").unwrap();
        let remote = t.join().unwrap().unwrap();
        assert_eq!(local, remote);
        assert_eq!(handle.element_type("/nope").unwrap(), None);
    }
}
