//! AnnData `.zarr` directories read through `zarrs`.
//!
//! The store exposes the logical paths the rest of the crate reads and maps
//! them onto the AnnData on-disk layout:
//!
//! - `/obs/index` and `/var/index` resolve to `/obs/_index` and
//!   `/var/_index`.
//! - `/uns/<field>_categorical` resolves to `/obs/__categories/<field>` or,
//!   for newer writers, `/obs/<field>/categories`; the codes of such a field
//!   are then read from `/obs/<field>/codes`.
//! - A CSR `/X` (the AnnData default, cells x genes) is transposed once into
//!   the CSC arrays [`SparseMatrixReader`](crate::matrix::SparseMatrixReader)
//!   expects. A `csc_matrix` group is read as is.
//!
//! Multi-dimensional arrays (embeddings) are flattened in row-major order.
//! Unsigned integer arrays are widened to the next signed type.

use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroU64;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use zarrs::array::chunk_grid::ChunkGrid;
use zarrs::array::{Array, ArrayBuilder, DataType, Element, ElementOwned, FillValue};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};
use zarrs::storage::{
    ReadableStorageTraits, ReadableWritableListableStorage,
    ReadableWritableListableStorageTraits,
};

use super::{ArrayData, DataStore, ElementType, MemoryStore};
use crate::annotations::CATEGORICAL_SUFFIX;
use crate::dataset::{CELL_IDS_PATH, GENE_NAMES_PATH};
use crate::error::CloudError;
use crate::matrix::{transpose_compressed, DATA_PATH, INDICES_PATH, INDPTR_PATH};

const OBS_INDEX: &str = "/obs/_index";
const VAR_INDEX: &str = "/var/_index";
const X_GROUP: &str = "/X";
const X_SHAPE_PATH: &str = "/X/_shape";
const MATRIX_PATHS: [&str; 3] = [DATA_PATH, INDICES_PATH, INDPTR_PATH];

fn zarr_err(path: &str, e: impl fmt::Display) -> CloudError {
    CloudError::Format(format!("{path}: zarr error: {e}"))
}

/// How `/X` is compressed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatrixLayout {
    /// Genes are the compressed axis; arrays pass through untouched.
    Csc,
    /// Cells are the compressed axis.
    Csr { cells: usize, genes: usize },
}

/// Read-only view of an AnnData `.zarr` directory.
pub struct ZarrStore {
    storage: ReadableWritableListableStorage,
    layout: MatrixLayout,
    csc: OnceLock<[ArrayData; 3]>,
}

impl ZarrStore {
    /// Open the zarr hierarchy rooted at `path`.
    ///
    /// # Errors
    ///
    /// [`CloudError::Io`] if `path` is not a directory,
    /// [`CloudError::Format`] if the store cannot be opened or `/X` declares
    /// a CSR layout without a readable shape.
    pub fn open(path: &Path) -> Result<Self, CloudError> {
        if !path.is_dir() {
            return Err(CloudError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: not a zarr directory", path.display()),
            )));
        }
        let storage: ReadableWritableListableStorage = Arc::new(
            FilesystemStore::new(path)
                .map_err(|e| zarr_err(&path.display().to_string(), e))?,
        );
        let layout = detect_layout(&storage)?;
        log::debug!("opened zarr store {} ({layout:?} X)", path.display());
        Ok(Self {
            storage,
            layout,
            csc: OnceLock::new(),
        })
    }

    fn resolve(
        &self,
        path: &str,
    ) -> Option<(String, Array<dyn ReadableWritableListableStorageTraits>)> {
        physical_candidates(path).into_iter().find_map(|candidate| {
            Array::open(self.storage.clone(), &candidate)
                .ok()
                .map(|array| (candidate, array))
        })
    }

    /// CSC arrays of a CSR `/X`, transposed on first use and kept for the
    /// remaining matrix reads.
    fn transposed(
        &self,
        cells: usize,
        genes: usize,
    ) -> Result<&[ArrayData; 3], CloudError> {
        if let Some(arrays) = self.csc.get() {
            return Ok(arrays);
        }
        let read = |path: &str| {
            let array = Array::open(self.storage.clone(), path)
                .map_err(|_| CloudError::MissingDataset(path.to_owned()))?;
            read_array(path, &array)
        };
        let data = read(DATA_PATH)?;
        let data = data.to_f64().ok_or_else(|| {
            CloudError::Format(format!(
                "{DATA_PATH}: expected numeric values, found {}",
                data.element_type()
            ))
        })?;
        let indices = read(INDICES_PATH)?.to_indices(INDICES_PATH)?;
        let indptr = read(INDPTR_PATH)?.to_indices(INDPTR_PATH)?;

        let (data, indices, indptr) =
            transpose_compressed(cells, genes, &data, &indices, &indptr)?;
        log::debug!(
            "transposed CSR X ({cells} cells x {genes} genes, {} nonzeros)",
            data.len()
        );
        let widen = |v: Vec<usize>| -> Vec<i64> { v.into_iter().map(|x| x as i64).collect() };
        let arrays = [
            ArrayData::F64(data),
            ArrayData::I64(widen(indices)),
            ArrayData::I64(widen(indptr)),
        ];
        Ok(self.csc.get_or_init(|| arrays))
    }

    fn transposed_slot(&self, path: &str) -> Option<(usize, usize, usize)> {
        let slot = MATRIX_PATHS.iter().position(|&p| p == path)?;
        match self.layout {
            MatrixLayout::Csr { cells, genes } => Some((slot, cells, genes)),
            MatrixLayout::Csc => None,
        }
    }
}

impl DataStore for ZarrStore {
    fn element_type(&self, path: &str) -> Option<ElementType> {
        if let Some((slot, _, _)) = self.transposed_slot(path) {
            return Some(if slot == 0 {
                ElementType::Float64
            } else {
                ElementType::Int64
            });
        }
        let (_, array) = self.resolve(path)?;
        element_type_of(array.data_type())
    }

    fn read(&self, path: &str) -> Result<ArrayData, CloudError> {
        if let Some((slot, cells, genes)) = self.transposed_slot(path) {
            return Ok(self.transposed(cells, genes)?[slot].clone());
        }
        let (physical, array) = self
            .resolve(path)
            .ok_or_else(|| CloudError::MissingDataset(path.to_owned()))?;
        read_array(&physical, &array)
    }
}

/// On-disk paths tried, in order, for one logical path.
fn physical_candidates(path: &str) -> Vec<String> {
    let mut out = vec![path.to_owned()];
    match path {
        CELL_IDS_PATH => out.push(OBS_INDEX.to_owned()),
        GENE_NAMES_PATH => out.push(VAR_INDEX.to_owned()),
        _ => {}
    }
    if let Some(field) = path
        .strip_prefix("/uns/")
        .and_then(|rest| rest.strip_suffix(CATEGORICAL_SUFFIX))
    {
        out.push(format!("/obs/__categories/{field}"));
        out.push(format!("/obs/{field}/categories"));
    } else if let Some(field) =
        path.strip_prefix("/obs/").filter(|f| !f.contains('/'))
    {
        out.push(format!("/obs/{field}/codes"));
    }
    out
}

/// On-disk path the writer uses for one logical path.
fn physical_path(path: &str) -> String {
    match path {
        CELL_IDS_PATH => OBS_INDEX.to_owned(),
        GENE_NAMES_PATH => VAR_INDEX.to_owned(),
        _ => path
            .strip_prefix("/uns/")
            .and_then(|rest| rest.strip_suffix(CATEGORICAL_SUFFIX))
            .map_or_else(
                || path.to_owned(),
                |field| format!("/obs/__categories/{field}"),
            ),
    }
}

fn detect_layout(
    storage: &ReadableWritableListableStorage,
) -> Result<MatrixLayout, CloudError> {
    let attributes = Group::open(storage.clone(), X_GROUP)
        .map(|group| group.attributes().clone())
        .unwrap_or_default();
    let encoding = attributes
        .get("encoding-type")
        .and_then(serde_json::Value::as_str);
    if encoding == Some("csc_matrix") {
        return Ok(MatrixLayout::Csc);
    }
    let shape = match attributes
        .get("shape")
        .and_then(|v| serde_json::from_value::<[usize; 2]>(v.clone()).ok())
    {
        Some(shape) => Some(shape),
        None => read_shape_array(storage)?,
    };
    match (encoding, shape) {
        (Some("csr_matrix") | None, Some([cells, genes])) => {
            Ok(MatrixLayout::Csr { cells, genes })
        }
        (Some("csr_matrix"), None) => Err(CloudError::Format(format!(
            "{X_GROUP}: csr_matrix without a shape"
        ))),
        _ => Ok(MatrixLayout::Csc),
    }
}

fn read_shape_array(
    storage: &ReadableWritableListableStorage,
) -> Result<Option<[usize; 2]>, CloudError> {
    let Ok(array) = Array::open(storage.clone(), X_SHAPE_PATH) else {
        return Ok(None);
    };
    let dims = read_array(X_SHAPE_PATH, &array)?.to_indices(X_SHAPE_PATH)?;
    match dims.as_slice() {
        &[cells, genes] => Ok(Some([cells, genes])),
        other => Err(CloudError::Format(format!(
            "{X_SHAPE_PATH}: expected 2 dimensions, found {}",
            other.len()
        ))),
    }
}

fn element_type_of(data_type: &DataType) -> Option<ElementType> {
    match data_type {
        DataType::String => Some(ElementType::String),
        DataType::Bool => Some(ElementType::Bool),
        DataType::Int8 => Some(ElementType::Int8),
        DataType::Int16 | DataType::UInt8 => Some(ElementType::Int16),
        DataType::Int32 | DataType::UInt16 => Some(ElementType::Int32),
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => {
            Some(ElementType::Int64)
        }
        DataType::Float32 => Some(ElementType::Float32),
        DataType::Float64 => Some(ElementType::Float64),
        _ => None,
    }
}

fn retrieve<T, S>(path: &str, array: &Array<S>) -> Result<Vec<T>, CloudError>
where
    T: ElementOwned,
    S: ?Sized + ReadableStorageTraits + 'static,
{
    array
        .retrieve_array_subset_elements::<T>(&array.subset_all())
        .map_err(|e| zarr_err(path, e))
}

fn read_array<S>(path: &str, array: &Array<S>) -> Result<ArrayData, CloudError>
where
    S: ?Sized + ReadableStorageTraits + 'static,
{
    let data = match array.data_type() {
        DataType::String => ArrayData::Str(retrieve(path, array)?),
        DataType::Bool => ArrayData::Bool(retrieve(path, array)?),
        DataType::Int8 => ArrayData::I8(retrieve(path, array)?),
        DataType::Int16 => ArrayData::I16(retrieve(path, array)?),
        DataType::Int32 => ArrayData::I32(retrieve(path, array)?),
        DataType::Int64 => ArrayData::I64(retrieve(path, array)?),
        DataType::UInt8 => ArrayData::I16(
            retrieve::<u8, _>(path, array)?
                .into_iter()
                .map(i16::from)
                .collect(),
        ),
        DataType::UInt16 => ArrayData::I32(
            retrieve::<u16, _>(path, array)?
                .into_iter()
                .map(i32::from)
                .collect(),
        ),
        DataType::UInt32 => ArrayData::I64(
            retrieve::<u32, _>(path, array)?
                .into_iter()
                .map(i64::from)
                .collect(),
        ),
        DataType::UInt64 => ArrayData::I64(
            retrieve::<u64, _>(path, array)?
                .into_iter()
                .map(|v| {
                    i64::try_from(v).map_err(|_| {
                        CloudError::Format(format!("{path}: value {v} overflows i64"))
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
        DataType::Float32 => ArrayData::F32(retrieve(path, array)?),
        DataType::Float64 => ArrayData::F64(retrieve(path, array)?),
        other => {
            return Err(CloudError::Format(format!(
                "{path}: unsupported zarr data type {other:?}"
            )))
        }
    };
    Ok(data)
}

/// Writes a [`MemoryStore`] as an AnnData `.zarr` directory: CSR `/X` with
/// `/X/_shape`, `_index` tables and `/obs/__categories` label tables.
pub struct ZarrWriter;

impl ZarrWriter {
    /// Write every dataset of `store` under the directory `path`, creating
    /// it if needed.
    ///
    /// # Errors
    ///
    /// [`CloudError::Io`] if the directory cannot be created,
    /// [`CloudError::Format`] on a zarr write failure or an inconsistent
    /// matrix, [`CloudError::MissingDataset`] if the store holds a matrix
    /// but no cell table.
    pub fn write(path: &Path, store: &MemoryStore) -> Result<(), CloudError> {
        std::fs::create_dir_all(path)?;
        let storage: ReadableWritableListableStorage = Arc::new(
            FilesystemStore::new(path)
                .map_err(|e| zarr_err(&path.display().to_string(), e))?,
        );

        let cells = store.read(CELL_IDS_PATH).ok().map(|ids| ids.len());
        let mut groups = BTreeSet::new();
        let mut written = 0usize;
        for (name, data) in store.iter() {
            if MATRIX_PATHS.contains(&name) {
                continue;
            }
            let target = physical_path(name);
            groups.extend(parent_groups(&target));
            let len = data.len() as u64;
            let shape = match cells {
                Some(n) if name.starts_with("/obsm/") && n > 0 && data.len() % n == 0 => {
                    vec![n as u64, len / n as u64]
                }
                _ => vec![len],
            };
            write_data(&storage, &target, &shape, data)?;
            written += 1;
        }

        if store.contains(INDPTR_PATH) {
            let cells = cells
                .ok_or_else(|| CloudError::MissingDataset(CELL_IDS_PATH.to_owned()))?;
            write_csr(&storage, store, cells)?;
            groups.extend(parent_groups(DATA_PATH));
            written += MATRIX_PATHS.len();
        }

        write_group(&storage, "/", serde_json::Map::new())?;
        for group in groups.iter().filter(|g| g.as_str() != X_GROUP) {
            write_group(&storage, group, serde_json::Map::new())?;
        }
        log::debug!(
            "wrote zarr store {} ({written} arrays, {} groups)",
            path.display(),
            groups.len()
        );
        Ok(())
    }
}

fn write_csr(
    storage: &ReadableWritableListableStorage,
    store: &MemoryStore,
    cells: usize,
) -> Result<(), CloudError> {
    let data = store.read(DATA_PATH)?;
    let data = data.to_f64().ok_or_else(|| {
        CloudError::Format(format!(
            "{DATA_PATH}: expected numeric values, found {}",
            data.element_type()
        ))
    })?;
    let indices = store.read(INDICES_PATH)?.to_indices(INDICES_PATH)?;
    let indptr = store.read(INDPTR_PATH)?.to_indices(INDPTR_PATH)?;
    let genes = indptr.len().saturating_sub(1);

    let (data, indices, indptr) =
        transpose_compressed(genes, cells, &data, &indices, &indptr)?;
    let to_i64 = |v: Vec<usize>| v.into_iter().map(|x| x as i64).collect::<Vec<_>>();

    let mut attributes = serde_json::Map::new();
    let _ = attributes.insert("encoding-type".into(), "csr_matrix".into());
    let _ = attributes.insert("shape".into(), serde_json::json!([cells, genes]));
    write_group(storage, X_GROUP, attributes)?;

    write_data(storage, DATA_PATH, &[data.len() as u64], &ArrayData::F64(data))?;
    let indices = to_i64(indices);
    write_data(
        storage,
        INDICES_PATH,
        &[indices.len() as u64],
        &ArrayData::I64(indices),
    )?;
    let indptr = to_i64(indptr);
    write_data(storage, INDPTR_PATH, &[indptr.len() as u64], &ArrayData::I64(indptr))?;
    write_data(
        storage,
        X_SHAPE_PATH,
        &[2],
        &ArrayData::I64(vec![cells as i64, genes as i64]),
    )
}

/// Every proper ancestor group of an array path, excluding the root.
fn parent_groups(path: &str) -> impl Iterator<Item = String> + '_ {
    path.match_indices('/')
        .skip(1)
        .map(move |(i, _)| path[..i].to_owned())
}

fn write_group(
    storage: &ReadableWritableListableStorage,
    path: &str,
    attributes: serde_json::Map<String, serde_json::Value>,
) -> Result<(), CloudError> {
    let group = GroupBuilder::new()
        .attributes(attributes)
        .build(storage.clone(), path)
        .map_err(|e| zarr_err(path, e))?;
    group.store_metadata().map_err(|e| zarr_err(path, e))
}

fn chunk_grid(shape: &[u64]) -> ChunkGrid {
    let chunks: Vec<NonZeroU64> = shape
        .iter()
        .map(|&s| NonZeroU64::new(s).unwrap_or(NonZeroU64::MIN))
        .collect();
    ChunkGrid::from(chunks)
}

fn store_elements<T: Element>(
    storage: &ReadableWritableListableStorage,
    path: &str,
    shape: &[u64],
    data_type: DataType,
    fill_value: FillValue,
    values: &[T],
) -> Result<(), CloudError> {
    let array = ArrayBuilder::new(shape.to_vec(), data_type, chunk_grid(shape), fill_value)
        .build(storage.clone(), path)
        .map_err(|e| zarr_err(path, e))?;
    array.store_metadata().map_err(|e| zarr_err(path, e))?;
    if !values.is_empty() {
        array
            .store_array_subset_elements::<T>(&array.subset_all(), values)
            .map_err(|e| zarr_err(path, e))?;
    }
    Ok(())
}

fn write_data(
    storage: &ReadableWritableListableStorage,
    path: &str,
    shape: &[u64],
    data: &ArrayData,
) -> Result<(), CloudError> {
    match data {
        ArrayData::Str(v) => store_elements(
            storage,
            path,
            shape,
            DataType::String,
            FillValue::from(""),
            v.as_slice(),
        ),
        ArrayData::I8(v) => {
            store_elements(storage, path, shape, DataType::Int8, FillValue::from(0i8), v.as_slice())
        }
        ArrayData::I16(v) => store_elements(
            storage,
            path,
            shape,
            DataType::Int16,
            FillValue::from(0i16),
            v.as_slice(),
        ),
        ArrayData::I32(v) => store_elements(
            storage,
            path,
            shape,
            DataType::Int32,
            FillValue::from(0i32),
            v.as_slice(),
        ),
        ArrayData::I64(v) => store_elements(
            storage,
            path,
            shape,
            DataType::Int64,
            FillValue::from(0i64),
            v.as_slice(),
        ),
        ArrayData::F32(v) => store_elements(
            storage,
            path,
            shape,
            DataType::Float32,
            FillValue::from(0.0f32),
            v.as_slice(),
        ),
        ArrayData::F64(v) => store_elements(
            storage,
            path,
            shape,
            DataType::Float64,
            FillValue::from(0.0f64),
            v.as_slice(),
        ),
        ArrayData::Bool(v) => store_elements(
            storage,
            path,
            shape,
            DataType::Bool,
            FillValue::from(false),
            v.as_slice(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::EMBEDDING_PATH;
    use crate::matrix::{MatrixShape, SparseMatrixReader};
    use crate::store::StoreHandle;
    use tempfile::TempDir;

    fn zarr_dir() -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cells.zarr");
        (dir, path)
    }

    fn strings(values: &[&str]) -> ArrayData {
        ArrayData::Str(values.iter().map(|&s| s.to_owned()).collect())
    }

    /// 3 genes x 4 cells, CSC in memory.
    fn sample_store() -> MemoryStore {
        MemoryStore::new()
            .with(GENE_NAMES_PATH, strings(&["Actb", "Xist", "Cd3e"]))
            .with(CELL_IDS_PATH, strings(&["c0", "c1", "c2", "c3"]))
            .with(
                EMBEDDING_PATH,
                ArrayData::F32((0..12).map(|v| v as f32).collect()),
            )
            .with(DATA_PATH, ArrayData::F32(vec![5.0, 2.0, 7.0]))
            .with(INDICES_PATH, ArrayData::I32(vec![1, 3, 0]))
            .with(INDPTR_PATH, ArrayData::I64(vec![0, 2, 2, 3]))
            .with("/obs/louvain", ArrayData::I8(vec![0, 1, -1, 1]))
            .with("/uns/louvain_categorical", strings(&["a", "b"]))
            .with("/obs/n_counts", ArrayData::F64(vec![1.5, 2.5, 3.5, 4.5]))
            .with("/obs/is_doublet", ArrayData::Bool(vec![true, false, false, true]))
    }

    #[test]
    fn written_store_reads_back_through_anndata_layout() {
        let (_dir, path) = zarr_dir();
        let memory = sample_store();
        ZarrWriter::write(&path, &memory).unwrap();

        assert!(path.join("obs/_index").is_dir());
        assert!(path.join("obs/__categories/louvain").is_dir());
        assert!(path.join("X/_shape").is_dir());

        let store = ZarrStore::open(&path).unwrap();
        assert_eq!(store.layout, MatrixLayout::Csr { cells: 4, genes: 3 });
        for (name, data) in memory.iter() {
            if MATRIX_PATHS.contains(&name) {
                continue;
            }
            assert_eq!(&store.read(name).unwrap(), data, "{name}");
            assert_eq!(store.element_type(name), Some(data.element_type()));
        }

        let handle = StoreHandle::new(store);
        let matrix =
            SparseMatrixReader::open(&handle, MatrixShape { genes: 3, cells: 4 })
                .unwrap();
        assert_eq!(matrix.read_column(0).unwrap(), vec![0.0, 5.0, 0.0, 2.0]);
        assert_eq!(matrix.read_column(1).unwrap(), vec![0.0; 4]);
        assert_eq!(matrix.read_column(2).unwrap(), vec![7.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn reads_csc_matrix_and_nested_categoricals() {
        let (_dir, path) = zarr_dir();
        std::fs::create_dir_all(&path).unwrap();
        let storage: ReadableWritableListableStorage =
            Arc::new(FilesystemStore::new(&path).unwrap());
        let mut attributes = serde_json::Map::new();
        let _ = attributes.insert("encoding-type".into(), "csc_matrix".into());
        write_group(&storage, "/", serde_json::Map::new()).unwrap();
        write_group(&storage, "/obs", serde_json::Map::new()).unwrap();
        write_group(&storage, "/obs/cell_type", serde_json::Map::new()).unwrap();
        write_group(&storage, X_GROUP, attributes).unwrap();
        write_data(&storage, "/obs/cell_type/codes", &[3], &ArrayData::I8(vec![1, 0, 1]))
            .unwrap();
        write_data(&storage, "/obs/cell_type/categories", &[2], &strings(&["B", "T"]))
            .unwrap();
        store_elements(
            &storage,
            "/obs/n_genes",
            &[3],
            DataType::UInt16,
            FillValue::from(0u16),
            &[10u16, 20, 65_535],
        )
        .unwrap();
        write_data(
            &storage,
            EMBEDDING_PATH,
            &[2, 3],
            &ArrayData::F32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        )
        .unwrap();
        write_data(&storage, INDPTR_PATH, &[3], &ArrayData::I32(vec![0, 1, 1])).unwrap();

        let store = ZarrStore::open(&path).unwrap();
        assert_eq!(store.layout, MatrixLayout::Csc);
        assert_eq!(store.read("/obs/cell_type").unwrap(), ArrayData::I8(vec![1, 0, 1]));
        assert_eq!(
            store.read("/uns/cell_type_categorical").unwrap(),
            strings(&["B", "T"])
        );
        assert_eq!(store.element_type("/obs/n_genes"), Some(ElementType::Int32));
        assert_eq!(
            store.read("/obs/n_genes").unwrap(),
            ArrayData::I32(vec![10, 20, 65_535])
        );
        assert_eq!(
            store.read(EMBEDDING_PATH).unwrap(),
            ArrayData::F32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
        );
        assert_eq!(store.read(INDPTR_PATH).unwrap(), ArrayData::I32(vec![0, 1, 1]));
    }

    #[test]
    fn absent_paths_and_directories() {
        let (_dir, path) = zarr_dir();
        assert!(matches!(ZarrStore::open(&path), Err(CloudError::Io(_))));

        ZarrWriter::write(&path, &MemoryStore::new().with("/obs/sex", ArrayData::I8(vec![0])))
            .unwrap();
        let store = ZarrStore::open(&path).unwrap();
        assert!(store.contains("/obs/sex"));
        assert!(!store.contains("/obs/age"));
        assert!(matches!(store.read("/obs/age"), Err(CloudError::MissingDataset(_))));
    }

    #[test]
    fn handle_opens_directories_as_zarr() {
        let (_dir, path) = zarr_dir();
        ZarrWriter::write(&path, &sample_store()).unwrap();
        let handle = StoreHandle::open(&path).unwrap();
        assert_eq!(
            handle.read(GENE_NAMES_PATH).unwrap(),
            strings(&["Actb", "Xist", "Cd3e"])
        );
    }

    #[test]
    fn csr_without_shape_is_format_error() {
        let (_dir, path) = zarr_dir();
        std::fs::create_dir_all(&path).unwrap();
        let storage: ReadableWritableListableStorage =
            Arc::new(FilesystemStore::new(&path).unwrap());
        let mut attributes = serde_json::Map::new();
        let _ = attributes.insert("encoding-type".into(), "csr_matrix".into());
        write_group(&storage, X_GROUP, attributes).unwrap();
        assert!(matches!(ZarrStore::open(&path), Err(CloudError::Format(_))));
    }

    #[test]
    fn logical_paths_map_to_anndata_paths() {
        assert_eq!(physical_path(CELL_IDS_PATH), OBS_INDEX);
        assert_eq!(physical_path("/uns/sex_categorical"), "/obs/__categories/sex");
        assert_eq!(physical_path("/obs/sex"), "/obs/sex");
        assert_eq!(
            physical_candidates("/obs/sex"),
            vec!["/obs/sex".to_owned(), "/obs/sex/codes".to_owned()]
        );
        assert_eq!(physical_candidates("/obsm/X_umap"), vec!["/obsm/X_umap".to_owned()]);
        let groups: Vec<_> = parent_groups("/obs/__categories/sex").collect();
        assert_eq!(groups, vec!["/obs".to_owned(), "/obs/__categories".to_owned()]);
    }
}
