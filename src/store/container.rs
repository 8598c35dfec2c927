//! Single-file `.cellc` container.
//!
//! A local cache format next to the zarr reader: one file, mapped once,
//! with no chunking or compression.
//!
//! Layout: `[u64 LE header length][JSON header][zero pad to 16][blobs]`.
//! Numeric datasets live in the blob region as little-endian arrays and are
//! copied out with `bytemuck`, so only little-endian hosts can open them.
//! String datasets (gene names, cell ids, category labels) are stored inline
//! in the header.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::{ArrayData, DataStore, ElementType, MemoryStore};
use crate::error::CloudError;

const FORMAT_VERSION: u32 = 1;
const HEADER_PREFIX: usize = 8;
const DATA_ALIGN: usize = 16;
const BLOB_ALIGN: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
struct ContainerHeader {
    version: u32,
    datasets: Vec<DatasetMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum DatasetMeta {
    #[serde(rename = "numeric")]
    Numeric {
        path: String,
        dtype: ElementType,
        len: u64,
        offset: u64,
        len_bytes: u64,
    },
    #[serde(rename = "strings")]
    Strings { path: String, values: Vec<String> },
}

impl DatasetMeta {
    fn path(&self) -> &str {
        match self {
            Self::Numeric { path, .. } | Self::Strings { path, .. } => path,
        }
    }

    fn element_type(&self) -> ElementType {
        match self {
            Self::Numeric { dtype, .. } => *dtype,
            Self::Strings { .. } => ElementType::String,
        }
    }
}

/// Memory-mapped, read-only `.cellc` container.
pub struct ContainerStore {
    mmap: Mmap,
    data_start: usize,
    datasets: Vec<DatasetMeta>,
    by_path: FxHashMap<String, usize>,
}

impl ContainerStore {
    /// Map `path` and parse its header.
    ///
    /// # Errors
    ///
    /// [`CloudError::Io`] if the file cannot be opened or mapped,
    /// [`CloudError::Format`] for a truncated file, an unparseable header, an
    /// unsupported format version, or a big-endian host.
    pub fn open(path: &Path) -> Result<Self, CloudError> {
        if cfg!(target_endian = "big") {
            return Err(CloudError::Format(format!(
                "{}: .cellc blobs are little-endian",
                path.display()
            )));
        }
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_PREFIX as u64 {
            return Err(CloudError::Format(format!(
                "{}: file too small ({file_len} bytes)",
                path.display()
            )));
        }
        // SAFETY: the mapping is read-only and the file is treated as
        // immutable for the lifetime of the store.
        let mmap = unsafe { Mmap::map(&file)? };

        let mut prefix = [0u8; HEADER_PREFIX];
        prefix.copy_from_slice(&mmap[..HEADER_PREFIX]);
        let json_len = usize::try_from(u64::from_le_bytes(prefix))
            .map_err(|_| CloudError::Format("header length overflow".into()))?;
        let json_end = HEADER_PREFIX
            .checked_add(json_len)
            .filter(|&end| end <= mmap.len())
            .ok_or_else(|| {
                CloudError::Format(format!(
                    "header length {json_len} exceeds file size {}",
                    mmap.len()
                ))
            })?;

        let header: ContainerHeader =
            serde_json::from_slice(&mmap[HEADER_PREFIX..json_end]).map_err(
                |e| CloudError::Format(format!("container header: {e}")),
            )?;
        if header.version != FORMAT_VERSION {
            return Err(CloudError::Format(format!(
                "unsupported container version {}",
                header.version
            )));
        }

        let data_start = json_end + padding(json_end, DATA_ALIGN);
        if data_start > mmap.len() && header_has_blobs(&header) {
            return Err(CloudError::Format("missing blob region".into()));
        }

        let by_path = header
            .datasets
            .iter()
            .enumerate()
            .map(|(i, meta)| (meta.path().to_owned(), i))
            .collect();

        log::debug!(
            "opened container {} ({} datasets, {} bytes)",
            path.display(),
            header.datasets.len(),
            mmap.len()
        );

        Ok(Self {
            mmap,
            data_start,
            datasets: header.datasets,
            by_path,
        })
    }

    fn meta(&self, path: &str) -> Option<&DatasetMeta> {
        self.by_path.get(path).map(|&i| &self.datasets[i])
    }

    fn slice_bytes(
        &self,
        path: &str,
        offset: u64,
        len: u64,
    ) -> Result<&[u8], CloudError> {
        let out_of_bounds = || {
            CloudError::Format(format!(
                "{path}: blob [{offset}, +{len}) out of bounds"
            ))
        };
        let start = usize::try_from(offset)
            .ok()
            .and_then(|o| self.data_start.checked_add(o))
            .ok_or_else(out_of_bounds)?;
        let end = usize::try_from(len)
            .ok()
            .and_then(|l| start.checked_add(l))
            .filter(|&end| end <= self.mmap.len())
            .ok_or_else(out_of_bounds)?;
        Ok(&self.mmap[start..end])
    }
}

impl DataStore for ContainerStore {
    fn element_type(&self, path: &str) -> Option<ElementType> {
        self.meta(path).map(DatasetMeta::element_type)
    }

    fn read(&self, path: &str) -> Result<ArrayData, CloudError> {
        let meta = self
            .meta(path)
            .ok_or_else(|| CloudError::MissingDataset(path.to_owned()))?;
        match meta {
            DatasetMeta::Strings { values, .. } => {
                Ok(ArrayData::Str(values.clone()))
            }
            DatasetMeta::Numeric {
                dtype,
                len,
                offset,
                len_bytes,
                ..
            } => {
                let width = dtype.width().ok_or_else(|| {
                    CloudError::Format(format!(
                        "{path}: string dtype stored as numeric blob"
                    ))
                })?;
                if len.checked_mul(width as u64) != Some(*len_bytes) {
                    return Err(CloudError::Format(format!(
                        "{path}: {len} x {dtype} does not fill {len_bytes} \
                         bytes"
                    )));
                }
                let bytes = self.slice_bytes(path, *offset, *len_bytes)?;
                Ok(decode_blob(*dtype, bytes))
            }
        }
    }
}

fn header_has_blobs(header: &ContainerHeader) -> bool {
    header.datasets.iter().any(|meta| {
        matches!(meta, DatasetMeta::Numeric { len_bytes, .. } if *len_bytes > 0)
    })
}

fn padding(pos: usize, align: usize) -> usize {
    (align - pos % align) % align
}

fn decode_blob(dtype: ElementType, bytes: &[u8]) -> ArrayData {
    match dtype {
        ElementType::Int8 => ArrayData::I8(bytemuck::pod_collect_to_vec(bytes)),
        ElementType::Int16 => ArrayData::I16(bytemuck::pod_collect_to_vec(bytes)),
        ElementType::Int32 => ArrayData::I32(bytemuck::pod_collect_to_vec(bytes)),
        ElementType::Int64 => ArrayData::I64(bytemuck::pod_collect_to_vec(bytes)),
        ElementType::Float32 => ArrayData::F32(bytemuck::pod_collect_to_vec(bytes)),
        ElementType::Float64 => ArrayData::F64(bytemuck::pod_collect_to_vec(bytes)),
        ElementType::Bool => ArrayData::Bool(bytes.iter().map(|&b| b != 0).collect()),
        // Width check in `read` rejects string blobs before decoding.
        ElementType::String => ArrayData::Str(Vec::new()),
    }
}

fn encode_blob(data: &ArrayData) -> Vec<u8> {
    match data {
        ArrayData::Str(_) => Vec::new(),
        ArrayData::I8(v) => bytemuck::cast_slice::<_, u8>(v.as_slice()).to_vec(),
        ArrayData::I16(v) => bytemuck::cast_slice::<_, u8>(v.as_slice()).to_vec(),
        ArrayData::I32(v) => bytemuck::cast_slice::<_, u8>(v.as_slice()).to_vec(),
        ArrayData::I64(v) => bytemuck::cast_slice::<_, u8>(v.as_slice()).to_vec(),
        ArrayData::F32(v) => bytemuck::cast_slice::<_, u8>(v.as_slice()).to_vec(),
        ArrayData::F64(v) => bytemuck::cast_slice::<_, u8>(v.as_slice()).to_vec(),
        ArrayData::Bool(v) => v.iter().map(|&b| u8::from(b)).collect(),
    }
}

/// Serializes a [`MemoryStore`] into the `.cellc` layout.
pub struct ContainerWriter;

impl ContainerWriter {
    /// Write every dataset of `store` to `path`, replacing any existing
    /// file.
    ///
    /// # Errors
    ///
    /// [`CloudError::Io`] on write failure, [`CloudError::Format`] if the
    /// header cannot be serialized.
    pub fn write(path: &Path, store: &MemoryStore) -> Result<(), CloudError> {
        let mut blobs: Vec<u8> = Vec::new();
        let mut datasets = Vec::with_capacity(store.len());

        for (name, data) in store.iter() {
            if let ArrayData::Str(values) = data {
                datasets.push(DatasetMeta::Strings {
                    path: name.to_owned(),
                    values: values.clone(),
                });
                continue;
            }
            blobs.resize(blobs.len() + padding(blobs.len(), BLOB_ALIGN), 0);
            let bytes = encode_blob(data);
            datasets.push(DatasetMeta::Numeric {
                path: name.to_owned(),
                dtype: data.element_type(),
                len: data.len() as u64,
                offset: blobs.len() as u64,
                len_bytes: bytes.len() as u64,
            });
            blobs.extend_from_slice(&bytes);
        }

        let header = ContainerHeader {
            version: FORMAT_VERSION,
            datasets,
        };
        let json = serde_json::to_vec(&header)
            .map_err(|e| CloudError::Format(format!("container header: {e}")))?;
        let json_end = HEADER_PREFIX + json.len();

        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&(json.len() as u64).to_le_bytes())?;
        out.write_all(&json)?;
        out.write_all(&vec![0u8; padding(json_end, DATA_ALIGN)])?;
        out.write_all(&blobs)?;
        out.flush()?;
        Ok(())
    }
}
