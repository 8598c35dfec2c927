//! Compressed-sparse-column expression matrix.
//!
//! Columns are genes, rows are cells. The three CSC arrays are loaded fully
//! into memory at open; densifying one gene costs time proportional to that
//! gene's nonzero count.

use crate::error::CloudError;
use crate::store::StoreHandle;

/// Dataset path of the nonzero values.
pub const DATA_PATH: &str = "/X/data";
/// Dataset path of the row index for each nonzero value.
pub const INDICES_PATH: &str = "/X/indices";
/// Dataset path of the per-column offsets into `data`/`indices`.
pub const INDPTR_PATH: &str = "/X/indptr";

/// Matrix dimensions taken from the gene and cell tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixShape {
    /// Number of columns (genes).
    pub genes: usize,
    /// Number of rows (cells).
    pub cells: usize,
}

/// In-memory CSC matrix with per-gene density precomputed at load.
#[derive(Debug, Clone)]
pub struct SparseMatrixReader {
    shape: MatrixShape,
    data: Vec<f32>,
    indices: Vec<u32>,
    indptr: Vec<usize>,
    density: Vec<f32>,
}

impl SparseMatrixReader {
    /// Load `/X/data`, `/X/indices` and `/X/indptr` from `store`.
    ///
    /// # Errors
    ///
    /// [`CloudError::MissingDataset`] if any array is absent,
    /// [`CloudError::Format`] if the arrays are inconsistent with `shape`
    /// (see [`from_parts`](Self::from_parts)).
    pub fn open(
        store: &StoreHandle,
        shape: MatrixShape,
    ) -> Result<Self, CloudError> {
        let (data, indices, indptr) = store.with(|s| {
            Ok((s.read(DATA_PATH)?, s.read(INDICES_PATH)?, s.read(INDPTR_PATH)?))
        })?;

        let data = data.to_f32().ok_or_else(|| {
            CloudError::Format(format!(
                "{DATA_PATH}: expected numeric values, found {}",
                data.element_type()
            ))
        })?;
        let indices = indices.to_indices(INDICES_PATH)?;
        let indptr = indptr.to_indices(INDPTR_PATH)?;

        let reader = Self::from_parts(shape, data, indices, indptr)?;
        log::info!(
            "loaded CSC matrix: {} genes x {} cells, {} nonzeros",
            shape.genes,
            shape.cells,
            reader.data.len()
        );
        Ok(reader)
    }

    /// Build from raw CSC arrays, validating structure.
    ///
    /// # Errors
    ///
    /// [`CloudError::Format`] when `indptr.len() != genes + 1`, when
    /// `data` and `indices` lengths disagree, when `indptr` is not
    /// monotonic or does not end at `data.len()`, or when a row index is
    /// outside `0..cells`.
    pub fn from_parts(
        shape: MatrixShape,
        data: Vec<f32>,
        indices: Vec<usize>,
        indptr: Vec<usize>,
    ) -> Result<Self, CloudError> {
        check_compressed(shape.genes, shape.cells, data.len(), &indices, &indptr)?;
        let indices = indices
            .into_iter()
            .map(|row| {
                u32::try_from(row).map_err(|_| {
                    CloudError::Format(format!("{INDICES_PATH}: row {row} too large"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let density = indptr
            .windows(2)
            .map(|w| {
                if shape.cells == 0 {
                    0.0
                } else {
                    (w[1] - w[0]) as f32 / shape.cells as f32
                }
            })
            .collect();

        Ok(Self {
            shape,
            data,
            indices,
            indptr,
            density,
        })
    }

    /// Matrix dimensions.
    #[must_use]
    pub fn shape(&self) -> MatrixShape {
        self.shape
    }

    /// Total stored nonzeros.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    fn column_range(
        &self,
        gene: usize,
    ) -> Result<std::ops::Range<usize>, CloudError> {
        if gene >= self.shape.genes {
            return Err(CloudError::gene_index(gene, self.shape.genes));
        }
        Ok(self.indptr[gene]..self.indptr[gene + 1])
    }

    /// Dense expression vector of length `cells` for one gene. Cells with no
    /// stored value are exactly `0.0`.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if `gene` is outside `0..genes`.
    pub fn read_column(&self, gene: usize) -> Result<Vec<f32>, CloudError> {
        let range = self.column_range(gene)?;
        let mut out = vec![0.0f32; self.shape.cells];
        for (&row, &value) in
            self.indices[range.clone()].iter().zip(&self.data[range])
        {
            out[row as usize] = value;
        }
        Ok(out)
    }

    /// Number of stored entries in one gene column.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if `gene` is outside `0..genes`.
    pub fn column_nnz(&self, gene: usize) -> Result<usize, CloudError> {
        self.column_range(gene).map(|r| r.len())
    }

    /// Fraction of cells with a stored value for `gene`.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if `gene` is outside `0..genes`.
    pub fn density_ratio(&self, gene: usize) -> Result<f32, CloudError> {
        self.density
            .get(gene)
            .copied()
            .ok_or_else(|| CloudError::gene_index(gene, self.shape.genes))
    }

    /// Density ratios for every gene, in gene order.
    #[must_use]
    pub fn density_ratios(&self) -> &[f32] {
        &self.density
    }

    /// Genes whose density ratio exceeds `threshold`, ascending.
    #[must_use]
    pub fn informative_genes(&self, threshold: f32) -> Vec<usize> {
        self.density
            .iter()
            .enumerate()
            .filter(|(_, &ratio)| ratio > threshold)
            .map(|(g, _)| g)
            .collect()
    }
}

/// Validate one compressed-sparse layout: `major + 1` monotonic offsets
/// starting at 0 and ending at `nnz`, and every minor index below `minor`.
fn check_compressed(
    major: usize,
    minor: usize,
    nnz: usize,
    indices: &[usize],
    indptr: &[usize],
) -> Result<(), CloudError> {
    if indptr.len() != major + 1 {
        return Err(CloudError::Format(format!(
            "{INDPTR_PATH}: length {} but {major} columns require {}",
            indptr.len(),
            major + 1
        )));
    }
    if nnz != indices.len() {
        return Err(CloudError::Format(format!(
            "{DATA_PATH} has {nnz} values but {INDICES_PATH} has {}",
            indices.len()
        )));
    }
    if let Some(g) = indptr.windows(2).position(|w| w[1] < w[0]) {
        return Err(CloudError::Format(format!(
            "{INDPTR_PATH}: decreasing at column {g} ({} > {})",
            indptr[g],
            indptr[g + 1]
        )));
    }
    let first = indptr.first().copied().unwrap_or(0);
    let last = indptr.last().copied().unwrap_or(0);
    if last != nnz || first != 0 {
        return Err(CloudError::Format(format!(
            "{INDPTR_PATH}: spans [{first}, {last}) but {nnz} values are stored"
        )));
    }
    if let Some(&row) = indices.iter().find(|&&row| row >= minor) {
        return Err(CloudError::Format(format!(
            "{INDICES_PATH}: index {row} outside {minor} rows"
        )));
    }
    Ok(())
}

/// Transpose a compressed-sparse matrix between row and column major.
///
/// `indptr` has `major + 1` offsets and `indices` hold minor positions; the
/// result has `minor + 1` offsets and major positions, with entries of each
/// output line in ascending order. A CSR cells x genes matrix becomes the
/// CSC layout [`SparseMatrixReader`] expects, and back.
///
/// # Errors
///
/// [`CloudError::Format`] if the input layout is inconsistent.
pub fn transpose_compressed<T: Copy + Default>(
    major: usize,
    minor: usize,
    data: &[T],
    indices: &[usize],
    indptr: &[usize],
) -> Result<(Vec<T>, Vec<usize>, Vec<usize>), CloudError> {
    check_compressed(major, minor, data.len(), indices, indptr)?;

    let mut out_ptr = vec![0usize; minor + 1];
    for &m in indices {
        out_ptr[m + 1] += 1;
    }
    let mut running = 0;
    for p in out_ptr.iter_mut().skip(1) {
        running += *p;
        *p = running;
    }

    let mut next = out_ptr.clone();
    let mut out_data = vec![T::default(); data.len()];
    let mut out_indices = vec![0usize; data.len()];
    for (line, span) in indptr.windows(2).enumerate() {
        let range = span[0]..span[1];
        for (&m, &value) in indices[range.clone()].iter().zip(&data[range]) {
            let slot = &mut next[m];
            out_data[*slot] = value;
            out_indices[*slot] = line;
            *slot += 1;
        }
    }
    Ok((out_data, out_indices, out_ptr))
}
