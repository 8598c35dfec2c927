//! Dataset counts, gene table and 3D embedding.

use glam::{DVec3, Vec3};
use rustc_hash::FxHashMap;

use crate::error::CloudError;
use crate::matrix::MatrixShape;
use crate::store::StoreHandle;

/// Dataset path of the ordered gene names.
pub const GENE_NAMES_PATH: &str = "/var/index";
/// Dataset path of the ordered cell ids.
pub const CELL_IDS_PATH: &str = "/obs/index";
/// Dataset path of the flattened 3D embedding (x, y, z per cell).
pub const EMBEDDING_PATH: &str = "/obsm/X_umap";

/// Immutable dataset tables loaded once at open.
#[derive(Debug, Clone)]
pub struct DatasetIndex {
    gene_names: Vec<String>,
    cell_ids: Vec<String>,
    embedding: Vec<Vec3>,
    center: Vec3,
    gene_lookup: FxHashMap<String, usize>,
}

impl DatasetIndex {
    /// Read gene names, cell ids and the embedding from `store`.
    ///
    /// # Errors
    ///
    /// [`CloudError::MissingDataset`] if a table is absent,
    /// [`CloudError::Format`] if a table has the wrong type or the embedding
    /// does not hold exactly three floats per cell.
    pub fn load(store: &StoreHandle) -> Result<Self, CloudError> {
        let (genes, cells, embedding) = store.with(|s| {
            Ok((
                s.read(GENE_NAMES_PATH)?,
                s.read(CELL_IDS_PATH)?,
                s.read(EMBEDDING_PATH)?,
            ))
        })?;

        let genes_type = genes.element_type();
        let gene_names = genes.into_strings().ok_or_else(|| {
            CloudError::Format(format!(
                "{GENE_NAMES_PATH}: expected strings, found {genes_type}"
            ))
        })?;
        let cells_type = cells.element_type();
        let cell_ids = cells.into_strings().ok_or_else(|| {
            CloudError::Format(format!(
                "{CELL_IDS_PATH}: expected strings, found {cells_type}"
            ))
        })?;
        let flat = embedding.to_f32().ok_or_else(|| {
            CloudError::Format(format!(
                "{EMBEDDING_PATH}: expected floats, found {}",
                embedding.element_type()
            ))
        })?;

        let index = Self::from_parts(gene_names, cell_ids, &flat)?;
        log::info!(
            "dataset: {} genes, {} cells, embedding center {:?}",
            index.num_genes(),
            index.num_cells(),
            index.center
        );
        Ok(index)
    }

    /// Build from in-memory tables. `embedding` holds row-major triplets.
    ///
    /// # Errors
    ///
    /// [`CloudError::Format`] if `embedding.len() != 3 * cell_ids.len()`.
    pub fn from_parts(
        gene_names: Vec<String>,
        cell_ids: Vec<String>,
        embedding: &[f32],
    ) -> Result<Self, CloudError> {
        if embedding.len() != cell_ids.len() * 3 {
            return Err(CloudError::Format(format!(
                "{EMBEDDING_PATH}: {} floats for {} cells (expected {})",
                embedding.len(),
                cell_ids.len(),
                cell_ids.len() * 3
            )));
        }
        let embedding: Vec<Vec3> =
            embedding.chunks_exact(3).map(Vec3::from_slice).collect();
        let center = center_of_mass(&embedding);

        let mut gene_lookup = FxHashMap::default();
        for (i, name) in gene_names.iter().enumerate() {
            let _ = gene_lookup.entry(name.clone()).or_insert(i);
        }

        Ok(Self {
            gene_names,
            cell_ids,
            embedding,
            center,
            gene_lookup,
        })
    }

    /// Number of genes (matrix columns).
    #[must_use]
    pub fn num_genes(&self) -> usize {
        self.gene_names.len()
    }

    /// Number of cells (matrix rows, embedding points).
    #[must_use]
    pub fn num_cells(&self) -> usize {
        self.cell_ids.len()
    }

    /// Matrix shape implied by the gene and cell tables.
    #[must_use]
    pub fn shape(&self) -> MatrixShape {
        MatrixShape {
            genes: self.num_genes(),
            cells: self.num_cells(),
        }
    }

    /// Ordered gene names.
    #[must_use]
    pub fn gene_names(&self) -> &[String] {
        &self.gene_names
    }

    /// Name of one gene.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if `gene` is out of range.
    pub fn gene_name(&self, gene: usize) -> Result<&str, CloudError> {
        self.gene_names
            .get(gene)
            .map(String::as_str)
            .ok_or_else(|| CloudError::gene_index(gene, self.num_genes()))
    }

    /// Index of the first gene called `name`.
    #[must_use]
    pub fn find_gene(&self, name: &str) -> Option<usize> {
        self.gene_lookup.get(name).copied()
    }

    /// Ordered cell ids.
    #[must_use]
    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    /// Raw embedding coordinates in cell order.
    #[must_use]
    pub fn embedding(&self) -> &[Vec3] {
        &self.embedding
    }

    /// Mean of all embedding coordinates.
    #[must_use]
    pub fn center_of_mass(&self) -> Vec3 {
        self.center
    }

    /// `(coord - center) * scale` for one cell.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if `cell` is out of range.
    pub fn render_position(
        &self,
        cell: usize,
        scale: f32,
    ) -> Result<Vec3, CloudError> {
        self.embedding
            .get(cell)
            .map(|&coord| (coord - self.center) * scale)
            .ok_or_else(|| CloudError::cell_index(cell, self.num_cells()))
    }

    /// Render positions for every cell, in cell order.
    #[must_use]
    pub fn render_positions(&self, scale: f32) -> Vec<Vec3> {
        self.embedding
            .iter()
            .map(|&coord| (coord - self.center) * scale)
            .collect()
    }
}

fn center_of_mass(points: &[Vec3]) -> Vec3 {
    if points.is_empty() {
        return Vec3::ZERO;
    }
    let sum: DVec3 = points.iter().map(|p| p.as_dvec3()).sum();
    (sum / points.len() as f64).as_vec3()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ArrayData, MemoryStore};

    fn names(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[test]
    fn centers_embedding_and_scales() {
        let index = DatasetIndex::from_parts(
            names("g", 2),
            names("c", 2),
            &[0.0, 0.0, 0.0, 2.0, 4.0, 6.0],
        )
        .unwrap();
        assert_eq!(index.center_of_mass(), Vec3::new(1.0, 2.0, 3.0));
        let p = index.render_position(1, 0.5).unwrap();
        assert!((p - Vec3::new(0.5, 1.0, 1.5)).length() < 1e-6);
        assert_eq!(index.render_positions(1.0)[0], Vec3::new(-1.0, -2.0, -3.0));
        assert!(index.render_position(2, 1.0).is_err());
    }

    #[test]
    fn rejects_partial_triplets() {
        let err =
            DatasetIndex::from_parts(names("g", 1), names("c", 2), &[1.0; 5])
                .unwrap_err();
        assert!(matches!(err, CloudError::Format(_)));
    }

    #[test]
    fn loads_tables_from_store() {
        let store = StoreHandle::new(
            MemoryStore::new()
                .with(GENE_NAMES_PATH, ArrayData::Str(names("g", 3)))
                .with(CELL_IDS_PATH, ArrayData::Str(names("c", 1)))
                .with(EMBEDDING_PATH, ArrayData::F64(vec![1.0, 2.0, 3.0])),
        );
        let index = DatasetIndex::load(&store).unwrap();
        assert_eq!(index.shape(), MatrixShape { genes: 3, cells: 1 });
        assert_eq!(index.gene_name(2).unwrap(), "g2");
        assert_eq!(index.find_gene("g1"), Some(1));
        assert_eq!(index.find_gene("nope"), None);
        assert!(index.gene_name(3).is_err());
    }

    #[test]
    fn numeric_gene_table_is_format_error() {
        let store = StoreHandle::new(
            MemoryStore::new()
                .with(GENE_NAMES_PATH, ArrayData::I32(vec![1, 2]))
                .with(CELL_IDS_PATH, ArrayData::Str(Vec::new()))
                .with(EMBEDDING_PATH, ArrayData::F32(Vec::new())),
        );
        assert!(matches!(
            DatasetIndex::load(&store),
            Err(CloudError::Format(_))
        ));
    }
}
