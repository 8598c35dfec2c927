//! Top-level point cloud: dataset, encoding, batches and reload wired
//! together.
//!
//! [`PointCloud`] is owned by the render/update context. Only that context
//! touches batches and instance colors; the reload worker hands finished
//! expression sets over through the [`RefreshController`], and
//! [`PointCloud::update`] installs them once per frame.

use std::path::Path;
use std::sync::Arc;

use glam::{DVec3, Vec3};
use rustc_hash::FxHashMap;

use crate::annotations::AnnotationCatalog;
use crate::batch::{Batch, BatchPartitioner, InstanceRecord};
use crate::dataset::DatasetIndex;
use crate::encoding::{
    EncodingMode, EncodingPipeline, ExpressionSource, GeneExpressionFetcher,
    LegendEntry, NormalizedAnnotation,
};
use crate::error::CloudError;
use crate::matrix::SparseMatrixReader;
use crate::options::Options;
use crate::refresh::{RefreshController, RefreshState};
use crate::store::StoreHandle;

/// Gene label text shown while a reload is in flight.
pub const FETCHING_LABEL: &str = "fetching...";

/// Text label anchored at the centroid of one category.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryLabel {
    /// Category code.
    pub code: i64,
    /// Label text from the category table.
    pub text: String,
    /// Mean render position of the category's cells.
    pub position: Vec3,
    /// Categorical color at `code / table_len`.
    pub color: [f32; 4],
}

/// A single-cell dataset laid out as batched, colored point instances.
pub struct PointCloud {
    options: Options,
    index: Arc<DatasetIndex>,
    matrix: Arc<SparseMatrixReader>,
    pipeline: EncodingPipeline,
    refresh: RefreshController,
    batches: BatchPartitioner,
    seen_generation: u64,
}

impl PointCloud {
    /// Open a dataset on disk: an AnnData `.zarr` directory or a `.cellc`
    /// container file.
    ///
    /// # Errors
    ///
    /// See [`StoreHandle::open`] and [`from_store`](Self::from_store).
    pub fn open(path: &Path, options: Options) -> Result<Self, CloudError> {
        Self::from_store(&StoreHandle::open(path)?, options)
    }

    /// Load everything from `store`, fetch the initial gene selection and run
    /// one full encode pass.
    ///
    /// # Errors
    ///
    /// [`CloudError::InvalidOption`] for out-of-range options,
    /// [`CloudError::Format`] / [`CloudError::MissingDataset`] for a
    /// malformed dataset, [`CloudError::Index`] for an initial gene outside
    /// the dataset, [`CloudError::ThreadSpawn`] if the reload worker cannot
    /// start.
    pub fn from_store(
        store: &StoreHandle,
        options: Options,
    ) -> Result<Self, CloudError> {
        options.validate()?;

        let index = Arc::new(DatasetIndex::load(store)?);
        let matrix = Arc::new(SparseMatrixReader::open(store, index.shape())?);
        let fetcher = Arc::new(GeneExpressionFetcher::new(
            Arc::clone(&matrix),
            Arc::clone(&index),
            options.data.gene_sample_size,
            options.data.seed,
        ));
        Self::assemble(store, options, index, matrix, fetcher)
    }

    /// Like [`from_store`](Self::from_store), but expression for the initial
    /// selection and every reload comes from `source` instead of the
    /// store's own matrix.
    ///
    /// # Errors
    ///
    /// See [`from_store`](Self::from_store).
    pub fn with_source(
        store: &StoreHandle,
        options: Options,
        source: Arc<dyn ExpressionSource>,
    ) -> Result<Self, CloudError> {
        options.validate()?;

        let index = Arc::new(DatasetIndex::load(store)?);
        let matrix = Arc::new(SparseMatrixReader::open(store, index.shape())?);
        Self::assemble(store, options, index, matrix, source)
    }

    fn assemble(
        store: &StoreHandle,
        options: Options,
        index: Arc<DatasetIndex>,
        matrix: Arc<SparseMatrixReader>,
        source: Arc<dyn ExpressionSource>,
    ) -> Result<Self, CloudError> {
        let annotations = load_annotations(store, &options, index.num_cells())?;
        let initial = Arc::new(source.fetch(options.data.genes.clone())?);
        let refresh =
            RefreshController::new(Arc::clone(&source), Arc::clone(&initial))?;
        let pipeline =
            EncodingPipeline::new(source, annotations, initial, &options.colors);

        let mut batches = BatchPartitioner::new(options.layout.batch_size);
        let positions = index.render_positions(options.layout.position_scale);
        for (cell, position) in positions.into_iter().enumerate() {
            let codes = pipeline
                .annotations()
                .iter()
                .map(|a| a.raw().get(cell).copied().unwrap_or(f64::NAN))
                .collect();
            let _ = batches.push(InstanceRecord::new(cell, position, codes));
        }

        log::info!(
            "point cloud: {} cells in {} batches, {} annotations, genes {:?}",
            batches.len(),
            batches.batches().len(),
            pipeline.annotations().len(),
            pipeline.expression().names()
        );

        let mut cloud = Self {
            options,
            index,
            matrix,
            pipeline,
            refresh,
            batches,
            seen_generation: 0,
        };
        cloud.reencode();
        Ok(cloud)
    }

    /// Per-frame step: install a newly reloaded expression set. Returns
    /// whether instance colors changed. A failed reload installs nothing and
    /// leaves [`RefreshState::Failed`] in place until
    /// [`acknowledge_failure`](Self::acknowledge_failure).
    pub fn update(&mut self) -> bool {
        let Some((generation, set)) = self.refresh.poll(self.seen_generation)
        else {
            return false;
        };
        self.seen_generation = generation;
        self.pipeline.install_expression(set);
        self.reencode();
        true
    }

    /// Recolor every instance and bump every batch's update counter once.
    pub fn reencode(&mut self) {
        let pipeline = &self.pipeline;
        for batch in self.batches.batches_mut() {
            for record in batch.instances_mut() {
                record.color = pipeline.encode(record.cell, record.selected);
            }
            batch.mark_updated();
        }
    }

    /// Queue a reload of `selection` (empty = random sample).
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if a gene is out of range.
    pub fn trigger_reload(&self, selection: Vec<usize>) -> Result<(), CloudError> {
        self.refresh.trigger_reload(selection)
    }

    /// Reload controller, for state queries and [`RefreshController::wait_idle`].
    #[must_use]
    pub fn refresh(&self) -> &RefreshController {
        &self.refresh
    }

    /// Current reload state.
    #[must_use]
    pub fn refresh_state(&self) -> RefreshState {
        self.refresh.state()
    }

    /// Take the most recent reload failure message, clearing
    /// [`RefreshState::Failed`] back to idle.
    pub fn acknowledge_failure(&self) -> Option<String> {
        self.refresh.acknowledge_failure()
    }

    /// Highlight one cell.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if `cell` is out of range.
    pub fn select_cell(&mut self, cell: usize) -> Result<(), CloudError> {
        let highlight = self.pipeline.highlight();
        self.update_record(cell, |record| {
            record.selected = true;
            record.color = highlight;
        })
    }

    /// Show or hide one cell.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if `cell` is out of range.
    pub fn set_visible(&mut self, cell: usize, visible: bool) -> Result<(), CloudError> {
        self.update_record(cell, |record| record.visible = visible)
    }

    /// Clear every selection, show every cell, and recolor.
    pub fn reset_selection(&mut self) {
        for batch in self.batches.batches_mut() {
            for record in batch.instances_mut() {
                record.selected = false;
                record.visible = true;
            }
        }
        self.reencode();
    }

    fn update_record(
        &mut self,
        cell: usize,
        f: impl FnOnce(&mut InstanceRecord),
    ) -> Result<(), CloudError> {
        let len = self.batches.len();
        let (batch, _) = self.batches.assign(cell);
        let record = self
            .batches
            .record_mut(cell)
            .ok_or_else(|| CloudError::cell_index(cell, len))?;
        f(record);
        if let Some(batch) = self.batches.batches_mut().get_mut(batch) {
            batch.mark_dirty();
        }
        Ok(())
    }

    /// Switch between annotation and expression coloring.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if the requested source has nothing loaded.
    pub fn set_mode(&mut self, mode: EncodingMode) -> Result<(), CloudError> {
        self.pipeline.set_mode(mode)?;
        self.reencode();
        Ok(())
    }

    /// Color by the next gene of the installed set.
    pub fn next_gene(&mut self) {
        self.pipeline.next_gene();
        self.reencode();
    }

    /// Color by the previous gene of the installed set.
    pub fn previous_gene(&mut self) {
        self.pipeline.previous_gene();
        self.reencode();
    }

    /// Color by the next loaded annotation.
    pub fn next_annotation(&mut self) {
        self.pipeline.next_annotation();
        self.reencode();
    }

    /// Color by the previous loaded annotation.
    pub fn previous_annotation(&mut self) {
        self.pipeline.previous_annotation();
        self.reencode();
    }

    /// `"fetching..."` while a reload is in flight, otherwise
    /// `"Gene: <name>"` for the active gene.
    #[must_use]
    pub fn gene_label(&self) -> String {
        if self.refresh.is_loading() {
            return FETCHING_LABEL.to_owned();
        }
        format!("Gene: {}", self.pipeline.active_gene_name().unwrap_or_default())
    }

    /// One label per populated category of `annotation`, ordered by code.
    /// Empty when the annotation has no category table.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if `annotation` is not loaded.
    pub fn category_labels(
        &self,
        annotation: usize,
    ) -> Result<Vec<CategoryLabel>, CloudError> {
        let loaded = self.pipeline.annotations();
        let field = loaded.get(annotation).ok_or(CloudError::Index {
            kind: "annotation",
            index: annotation,
            len: loaded.len(),
        })?;
        let Some(table) = field.categories() else {
            return Ok(Vec::new());
        };

        let mut sums: FxHashMap<i64, (DVec3, usize)> = FxHashMap::default();
        for record in self.batches.records() {
            let Some(&code) = record.codes.get(annotation) else {
                continue;
            };
            // Negative codes have no category.
            if !code.is_finite() || code < 0.0 {
                continue;
            }
            let entry = sums.entry(code as i64).or_insert((DVec3::ZERO, 0));
            entry.0 += record.position.as_dvec3();
            entry.1 += 1;
        }

        let ramp = self.pipeline.annotation_ramp();
        let mut labels: Vec<CategoryLabel> = sums
            .into_iter()
            .map(|(code, (sum, count))| CategoryLabel {
                code,
                text: table.label_or_missing(code).to_owned(),
                position: (sum / count as f64).as_vec3(),
                color: ramp.sample_rgba(code as f32 / table.len() as f32),
            })
            .collect();
        labels.sort_by_key(|l| l.code);
        Ok(labels)
    }

    /// Legend rows for the active annotation.
    #[must_use]
    pub fn legend(&self) -> Vec<LegendEntry> {
        self.pipeline.legend()
    }

    /// Genes whose nonzero fraction exceeds the configured threshold.
    #[must_use]
    pub fn informative_genes(&self) -> Vec<usize> {
        self.matrix
            .informative_genes(self.options.data.informative_threshold)
    }

    /// Batches in partition order.
    #[must_use]
    pub fn batches(&self) -> &[Batch] {
        self.batches.batches()
    }

    /// Batches, mutably, so a renderer can clear dirty flags after upload.
    pub fn batches_mut(&mut self) -> &mut [Batch] {
        self.batches.batches_mut()
    }

    /// Partitioner, for cell → batch lookups.
    #[must_use]
    pub fn partitioner(&self) -> &BatchPartitioner {
        &self.batches
    }

    /// Render radius of every point.
    #[must_use]
    pub fn point_radius(&self) -> f32 {
        self.options.layout.point_radius
    }

    /// Encoding pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &EncodingPipeline {
        &self.pipeline
    }

    /// Dataset tables.
    #[must_use]
    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    /// Options this cloud was built with.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl std::fmt::Debug for PointCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointCloud")
            .field("cells", &self.batches.len())
            .field("batches", &self.batches.batches().len())
            .field("state", &self.pipeline.state())
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

/// Read and normalize each configured `/obs/<name>` field. Absent and text
/// fields are skipped with a warning.
fn load_annotations(
    store: &StoreHandle,
    options: &Options,
    num_cells: usize,
) -> Result<Vec<NormalizedAnnotation>, CloudError> {
    let catalog = AnnotationCatalog::new(store.clone());
    let mut loaded = Vec::with_capacity(options.data.annotations.len());

    for name in &options.data.annotations {
        let path = format!("/obs/{name}");
        if store.element_type(&path)?.is_none() {
            log::warn!("annotation {name}: not in dataset, skipping");
            continue;
        }
        let field = catalog.read_field(&path, false)?;
        if field.values.len() != num_cells {
            return Err(CloudError::Format(format!(
                "{path}: {} values for {num_cells} cells",
                field.values.len()
            )));
        }
        let categories = catalog.decode_categorical(name)?;
        match NormalizedAnnotation::from_field(&field, categories) {
            Ok(annotation) => loaded.push(annotation),
            Err(CloudError::NonNumeric(_)) => {
                log::warn!("annotation {name}: text values, skipping");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(loaded)
}
