//! Normalization and color encoding.
//!
//! Gene expression columns are rescaled per gene into `[0, 10]`; annotation
//! fields are divided by their maximum into `[0, 1]`. The
//! [`EncodingPipeline`] holds both, tracks which one drives color
//! ([`EncodingState`]), and samples the configured color maps.

mod colormap;

use std::sync::{Arc, Mutex, PoisonError};

pub use colormap::{ColorRamp, Colormap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::annotations::{AnnotationField, CategoryTable};
use crate::dataset::DatasetIndex;
use crate::error::CloudError;
use crate::matrix::SparseMatrixReader;
use crate::options::ColorOptions;

/// Upper bound of the encoded expression domain, and the display max used
/// for genes with no expression.
pub const DISPLAY_MAX: f32 = 10.0;

/// Rescale one dense column in place so its ceiling max maps to
/// [`DISPLAY_MAX`]. Returns the display max (`ceil(max)`, or
/// [`DISPLAY_MAX`] when the column has no positive value, in which case the
/// column is left untouched).
pub fn rescale_expression(column: &mut [f32]) -> f32 {
    let max = column
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max)
        .ceil();
    if max.is_nan() || max <= 0.0 {
        return DISPLAY_MAX;
    }
    let factor = DISPLAY_MAX / max;
    for v in column.iter_mut() {
        *v *= factor;
    }
    max
}

/// Output of one gene-expression fetch. Names, vectors and display maxima
/// always have equal length and are replaced together.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpressionSet {
    genes: Vec<usize>,
    names: Vec<String>,
    vectors: Vec<Vec<f32>>,
    max_list: Vec<f32>,
}

impl ExpressionSet {
    /// Assemble a set from parallel lists.
    ///
    /// # Errors
    ///
    /// [`CloudError::Format`] if the lists differ in length.
    pub fn new(
        genes: Vec<usize>,
        names: Vec<String>,
        vectors: Vec<Vec<f32>>,
        max_list: Vec<f32>,
    ) -> Result<Self, CloudError> {
        let n = genes.len();
        if names.len() != n || vectors.len() != n || max_list.len() != n {
            return Err(CloudError::Format(format!(
                "expression set lists differ: {n} genes, {} names, {} \
                 vectors, {} maxima",
                names.len(),
                vectors.len(),
                max_list.len()
            )));
        }
        Ok(Self {
            genes,
            names,
            vectors,
            max_list,
        })
    }

    /// Matrix column index of each selected gene.
    #[must_use]
    pub fn genes(&self) -> &[usize] {
        &self.genes
    }

    /// Gene names in selection order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Rescaled dense vectors in selection order.
    #[must_use]
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Display maximum (pre-rescale ceiling) per gene.
    #[must_use]
    pub fn max_list(&self) -> &[f32] {
        &self.max_list
    }

    /// Number of selected genes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    /// Whether no gene is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Encoded value of `cell` for the gene in selection slot `slot`, `0.0`
    /// when either is out of range.
    #[must_use]
    pub fn value(&self, slot: usize, cell: usize) -> f32 {
        self.vectors
            .get(slot)
            .and_then(|v| v.get(cell))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Produces [`ExpressionSet`]s for a gene selection.
///
/// The reload worker only sees this trait, so the decode path can run on any
/// thread.
pub trait ExpressionSource: Send + Sync {
    /// Reject selections naming genes that do not exist.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] for the first out-of-range gene.
    fn validate(&self, selection: &[usize]) -> Result<(), CloudError>;

    /// Densify and rescale every selected gene.
    ///
    /// # Errors
    ///
    /// Any decode or format error; the caller keeps its previous set.
    fn fetch(&self, selection: Vec<usize>) -> Result<ExpressionSet, CloudError>;
}

/// [`ExpressionSource`] backed by the in-memory CSC matrix.
#[derive(Debug)]
pub struct GeneExpressionFetcher {
    matrix: Arc<SparseMatrixReader>,
    index: Arc<DatasetIndex>,
    sample_size: usize,
    rng: Mutex<StdRng>,
}

impl GeneExpressionFetcher {
    /// Fetcher drawing `sample_size` random genes for an empty selection.
    /// A `seed` makes the draws reproducible.
    #[must_use]
    pub fn new(
        matrix: Arc<SparseMatrixReader>,
        index: Arc<DatasetIndex>,
        sample_size: usize,
        seed: Option<u64>,
    ) -> Self {
        let rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self {
            matrix,
            index,
            sample_size,
            rng: Mutex::new(rng),
        }
    }

    /// The selection itself, or a uniform random sample (with replacement)
    /// when it is empty.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if the dataset has no genes or a selected gene
    /// is out of range.
    pub fn resolve_selection(
        &self,
        selection: Vec<usize>,
    ) -> Result<Vec<usize>, CloudError> {
        let num_genes = self.matrix.shape().genes;
        if !selection.is_empty() {
            self.validate(&selection)?;
            return Ok(selection);
        }
        if num_genes == 0 {
            return Err(CloudError::gene_index(0, 0));
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Ok((0..self.sample_size)
            .map(|_| rng.random_range(0..num_genes))
            .collect())
    }
}

impl ExpressionSource for GeneExpressionFetcher {
    fn validate(&self, selection: &[usize]) -> Result<(), CloudError> {
        let num_genes = self.matrix.shape().genes;
        match selection.iter().find(|&&g| g >= num_genes) {
            Some(&g) => Err(CloudError::gene_index(g, num_genes)),
            None => Ok(()),
        }
    }

    fn fetch(&self, selection: Vec<usize>) -> Result<ExpressionSet, CloudError> {
        let genes = self.resolve_selection(selection)?;
        let mut names = Vec::with_capacity(genes.len());
        let mut vectors = Vec::with_capacity(genes.len());
        let mut max_list = Vec::with_capacity(genes.len());

        for &gene in &genes {
            let mut column = self.matrix.read_column(gene)?;
            max_list.push(rescale_expression(&mut column));
            vectors.push(column);
            names.push(self.index.gene_name(gene)?.to_owned());
        }
        log::debug!("fetched expression for {names:?}");
        ExpressionSet::new(genes, names, vectors, max_list)
    }
}

/// An annotation field divided by its maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAnnotation {
    name: String,
    raw: Vec<f64>,
    normalized: Vec<f32>,
    max: f64,
    legend: Vec<(f32, f64)>,
    categories: Option<CategoryTable>,
}

impl NormalizedAnnotation {
    /// Normalize a decoded field. Text fields cannot be normalized.
    ///
    /// # Errors
    ///
    /// [`CloudError::NonNumeric`] for text fields.
    pub fn from_field(
        field: &AnnotationField,
        categories: Option<CategoryTable>,
    ) -> Result<Self, CloudError> {
        let raw = field
            .numeric()
            .ok_or_else(|| CloudError::NonNumeric(field.path.to_string()))?;
        Ok(Self::from_values(field.path.field(), raw, categories))
    }

    /// Normalize raw values: `raw / max(raw)`, or all zero when the maximum
    /// is not positive.
    ///
    /// With a category table, negative codes mark cells without a category:
    /// they normalize to NaN and are left out of the maximum and the legend.
    #[must_use]
    pub fn from_values(
        name: &str,
        raw: Vec<f64>,
        categories: Option<CategoryTable>,
    ) -> Self {
        let categorical = categories.is_some();
        let missing = |v: f64| categorical && v < 0.0;
        let max = raw
            .iter()
            .copied()
            .filter(|&v| !missing(v))
            .fold(f64::NEG_INFINITY, f64::max);
        let normalized: Vec<f32> = raw
            .iter()
            .map(|&v| {
                if missing(v) {
                    f32::NAN
                } else if max > 0.0 {
                    (v / max) as f32
                } else {
                    0.0
                }
            })
            .collect();

        let mut pairs: Vec<(f32, f64)> = normalized
            .iter()
            .copied()
            .zip(raw.iter().copied())
            .filter(|(v, _)| !v.is_nan())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        pairs.dedup_by(|later, first| later.0.total_cmp(&first.0).is_eq());

        Self {
            name: name.to_owned(),
            raw,
            normalized,
            max,
            legend: pairs,
            categories,
        }
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw per-cell values.
    #[must_use]
    pub fn raw(&self) -> &[f64] {
        &self.raw
    }

    /// Normalized per-cell values in `[0, 1]`, NaN for missing categories.
    #[must_use]
    pub fn normalized(&self) -> &[f32] {
        &self.normalized
    }

    /// Maximum raw value over present cells (`-inf` when none).
    #[must_use]
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Distinct normalized values, ascending. This is the legend order.
    #[must_use]
    pub fn legend_values(&self) -> Vec<f32> {
        self.legend.iter().map(|&(v, _)| v).collect()
    }

    /// Category label table, if the field has one.
    #[must_use]
    pub fn categories(&self) -> Option<&CategoryTable> {
        self.categories.as_ref()
    }
}

/// Which data source drives instance color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingMode {
    /// Categorical color map over a normalized annotation.
    #[default]
    Annotation,
    /// Sequential color map over a rescaled gene.
    GeneExpression,
}

/// Active encoding selection. Indices always refer to loaded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodingState {
    /// Driving data source.
    pub mode: EncodingMode,
    /// Index into the loaded annotations.
    pub annotation: usize,
    /// Slot in the active [`ExpressionSet`].
    pub gene: usize,
}

/// One legend row for the active annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    /// Normalized value in `[0, 1]`.
    pub value: f32,
    /// Smallest raw value normalizing to `value`.
    pub code: f64,
    /// Category label, when the field has a table.
    pub label: Option<String>,
    /// Color sampled at `value`.
    pub color: [f32; 4],
}

/// Normalized data plus the active encoding selection.
pub struct EncodingPipeline {
    source: Arc<dyn ExpressionSource>,
    annotations: Vec<NormalizedAnnotation>,
    expression: Arc<ExpressionSet>,
    state: EncodingState,
    annotation_ramp: ColorRamp,
    expression_ramp: ColorRamp,
    highlight: [f32; 4],
    missing: [f32; 4],
}

impl EncodingPipeline {
    /// Pipeline over loaded annotations and an initial expression set.
    /// Starts in annotation mode when any annotation is loaded.
    #[must_use]
    pub fn new(
        source: Arc<dyn ExpressionSource>,
        annotations: Vec<NormalizedAnnotation>,
        expression: Arc<ExpressionSet>,
        colors: &ColorOptions,
    ) -> Self {
        let mode = if annotations.is_empty() {
            EncodingMode::GeneExpression
        } else {
            EncodingMode::Annotation
        };
        Self {
            source,
            annotations,
            expression,
            state: EncodingState {
                mode,
                annotation: 0,
                gene: 0,
            },
            annotation_ramp: colors.annotation_map.ramp(),
            expression_ramp: colors.expression_map.ramp(),
            highlight: colors.highlight,
            missing: colors.missing,
        }
    }

    /// Source used for reloads.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn ExpressionSource> {
        &self.source
    }

    /// Fetch and rescale a gene selection without installing it.
    ///
    /// # Errors
    ///
    /// See [`ExpressionSource::fetch`].
    pub fn fetch_gene_expression(
        &self,
        selection: Vec<usize>,
    ) -> Result<ExpressionSet, CloudError> {
        self.source.fetch(selection)
    }

    /// Replace the active expression set and point at its first gene.
    pub fn install_expression(&mut self, expression: Arc<ExpressionSet>) {
        self.expression = expression;
        self.state.gene = 0;
    }

    /// Active expression set.
    #[must_use]
    pub fn expression(&self) -> &Arc<ExpressionSet> {
        &self.expression
    }

    /// Loaded annotations in option order.
    #[must_use]
    pub fn annotations(&self) -> &[NormalizedAnnotation] {
        &self.annotations
    }

    /// Current selection.
    #[must_use]
    pub fn state(&self) -> EncodingState {
        self.state
    }

    /// Switch the driving data source.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if the requested source has nothing loaded.
    pub fn set_mode(&mut self, mode: EncodingMode) -> Result<(), CloudError> {
        let loaded = match mode {
            EncodingMode::Annotation => self.annotations.len(),
            EncodingMode::GeneExpression => self.expression.len(),
        };
        if loaded == 0 {
            return Err(CloudError::Index {
                kind: match mode {
                    EncodingMode::Annotation => "annotation",
                    EncodingMode::GeneExpression => "gene",
                },
                index: 0,
                len: 0,
            });
        }
        self.state.mode = mode;
        Ok(())
    }

    /// Point at annotation `index`.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if no such annotation is loaded.
    pub fn select_annotation(&mut self, index: usize) -> Result<(), CloudError> {
        if index >= self.annotations.len() {
            return Err(CloudError::Index {
                kind: "annotation",
                index,
                len: self.annotations.len(),
            });
        }
        self.state.annotation = index;
        Ok(())
    }

    /// Point at gene slot `slot` of the active expression set.
    ///
    /// # Errors
    ///
    /// [`CloudError::Index`] if the slot is not loaded.
    pub fn select_gene(&mut self, slot: usize) -> Result<(), CloudError> {
        if slot >= self.expression.len() {
            return Err(CloudError::gene_index(slot, self.expression.len()));
        }
        self.state.gene = slot;
        Ok(())
    }

    /// Advance to the next gene slot, wrapping.
    pub fn next_gene(&mut self) {
        self.state.gene = step(self.state.gene, self.expression.len(), true);
    }

    /// Go back one gene slot, wrapping.
    pub fn previous_gene(&mut self) {
        self.state.gene = step(self.state.gene, self.expression.len(), false);
    }

    /// Advance to the next annotation, wrapping.
    pub fn next_annotation(&mut self) {
        self.state.annotation =
            step(self.state.annotation, self.annotations.len(), true);
    }

    /// Go back one annotation, wrapping.
    pub fn previous_annotation(&mut self) {
        self.state.annotation =
            step(self.state.annotation, self.annotations.len(), false);
    }

    /// Name of the gene currently selected, if any.
    #[must_use]
    pub fn active_gene_name(&self) -> Option<&str> {
        self.expression
            .names()
            .get(self.state.gene)
            .map(String::as_str)
    }

    /// Annotation currently selected, if any.
    #[must_use]
    pub fn active_annotation(&self) -> Option<&NormalizedAnnotation> {
        self.annotations.get(self.state.annotation)
    }

    /// Renderer-owned color applied to selected cells.
    #[must_use]
    pub fn highlight(&self) -> [f32; 4] {
        self.highlight
    }

    /// Replace the highlight color.
    pub fn set_highlight(&mut self, color: [f32; 4]) {
        self.highlight = color;
    }

    /// Categorical ramp, shared with label and legend coloring.
    #[must_use]
    pub fn annotation_ramp(&self) -> &ColorRamp {
        &self.annotation_ramp
    }

    /// Color of `cell` under `state`. Selected cells take the highlight
    /// color; cells with a missing category take the missing color.
    #[must_use]
    pub fn color_for(
        &self,
        cell: usize,
        state: &EncodingState,
        selected: bool,
    ) -> [f32; 4] {
        if selected {
            return self.highlight;
        }
        match state.mode {
            EncodingMode::Annotation => {
                let t = self
                    .annotations
                    .get(state.annotation)
                    .and_then(|a| a.normalized.get(cell))
                    .copied()
                    .unwrap_or(0.0);
                if t.is_nan() {
                    return self.missing;
                }
                self.annotation_ramp.sample_rgba(t)
            }
            EncodingMode::GeneExpression => {
                let value = self.expression.value(state.gene, cell);
                self.expression_ramp.sample_rgba(value / DISPLAY_MAX)
            }
        }
    }

    /// [`color_for`](Self::color_for) under the pipeline's own state.
    #[must_use]
    pub fn encode(&self, cell: usize, selected: bool) -> [f32; 4] {
        self.color_for(cell, &self.state, selected)
    }

    /// Legend rows for the active annotation, in ascending normalized order.
    #[must_use]
    pub fn legend(&self) -> Vec<LegendEntry> {
        let Some(annotation) = self.active_annotation() else {
            return Vec::new();
        };
        annotation
            .legend
            .iter()
            .map(|&(value, code)| LegendEntry {
                value,
                code,
                label: annotation
                    .categories
                    .as_ref()
                    .and_then(|t| t.label(code as i64))
                    .map(str::to_owned),
                color: self.annotation_ramp.sample_rgba(value),
            })
            .collect()
    }
}

fn step(current: usize, len: usize, forward: bool) -> usize {
    match (len, forward) {
        (0, _) => 0,
        (_, true) => (current + 1) % len,
        (_, false) => (current + len - 1) % len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixShape;

    fn fetcher(seed: Option<u64>) -> GeneExpressionFetcher {
        // gene 0: max 4, gene 1: empty, gene 2: max 2.5 -> ceil 3
        let matrix = SparseMatrixReader::from_parts(
            MatrixShape { genes: 3, cells: 4 },
            vec![4.0, 1.0, 2.5, 1.0],
            vec![0, 2, 1, 3],
            vec![0, 2, 2, 4],
        )
        .unwrap();
        let index = DatasetIndex::from_parts(
            vec!["Actb".into(), "Xist".into(), "Cd3e".into()],
            (0..4).map(|i| format!("cell{i}")).collect(),
            &[0.0; 12],
        )
        .unwrap();
        GeneExpressionFetcher::new(Arc::new(matrix), Arc::new(index), 21, seed)
    }

    fn pipeline(annotations: Vec<NormalizedAnnotation>) -> EncodingPipeline {
        let source = Arc::new(fetcher(Some(1)));
        let set = source.fetch(vec![0, 1, 2]).unwrap();
        EncodingPipeline::new(
            source,
            annotations,
            Arc::new(set),
            &ColorOptions::default(),
        )
    }

    #[test]
    fn rescales_positive_columns_to_display_max() {
        let mut col = vec![0.0, 3.0, 6.0, 1.5];
        assert_eq!(rescale_expression(&mut col), 6.0);
        let max = col.iter().copied().fold(0.0f32, f32::max);
        assert!((max - DISPLAY_MAX).abs() < 1e-5);
        assert!((col[3] - 2.5).abs() < 1e-5);
    }

    #[test]
    fn zero_column_keeps_zeros_and_display_max_ten() {
        let mut col = vec![0.0; 5];
        assert_eq!(rescale_expression(&mut col), DISPLAY_MAX);
        assert!(col.iter().all(|&v| v == 0.0));
        assert_eq!(rescale_expression(&mut []), DISPLAY_MAX);
    }

    #[test]
    fn fetch_builds_parallel_lists() {
        let set = fetcher(None).fetch(vec![2, 1, 0]).unwrap();
        assert_eq!(set.names(), &["Cd3e", "Xist", "Actb"]);
        assert_eq!(set.max_list(), &[3.0, 10.0, 4.0]);
        assert_eq!(set.vectors().len(), 3);
        assert!(set.vectors()[1].iter().all(|&v| v == 0.0));
        assert!((set.value(2, 0) - 10.0).abs() < 1e-5);
        assert!((set.value(0, 1) - 2.5 * 10.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn empty_selection_samples_default_count() {
        let f = fetcher(Some(42));
        let genes = f.resolve_selection(Vec::new()).unwrap();
        assert_eq!(genes.len(), 21);
        assert!(genes.iter().all(|&g| g < 3));
        // Same seed, same draw.
        assert_eq!(fetcher(Some(42)).resolve_selection(Vec::new()).unwrap(), genes);
    }

    #[test]
    fn out_of_range_selection_is_index_error() {
        let f = fetcher(None);
        assert!(matches!(
            f.fetch(vec![0, 9]),
            Err(CloudError::Index { kind: "gene", index: 9, .. })
        ));
    }

    #[test]
    fn normalizes_by_max_with_legend_in_value_order() {
        // Codes are not pre-sorted, and code 1 never occurs.
        let a = NormalizedAnnotation::from_values(
            "tissue",
            vec![4.0, 0.0, 2.0, 4.0, 3.0],
            None,
        );
        assert_eq!(a.normalized(), &[1.0, 0.0, 0.5, 1.0, 0.75]);
        assert_eq!(a.legend_values(), vec![0.0, 0.5, 0.75, 1.0]);
        assert_eq!(a.max(), 4.0);
    }

    #[test]
    fn zero_max_annotation_is_all_zero() {
        let a = NormalizedAnnotation::from_values("sex", vec![0.0; 4], None);
        assert_eq!(a.normalized(), &[0.0; 4]);
        assert_eq!(a.legend_values(), vec![0.0]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = vec![3.0, 1.0, 2.0];
        let a = NormalizedAnnotation::from_values("x", raw.clone(), None);
        let b = NormalizedAnnotation::from_values("x", raw, None);
        assert_eq!(a, b);
        let again = NormalizedAnnotation::from_values(
            "x",
            a.normalized().iter().map(|&v| f64::from(v)).collect(),
            None,
        );
        assert_eq!(again.normalized(), a.normalized());
    }

    #[test]
    fn color_for_follows_mode_and_selection() {
        let ann = NormalizedAnnotation::from_values("louvain", vec![0.0, 1.0, 2.0, 2.0], None);
        let mut p = pipeline(vec![ann]);
        let jet = Colormap::Jet.ramp();
        let hot = Colormap::Hot.ramp();

        assert_eq!(p.state().mode, EncodingMode::Annotation);
        assert_eq!(p.encode(1, false), jet.sample_rgba(0.5));
        assert_eq!(p.encode(1, true), ColorOptions::default().highlight);

        p.set_mode(EncodingMode::GeneExpression).unwrap();
        assert_eq!(p.encode(0, false), hot.sample_rgba(1.0));
        assert_eq!(p.encode(1, false), hot.sample_rgba(0.0));

        let other = EncodingState {
            mode: EncodingMode::GeneExpression,
            annotation: 0,
            gene: 2,
        };
        assert_eq!(
            p.color_for(1, &other, false),
            hot.sample_rgba(p.expression().value(2, 1) / DISPLAY_MAX)
        );
    }

    #[test]
    fn selection_cycles_and_resets_on_install() {
        let mut p = pipeline(vec![
            NormalizedAnnotation::from_values("a", vec![1.0], None),
            NormalizedAnnotation::from_values("b", vec![1.0], None),
        ]);
        p.previous_gene();
        assert_eq!(p.state().gene, 2);
        assert_eq!(p.active_gene_name(), Some("Cd3e"));
        p.next_gene();
        assert_eq!(p.state().gene, 0);
        p.next_annotation();
        p.next_annotation();
        assert_eq!(p.state().annotation, 0);
        assert!(p.select_annotation(2).is_err());
        assert!(p.select_gene(3).is_err());

        p.select_gene(1).unwrap();
        let fresh = p.fetch_gene_expression(vec![2]).unwrap();
        p.install_expression(Arc::new(fresh));
        assert_eq!(p.state().gene, 0);
        assert_eq!(p.active_gene_name(), Some("Cd3e"));
    }

    #[test]
    fn set_mode_requires_loaded_data() {
        let mut p = pipeline(Vec::new());
        assert_eq!(p.state().mode, EncodingMode::GeneExpression);
        assert!(p.set_mode(EncodingMode::Annotation).is_err());
    }

    #[test]
    fn negative_codes_are_missing_categories() {
        let table = CategoryTable::new(vec!["a".into(), "b".into(), "c".into()]);
        let ann = NormalizedAnnotation::from_values(
            "louvain",
            vec![-1.0, 0.0, 1.0, 2.0],
            Some(table),
        );
        assert_eq!(ann.max(), 2.0);
        assert!(ann.normalized()[0].is_nan());
        assert_eq!(&ann.normalized()[1..], &[0.0, 0.5, 1.0]);
        assert_eq!(ann.legend_values(), vec![0.0, 0.5, 1.0]);

        let p = pipeline(vec![ann]);
        let missing = ColorOptions::default().missing;
        assert_eq!(p.encode(0, false), missing);
        assert_eq!(p.encode(1, false), Colormap::Jet.ramp().sample_rgba(0.0));
        assert_ne!(p.encode(1, false), missing);
        assert_eq!(p.encode(0, true), ColorOptions::default().highlight);

        let codes: Vec<f64> = p.legend().iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![0.0, 1.0, 2.0]);

        // Without a table, negative values are ordinary numbers.
        let plain = NormalizedAnnotation::from_values("delta", vec![-1.0, 2.0], None);
        assert_eq!(plain.normalized(), &[-0.5, 1.0]);
    }

    #[test]
    fn legend_labels_come_from_codes() {
        let table = CategoryTable::new(vec!["B".into(), "T".into(), "NK".into()]);
        let ann = NormalizedAnnotation::from_values(
            "cell_type",
            vec![2.0, 0.0, 2.0, 1.0],
            Some(table),
        );
        let p = pipeline(vec![ann]);
        let legend = p.legend();
        let labels: Vec<_> = legend.iter().map(|e| e.label.as_deref()).collect();
        assert_eq!(labels, vec![Some("B"), Some("T"), Some("NK")]);
        assert_eq!(legend[1].value, 0.5);
        assert_eq!(legend[2].color, Colormap::Jet.ramp().sample_rgba(1.0));
    }
}
