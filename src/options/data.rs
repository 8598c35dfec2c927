use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which dataset fields are loaded and how genes are sampled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Data", inline)]
#[serde(default)]
pub struct DataOptions {
    /// Annotation fields read from `/obs`. Absent ones are skipped.
    #[schemars(title = "Annotations")]
    pub annotations: Vec<String>,
    /// Initial gene selection by index. Empty draws a random sample.
    #[schemars(title = "Genes")]
    pub genes: Vec<usize>,
    /// Size of the random sample drawn for an empty selection.
    #[schemars(title = "Gene Sample Size", range(min = 1))]
    pub gene_sample_size: usize,
    /// Density ratio above which a gene counts as informative.
    #[schemars(title = "Informative Threshold", range(min = 0.0, max = 1.0))]
    pub informative_threshold: f32,
    /// Seed for the gene sampler; `None` seeds from the OS.
    #[schemars(skip)]
    pub seed: Option<u64>,
}

impl Default for DataOptions {
    fn default() -> Self {
        Self {
            annotations: [
                "cell_ontology_class",
                "method",
                "mouse.id",
                "sex",
                "subtissue",
                "tissue",
                "louvain",
                "leiden",
            ]
            .map(str::to_owned)
            .to_vec(),
            genes: Vec::new(),
            gene_sample_size: 21,
            informative_threshold: 0.2,
            seed: None,
        }
    }
}
