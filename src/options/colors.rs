use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::encoding::Colormap;

/// Color map selection and the renderer-owned highlight color.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Colors", inline)]
#[serde(default)]
pub struct ColorOptions {
    /// Map sampled at normalized annotation values.
    #[schemars(title = "Annotation Colormap")]
    pub annotation_map: Colormap,
    /// Map sampled at `expression / 10`.
    #[schemars(title = "Expression Colormap")]
    pub expression_map: Colormap,
    /// RGBA override for selected cells.
    #[schemars(skip)]
    pub highlight: [f32; 4],
    /// RGBA for cells whose categorical code is negative (no category).
    #[schemars(title = "Missing Category Color")]
    pub missing: [f32; 4],
}

impl Default for ColorOptions {
    fn default() -> Self {
        Self {
            annotation_map: Colormap::Jet,
            expression_map: Colormap::Hot,
            highlight: [0.9, 0.0, 0.0, 1.0],
            missing: [0.5, 0.5, 0.5, 1.0],
        }
    }
}
