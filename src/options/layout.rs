use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Batch sizing and point placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Layout", inline)]
#[serde(default)]
pub struct LayoutOptions {
    /// Maximum instances per render batch.
    #[schemars(title = "Batch Size", range(min = 1))]
    pub batch_size: usize,
    /// Multiplier applied to centered embedding coordinates.
    #[schemars(title = "Position Scale", range(min = 0.0))]
    pub position_scale: f32,
    /// Sphere radius written into each instance.
    #[schemars(title = "Point Radius", range(min = 0.0))]
    pub point_radius: f32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            position_scale: 0.3,
            point_radius: 0.006,
        }
    }
}
