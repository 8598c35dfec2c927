//! Scalar → RGB color ramps.
//!
//! A [`ColorRamp`] is a list of evenly spaced stops; `t = 0` maps to the
//! first stop and `t = 1` to the last. [`Colormap`] names the built-in ramps
//! selectable from options.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Named built-in color map.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Colormap {
    /// Blue → cyan → yellow → red; the categorical default.
    Jet,
    /// Black → red → yellow → white; the expression default.
    Hot,
    /// Perceptually uniform purple → green → yellow.
    Viridis,
}

impl Colormap {
    /// Build the ramp for this map.
    #[must_use]
    pub fn ramp(self) -> ColorRamp {
        let stops: &[[f32; 3]] = match self {
            Self::Jet => &[
                [0.0, 0.0, 0.5],
                [0.0, 0.0, 1.0],
                [0.0, 0.5, 1.0],
                [0.0, 1.0, 1.0],
                [0.5, 1.0, 0.5],
                [1.0, 1.0, 0.0],
                [1.0, 0.5, 0.0],
                [1.0, 0.0, 0.0],
                [0.5, 0.0, 0.0],
            ],
            Self::Hot => &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [1.0, 1.0, 1.0],
            ],
            Self::Viridis => &[
                [0.267, 0.005, 0.329],
                [0.229, 0.322, 0.546],
                [0.128, 0.567, 0.551],
                [0.369, 0.789, 0.383],
                [0.993, 0.906, 0.144],
            ],
        };
        ColorRamp {
            stops: stops.to_vec(),
        }
    }
}

/// A color ramp defined by N ≥ 2 evenly spaced color stops.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorRamp {
    stops: Vec<[f32; 3]>,
}

impl ColorRamp {
    /// Interpolate the ramp at position `t` in [0, 1]. Values outside the
    /// range clamp; non-finite values sample the first stop.
    #[must_use]
    pub fn sample(&self, t: f32) -> [f32; 3] {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let n = self.stops.len() - 1;
        let scaled = t * n as f32;
        let idx = (scaled as usize).min(n - 1);
        let frac = scaled - idx as f32;

        let a = &self.stops[idx];
        let b = &self.stops[idx + 1];
        [
            a[0] + (b[0] - a[0]) * frac,
            a[1] + (b[1] - a[1]) * frac,
            a[2] + (b[2] - a[2]) * frac,
        ]
    }

    /// [`sample`](Self::sample) with an opaque alpha channel.
    #[must_use]
    pub fn sample_rgba(&self, t: f32) -> [f32; 4] {
        let [r, g, b] = self.sample(t);
        [r, g, b, 1.0]
    }
}
