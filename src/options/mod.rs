//! Centralized dataset, layout and color options with TOML preset support.
//!
//! Options serialize to/from TOML. Every section uses `#[serde(default)]` so a
//! partial file (e.g. only overriding `[layout]`) fills the rest with
//! defaults.

mod colors;
mod data;
mod layout;

use std::path::Path;

pub use colors::ColorOptions;
pub use data::DataOptions;
pub use layout::LayoutOptions;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::CloudError;

/// Top-level options container.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema,
)]
#[serde(default)]
pub struct Options {
    /// Annotation list and gene sampling.
    pub data: DataOptions,
    /// Batch size and point placement.
    pub layout: LayoutOptions,
    /// Color maps and highlight color.
    pub colors: ColorOptions,
}

impl Options {
    /// Generate JSON Schema describing the options.
    #[must_use]
    pub fn json_schema() -> schemars::Schema {
        schemars::schema_for!(Options)
    }

    /// Load options from a TOML file. Missing fields use defaults.
    ///
    /// # Errors
    ///
    /// [`CloudError::Io`] if the file cannot be read,
    /// [`CloudError::OptionsParse`] if it is not valid TOML for these
    /// options, [`CloudError::InvalidOption`] if a value is out of range.
    pub fn load(path: &Path) -> Result<Self, CloudError> {
        let content = std::fs::read_to_string(path).map_err(CloudError::Io)?;
        let options: Self = toml::from_str(&content)
            .map_err(|e| CloudError::OptionsParse(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Save options to a TOML file (pretty-printed).
    ///
    /// # Errors
    ///
    /// [`CloudError::OptionsParse`] on serialization failure,
    /// [`CloudError::Io`] on write failure.
    pub fn save(&self, path: &Path) -> Result<(), CloudError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CloudError::OptionsParse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(CloudError::Io)?;
        }
        std::fs::write(path, content).map_err(CloudError::Io)
    }

    /// Reject values that would make batching or sampling meaningless.
    ///
    /// # Errors
    ///
    /// [`CloudError::InvalidOption`] naming the offending field.
    pub fn validate(&self) -> Result<(), CloudError> {
        if self.layout.batch_size == 0 {
            return Err(CloudError::InvalidOption(
                "layout.batch_size must be at least 1".into(),
            ));
        }
        if self.data.gene_sample_size == 0 {
            return Err(CloudError::InvalidOption(
                "data.gene_sample_size must be at least 1".into(),
            ));
        }
        if !self.layout.position_scale.is_finite() {
            return Err(CloudError::InvalidOption(
                "layout.position_scale must be finite".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Colormap;

    #[test]
    fn default_round_trips_through_toml() {
        let opts = Options::default();
        let toml_str = toml::to_string_pretty(&opts).unwrap();
        let parsed: Options = toml::from_str(&toml_str).unwrap();
        assert_eq!(opts, parsed);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
[layout]
batch_size = 2500

[colors]
expression_map = "viridis"
"#;
        let opts: Options = toml::from_str(toml_str).unwrap();
        assert_eq!(opts.layout.batch_size, 2500);
        assert_eq!(opts.colors.expression_map, Colormap::Viridis);
        // Everything else should be default
        assert_eq!(opts.layout.position_scale, 0.3);
        assert_eq!(opts.colors.annotation_map, Colormap::Jet);
        assert_eq!(opts.data.gene_sample_size, 21);
        assert_eq!(opts.data.annotations.len(), 8);
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());
        opts.layout.batch_size = 0;
        assert!(matches!(opts.validate(), Err(CloudError::InvalidOption(_))));
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir()
            .join(format!("cellcloud-options-{}", std::process::id()));
        let path = dir.join("preset.toml");
        let mut opts = Options::default();
        opts.data.seed = Some(7);
        opts.data.genes = vec![3, 1, 4];
        opts.save(&path).unwrap();
        assert_eq!(Options::load(&path).unwrap(), opts);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn schema_has_expected_properties() {
        let schema_value =
            serde_json::to_value(Options::json_schema()).unwrap();
        let props = schema_value["properties"].as_object().unwrap();
        assert!(props.contains_key("data"));
        assert!(props.contains_key("layout"));
        assert!(props.contains_key("colors"));

        let colors = &props["colors"]["properties"];
        assert!(colors.get("expression_map").is_some());
        assert!(colors.get("highlight").is_none());
        assert!(colors.get("missing").is_some());
    }
}
