//! Per-cell annotation fields and categorical label tables.
//!
//! Fields live under `/obs`, `/var` or `/uns`. An int8 field `f` may be
//! paired with a label table at `/uns/f_categorical` whose positions are the
//! category codes.

use std::fmt;
use std::str::FromStr;

use crate::error::CloudError;
use crate::store::{ArrayData, ElementType, StoreHandle};

/// Label used for codes that fall outside the category table (anndata
/// encodes a missing category as `-1`).
pub const MISSING_LABEL: &str = "nan";

/// Suffix of the label table paired with a categorical field.
pub const CATEGORICAL_SUFFIX: &str = "_categorical";

/// Top-level sections that may hold annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Per-cell observations.
    Obs,
    /// Per-gene variables.
    Var,
    /// Unstructured extras, including category label tables.
    Uns,
}

impl Section {
    fn as_str(self) -> &'static str {
        match self {
            Self::Obs => "obs",
            Self::Var => "var",
            Self::Uns => "uns",
        }
    }
}

/// A validated annotation path such as `/obs/cell_ontology_class`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationPath {
    section: Section,
    field: String,
}

impl AnnotationPath {
    /// Path of `field` inside `section`.
    ///
    /// # Errors
    ///
    /// [`CloudError::Path`] if `field` is empty.
    pub fn new(section: Section, field: &str) -> Result<Self, CloudError> {
        if field.is_empty() {
            return Err(CloudError::Path(format!("/{}/", section.as_str())));
        }
        Ok(Self {
            section,
            field: field.to_owned(),
        })
    }

    /// Shorthand for `/obs/<field>`.
    ///
    /// # Errors
    ///
    /// [`CloudError::Path`] if `field` is empty.
    pub fn obs(field: &str) -> Result<Self, CloudError> {
        Self::new(Section::Obs, field)
    }

    /// Section the field lives in.
    #[must_use]
    pub fn section(&self) -> Section {
        self.section
    }

    /// Field name without the section prefix.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Path of the label table paired with this field.
    #[must_use]
    pub fn categorical_table(&self) -> String {
        format!("/uns/{}{CATEGORICAL_SUFFIX}", self.field)
    }
}

impl FromStr for AnnotationPath {
    type Err = CloudError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let reject = || CloudError::Path(path.to_owned());
        let rest = path.strip_prefix('/').ok_or_else(reject)?;
        let (section, field) = rest.split_once('/').ok_or_else(reject)?;
        let section = match section {
            "obs" => Section::Obs,
            "var" => Section::Var,
            "uns" => Section::Uns,
            _ => return Err(reject()),
        };
        Self::new(section, field).map_err(|_| reject())
    }
}

impl fmt::Display for AnnotationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.section.as_str(), self.field)
    }
}

/// Positional code → label mapping for a categorical field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTable {
    labels: Vec<String>,
}

impl CategoryTable {
    /// Table whose code `i` maps to `labels[i]`.
    #[must_use]
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Label for `code`, or `None` outside the table.
    #[must_use]
    pub fn label(&self, code: i64) -> Option<&str> {
        usize::try_from(code)
            .ok()
            .and_then(|i| self.labels.get(i))
            .map(String::as_str)
    }

    /// Label for `code`, with out-of-table codes mapped to
    /// [`MISSING_LABEL`].
    #[must_use]
    pub fn label_or_missing(&self, code: i64) -> &str {
        self.label(code).unwrap_or(MISSING_LABEL)
    }

    /// All labels in code order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the table has no categories.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Decoded values of one annotation field.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValues {
    /// Text values or decoded category labels.
    Labels(Vec<String>),
    /// Integer values or raw category codes.
    Integers(Vec<i64>),
    /// Floating-point values.
    Floats(Vec<f64>),
    /// Boolean flags.
    Flags(Vec<bool>),
}

impl AnnotationValues {
    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Labels(v) => v.len(),
            Self::Integers(v) => v.len(),
            Self::Floats(v) => v.len(),
            Self::Flags(v) => v.len(),
        }
    }

    /// Whether there are no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One decoded annotation field.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationField {
    /// Where the field was read from.
    pub path: AnnotationPath,
    /// Element type as stored.
    pub element_type: ElementType,
    /// Decoded values.
    pub values: AnnotationValues,
}

impl AnnotationField {
    /// Values as `f64` for normalization. `None` for text fields.
    #[must_use]
    pub fn numeric(&self) -> Option<Vec<f64>> {
        match &self.values {
            AnnotationValues::Labels(_) => None,
            AnnotationValues::Integers(v) => {
                Some(v.iter().map(|&x| x as f64).collect())
            }
            AnnotationValues::Floats(v) => Some(v.clone()),
            AnnotationValues::Flags(v) => {
                Some(v.iter().map(|&x| f64::from(u8::from(x))).collect())
            }
        }
    }
}

/// Reads annotation fields through the shared store guard.
#[derive(Debug, Clone)]
pub struct AnnotationCatalog {
    store: StoreHandle,
}

impl AnnotationCatalog {
    /// Catalog over `store`.
    #[must_use]
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Read the field at `path`, dispatching on its stored element type.
    ///
    /// With `as_string`, an int8 field is decoded through its
    /// `/uns/<field>_categorical` table when one exists; without a table the
    /// raw codes are returned unchanged.
    ///
    /// # Errors
    ///
    /// [`CloudError::Path`] for a path outside `/obs`, `/var`, `/uns`
    /// (checked before any store access), [`CloudError::MissingDataset`] if
    /// the field is absent.
    pub fn read_field(
        &self,
        path: &str,
        as_string: bool,
    ) -> Result<AnnotationField, CloudError> {
        let path: AnnotationPath = path.parse()?;
        let raw = self.store.read(&path.to_string())?;
        let element_type = raw.element_type();

        let values = match raw {
            ArrayData::Str(v) => AnnotationValues::Labels(v),
            ArrayData::I8(codes) if as_string => {
                let codes: Vec<i64> =
                    codes.into_iter().map(i64::from).collect();
                match self.decode_categorical(path.field())? {
                    Some(table) => AnnotationValues::Labels(
                        codes
                            .iter()
                            .map(|&c| table.label_or_missing(c).to_owned())
                            .collect(),
                    ),
                    None => {
                        log::debug!(
                            "{path}: no category table, keeping raw codes"
                        );
                        AnnotationValues::Integers(codes)
                    }
                }
            }
            ArrayData::F32(v) => AnnotationValues::Floats(
                v.into_iter().map(f64::from).collect(),
            ),
            ArrayData::F64(v) => AnnotationValues::Floats(v),
            ArrayData::Bool(v) => AnnotationValues::Flags(v),
            other => AnnotationValues::Integers(other.to_i64().unwrap_or_default()),
        };

        Ok(AnnotationField {
            path,
            element_type,
            values,
        })
    }

    /// Label table for `field`, or `None` when no `/uns/<field>_categorical`
    /// dataset exists.
    ///
    /// # Errors
    ///
    /// [`CloudError::Path`] for an empty field name,
    /// [`CloudError::Format`] if the table is not a string array.
    pub fn decode_categorical(
        &self,
        field: &str,
    ) -> Result<Option<CategoryTable>, CloudError> {
        let table_path = AnnotationPath::obs(field)?.categorical_table();
        let labels = self.store.with(|s| {
            if !s.contains(&table_path) {
                return Ok(None);
            }
            s.read(&table_path).map(Some)
        })?;
        labels
            .map(|data| {
                let dtype = data.element_type();
                data.into_strings().map(CategoryTable::new).ok_or_else(|| {
                    CloudError::Format(format!(
                        "{table_path}: expected strings, found {dtype}"
                    ))
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn labels(items: &[&str]) -> ArrayData {
        ArrayData::Str(items.iter().map(|&s| s.to_owned()).collect())
    }

    fn catalog() -> AnnotationCatalog {
        let store = MemoryStore::new()
            .with("/obs/cell_type", ArrayData::I8(vec![2, 0, 1, 2, -1]))
            .with("/uns/cell_type_categorical", labels(&["B", "T", "NK"]))
            .with("/obs/louvain", ArrayData::I8(vec![3, 1, 0, 3, 2]))
            .with("/obs/n_genes", ArrayData::I32(vec![10, 20, 30, 40, 50]))
            .with("/obs/n_counts", ArrayData::F32(vec![1.5, 2.0, 0.0, 4.0, 8.0]))
            .with("/obs/is_doublet", ArrayData::Bool(vec![false, true, false, false, true]))
            .with("/obs/barcode", labels(&["a", "b", "c", "d", "e"]))
            .with("/var/highly_variable", ArrayData::I64(vec![1, 0]));
        AnnotationCatalog::new(StoreHandle::new(store))
    }

    #[test]
    fn parses_recognized_sections_only() {
        let p: AnnotationPath = "/obs/sex".parse().unwrap();
        assert_eq!(p.section(), Section::Obs);
        assert_eq!(p.field(), "sex");
        assert_eq!(p.to_string(), "/obs/sex");
        assert_eq!(p.categorical_table(), "/uns/sex_categorical");

        for bad in ["/obsm/X_umap", "/X/data", "obs/sex", "/obs/", "/obs", ""] {
            assert!(
                matches!(bad.parse::<AnnotationPath>(), Err(CloudError::Path(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn path_error_precedes_store_access() {
        // Field exists under an unrecognized section name.
        let store = MemoryStore::new().with("/layers/raw", ArrayData::I8(vec![1]));
        let cat = AnnotationCatalog::new(StoreHandle::new(store));
        assert!(matches!(cat.read_field("/layers/raw", false), Err(CloudError::Path(_))));
    }

    #[test]
    fn categorical_round_trip() {
        let cat = catalog();
        let raw = cat.read_field("/obs/cell_type", false).unwrap();
        let decoded = cat.read_field("/obs/cell_type", true).unwrap();
        let table = cat.decode_categorical("cell_type").unwrap().unwrap();

        let AnnotationValues::Integers(codes) = raw.values else {
            panic!("expected raw codes, got {:?}", raw.values);
        };
        let mapped: Vec<String> = codes
            .iter()
            .map(|&c| table.label_or_missing(c).to_owned())
            .collect();
        assert_eq!(decoded.values, AnnotationValues::Labels(mapped));
        assert_eq!(
            decoded.values,
            AnnotationValues::Labels(
                ["NK", "B", "T", "NK", MISSING_LABEL].map(String::from).to_vec()
            )
        );
    }

    #[test]
    fn missing_table_falls_back_to_codes() {
        let cat = catalog();
        assert_eq!(cat.decode_categorical("louvain").unwrap(), None);
        let field = cat.read_field("/obs/louvain", true).unwrap();
        assert_eq!(field.values, AnnotationValues::Integers(vec![3, 1, 0, 3, 2]));
        assert_eq!(field.element_type, ElementType::Int8);
    }

    #[test]
    fn dispatches_on_element_type() {
        let cat = catalog();
        let ints = cat.read_field("/obs/n_genes", true).unwrap();
        assert_eq!(ints.values, AnnotationValues::Integers(vec![10, 20, 30, 40, 50]));
        let floats = cat.read_field("/obs/n_counts", false).unwrap();
        assert_eq!(floats.numeric().unwrap()[0], 1.5);
        let flags = cat.read_field("/obs/is_doublet", false).unwrap();
        assert_eq!(flags.numeric().unwrap(), vec![0.0, 1.0, 0.0, 0.0, 1.0]);
        let text = cat.read_field("/obs/barcode", false).unwrap();
        assert!(text.numeric().is_none());
        let var = cat.read_field("/var/highly_variable", false).unwrap();
        assert_eq!(var.values.len(), 2);
        assert!(matches!(
            cat.read_field("/obs/absent", false),
            Err(CloudError::MissingDataset(_))
        ));
    }
}
