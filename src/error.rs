//! Crate-level error types.

use std::fmt;

/// Errors produced by the cellcloud crate.
#[derive(Debug)]
pub enum CloudError {
    /// Structurally inconsistent data: a malformed sparse matrix, container
    /// header, or embedding table.
    Format(String),
    /// Annotation path outside the recognized `/obs`, `/var`, `/uns`
    /// sections.
    Path(String),
    /// Gene or cell index outside the loaded range.
    Index {
        /// What was being indexed ("gene", "cell", "annotation").
        kind: &'static str,
        /// The offending index.
        index: usize,
        /// Number of valid entries.
        len: usize,
    },
    /// A dataset path that the store does not contain.
    MissingDataset(String),
    /// A numeric operation was requested on a text field.
    NonNumeric(String),
    /// The store access guard was poisoned by a panicking reader.
    StorePoisoned,
    /// An option value outside its legal range.
    InvalidOption(String),
    /// Generic I/O failure.
    Io(std::io::Error),
    /// Failed to spawn the background reload thread.
    ThreadSpawn(std::io::Error),
    /// TOML options parsing/serialization failure.
    OptionsParse(String),
}

impl CloudError {
    /// Shorthand for an out-of-range gene index.
    #[must_use]
    pub fn gene_index(index: usize, len: usize) -> Self {
        Self::Index {
            kind: "gene",
            index,
            len,
        }
    }

    /// Shorthand for an out-of-range cell index.
    #[must_use]
    pub fn cell_index(index: usize, len: usize) -> Self {
        Self::Index {
            kind: "cell",
            index,
            len,
        }
    }
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(msg) => write!(f, "format error: {msg}"),
            Self::Path(path) => write!(
                f,
                "path error: '{path}' is not under /obs, /var or /uns"
            ),
            Self::Index { kind, index, len } => {
                write!(f, "{kind} index {index} out of range (0..{len})")
            }
            Self::MissingDataset(path) => {
                write!(f, "dataset '{path}' not found in store")
            }
            Self::NonNumeric(path) => {
                write!(f, "field '{path}' is not numeric")
            }
            Self::StorePoisoned => write!(f, "store access guard poisoned"),
            Self::InvalidOption(msg) => write!(f, "invalid option: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::ThreadSpawn(e) => {
                write!(f, "failed to spawn thread: {e}")
            }
            Self::OptionsParse(msg) => {
                write!(f, "options parse error: {msg}")
            }
        }
    }
}

impl std::error::Error for CloudError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::ThreadSpawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CloudError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
