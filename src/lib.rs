// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints.

// Broad lint groups
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
// Documentation
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::bare_urls)]
// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]
// Complexity limits (thresholds in clippy.toml)
#![deny(clippy::cognitive_complexity)]
#![deny(clippy::too_many_lines)]
#![deny(clippy::excessive_nesting)]
// Function signature hygiene
#![deny(clippy::too_many_arguments)]
#![deny(clippy::fn_params_excessive_bools)]
// Clone / pass-by-value hygiene
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::implicit_clone)]
// String hygiene
#![deny(clippy::inefficient_to_string)]
#![deny(clippy::redundant_closure_for_method_calls)]
#![deny(clippy::manual_string_new)]
#![deny(clippy::str_to_string)]
// Cargo lints (warn, not deny since cargo lints can be noisy)
#![warn(clippy::cargo)]
// Unused / redundant code
#![deny(unused_results)]
#![deny(unused_qualifications)]
// Cast hygiene
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
// Numeric allowances: counts, codes and coordinates cross usize/f32/f64
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::float_cmp)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]

//! Renderer-ready 3D point clouds from sparse single-cell expression data.
//!
//! A dataset (CSC expression matrix, gene and cell tables, per-cell
//! annotations, 3D embedding) is loaded once from a [`store::DataStore`].
//! Every cell becomes one instance in a fixed-capacity [`batch::Batch`],
//! colored from either a normalized annotation or a rescaled gene.
//!
//! # Key entry points
//!
//! - [`cloud::PointCloud`] - the top-level object a renderer drives
//! - [`options::Options`] - runtime configuration (annotations, sampling,
//!   layout, color maps)
//! - [`store::StoreHandle`] - the single guarded handle over an AnnData
//!   `.zarr` directory, a `.cellc` cache file, or an in-memory store
//!
//! # Architecture
//!
//! Gene reloads run on a background [`refresh::RefreshController`] thread
//! that decodes and rescales off the render thread, then installs the new
//! [`encoding::ExpressionSet`] as one unit. The render thread picks it up in
//! [`cloud::PointCloud::update`], recolors every instance, and bumps each
//! batch's update counter and dirty flag so the renderer knows to re-upload.

pub mod annotations;
pub mod batch;
pub mod cloud;
pub mod dataset;
pub mod encoding;
pub mod error;
pub mod matrix;
pub mod options;
pub mod refresh;
pub mod store;

pub use cloud::PointCloud;
pub use error::CloudError;
pub use options::Options;
