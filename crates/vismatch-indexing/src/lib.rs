//! Offline index builder for the visual product matcher.
//!
//! ## Key Components
//!
//! - [`CatalogSource`]: enumerates `(id, image)` pairs; [`ManifestCatalog`]
//!   reads them from a JSON export of the catalog
//! - [`IndexBuilder`]: extracts a vector per item and publishes the pair
//! - [`BuildReport`]: per-item outcomes and the final counts
//! - [`ProgressCallback`]: progress hooks, with a logging implementation
//!
//! One item's failure never aborts the batch. A run publishes when at least
//! one item was extracted and otherwise returns
//! [`BuildError::NothingExtracted`] without touching the existing index.

pub mod builder;
pub mod catalog;
pub mod error;

pub use builder::{
    BuildConfig, BuildProgress, BuildReport, IndexBuilder, ItemOutcome, ItemReport,
    LoggingProgressCallback, NoOpProgressCallback, ProgressCallback,
};
pub use catalog::{CatalogItem, CatalogSource, ManifestCatalog};
pub use error::BuildError;
