//! # vismatch-types
//!
//! Shared domain types for the visual product matcher.
//!
//! This crate defines the data structures every other crate speaks:
//! - [`FeatureVector`]: fixed-length embedding of an image
//! - [`CatalogItemId`]: opaque reference to an item in the external catalog
//! - [`MatchResult`]: the answer to a visual query
//! - [`Settings`]: layered configuration
//! - [`VisualMatchError`] / [`ErrorKind`]: the error taxonomy surfaced at
//!   every boundary that wraps the core
//!
//! ## Usage
//!
//! ```rust
//! use vismatch_types::{CatalogItemId, MatchResult};
//!
//! let hit = MatchResult::hit(CatalogItemId::new(7), 0.91);
//! assert!(hit.found);
//! ```

pub mod config;
pub mod error;
pub mod matching;
pub mod vector;

pub use config::{ExtractorSettings, Settings, DEFAULT_MATCH_THRESHOLD};
pub use error::{ErrorKind, VisualMatchError};
pub use matching::MatchResult;
pub use vector::{l2_norm, CatalogItemId, FeatureVector};
