//! # vismatch-search
//!
//! Query-time matching for the visual product matcher.
//!
//! - [`Matcher`]: exact cosine scan with an inclusive threshold and a
//!   first-occurrence tie-break, optionally split across rayon workers
//! - [`VisualSearchService`]: long-lived owner of the index cell, the
//!   extractor state and the upload stager

pub mod error;
pub mod matcher;
pub mod service;

pub use error::SearchError;
pub use matcher::{cosine_similarity, match_query, Matcher};
pub use service::{ServiceConfig, ServiceStatus, VisualSearchService};
