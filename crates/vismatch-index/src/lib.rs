//! # vismatch-index
//!
//! Persisted embedding index for the visual product matcher.
//!
//! The index is a pair of NPY arrays written by the offline builder: a
//! `(N, D)` matrix of `f32` feature vectors and a parallel `(N,)` array of
//! `i64` catalog ids. This crate provides:
//! - [`codec`]: reading and atomically publishing the file pair
//! - [`EmbeddingIndex`]: the read-only in-memory table scanned at query time
//! - [`IndexCell`]: load-once, failure-caching holder of the served index
//!
//! ## Lifecycle
//! The index is produced wholesale, loaded wholesale and replaced wholesale.
//! There is no in-place mutation; a rebuilt index becomes visible to a running
//! service only through [`IndexCell::reload`].

pub mod codec;
pub mod error;
pub mod index;
pub mod loader;

pub use codec::{read, write, IndexFiles};
pub use error::IndexError;
pub use index::{EmbeddingIndex, IndexStats};
pub use loader::{IndexCell, IndexLoadState};
