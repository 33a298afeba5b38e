//! Catalog sources for the builder.
//!
//! The relational catalog lives outside this system; the builder only needs
//! `(id, image path)` pairs. A JSON manifest exported from the catalog is the
//! default source:
//!
//! ```json
//! [{"id": 1, "image": "productos_imagenes/shirt.jpg"}, {"id": 2, "image": null}]
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;
use vismatch_types::CatalogItemId;

use crate::error::BuildError;

/// One catalog item as seen by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: CatalogItemId,
    /// Absolute (or cwd-relative) image path; `None` when the item has no image
    pub image: Option<PathBuf>,
}

impl CatalogItem {
    pub fn new(id: i64, image: Option<PathBuf>) -> Self {
        Self {
            id: CatalogItemId::new(id),
            image,
        }
    }
}

/// Anything that can enumerate catalog items.
pub trait CatalogSource {
    fn items(&self) -> Result<Vec<CatalogItem>, BuildError>;
}

impl CatalogSource for Vec<CatalogItem> {
    fn items(&self) -> Result<Vec<CatalogItem>, BuildError> {
        Ok(self.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    id: i64,
    #[serde(default)]
    image: Option<String>,
}

/// JSON manifest on disk, image paths resolved against a media root.
#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    path: PathBuf,
    media_root: PathBuf,
}

impl ManifestCatalog {
    pub fn new(path: impl Into<PathBuf>, media_root: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            media_root: media_root.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolve(&self, image: &str) -> Option<PathBuf> {
        let image = image.trim();
        if image.is_empty() {
            return None;
        }
        let path = Path::new(image);
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(self.media_root.join(path))
        }
    }

    fn manifest_error(&self, reason: impl ToString) -> BuildError {
        BuildError::Manifest {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl CatalogSource for ManifestCatalog {
    fn items(&self) -> Result<Vec<CatalogItem>, BuildError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| self.manifest_error(e))?;
        let entries: Vec<ManifestEntry> =
            serde_json::from_str(&raw).map_err(|e| self.manifest_error(e))?;
        debug!(path = ?self.path, entries = entries.len(), "Read catalog manifest");

        Ok(entries
            .into_iter()
            .map(|entry| CatalogItem {
                id: CatalogItemId::new(entry.id),
                image: entry.image.as_deref().and_then(|i| self.resolve(i)),
            })
            .collect())
    }
}
