//! Match decision returned to callers of a visual query.

use serde::{Deserialize, Serialize};

use crate::vector::CatalogItemId;

/// Outcome of matching one query image against the index.
///
/// `score` is the best cosine similarity seen during the scan. It is reported
/// on a miss as well, so callers can log how close the nearest item was.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Whether the best score cleared the threshold
    pub found: bool,
    /// Matched catalog item (only set when `found`)
    pub item_id: Option<CatalogItemId>,
    /// Best similarity in [-1, 1]
    pub score: f32,
}

impl MatchResult {
    pub fn hit(item_id: CatalogItemId, score: f32) -> Self {
        Self {
            found: true,
            item_id: Some(item_id),
            score,
        }
    }

    pub fn miss(best_score: f32) -> Self {
        Self {
            found: false,
            item_id: None,
            score: best_score,
        }
    }

    /// Result for an index with nothing to compare against.
    pub fn empty() -> Self {
        Self::miss(0.0)
    }

    /// Human-readable one-liner for CLI and log output.
    pub fn describe(&self) -> String {
        match self.item_id {
            Some(id) if self.found => {
                format!("Matched catalog item {} (similarity {:.2})", id, self.score)
            }
            _ => format!(
                "No sufficiently similar item found. Best similarity: {:.2}",
                self.score
            ),
        }
    }
}
