//! Reference-counted cleanup of asset files.
//!
//! Record mutations (pack update/delete, version delete) hand the filenames
//! they may have orphaned to [`collect`], which recomputes each file's
//! reference count from the record store and unlinks the file only when
//! nothing references it anymore. The count is recomputed from scratch per
//! call; nothing is cached between calls.
//!
//! Between the count reaching zero and the unlink, a concurrent record write
//! can re-introduce a reference to the same filename. That window is accepted:
//! requests are not serialized against each other and the deployment model is
//! a single operator mutating records. Callers wanting a stronger guarantee
//! must serialize their mutate-then-collect sequences per filename.

use std::fs;

use crate::blobs::{BlobStore, Category};
use crate::domain::Storage;

/// Why a candidate file was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainReason {
    /// At least one record still references the filename.
    StillReferenced,
    /// No storage category holds the file; deleting an already-absent file
    /// is a logged no-op, not an error.
    NotFound,
}

/// Per-candidate outcome of a collection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    Deleted { category: Category },
    Retained { reason: RetainReason },
    /// The count query or the unlink failed; the file stays on disk.
    Failed { error: String },
}

/// Outcome of one candidate filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectReport {
    pub file: String,
    pub outcome: CollectOutcome,
}

/// Deletes every candidate file whose reference count is zero.
///
/// Candidates are processed independently: a failure on one filename is
/// reported in its outcome and does not abort the rest of the batch.
pub fn collect<S: Storage>(
    storage: &mut S,
    blobs: &BlobStore,
    candidates: &[String],
) -> Vec<CollectReport> {
    candidates
        .iter()
        .map(|file| CollectReport {
            file: file.clone(),
            outcome: collect_one(storage, blobs, file),
        })
        .collect()
}

fn collect_one<S: Storage>(storage: &mut S, blobs: &BlobStore, file: &str) -> CollectOutcome {
    let references = match storage.asset_reference_count(file) {
        Ok(count) => count,
        Err(e) => {
            tracing::error!("reference count for '{file}' failed: {e}");
            return CollectOutcome::Failed {
                error: e.to_string(),
            };
        }
    };

    if references > 0 {
        tracing::debug!("keeping '{file}': {references} live reference(s)");
        return CollectOutcome::Retained {
            reason: RetainReason::StillReferenced,
        };
    }

    let Some((category, path)) = blobs.resolve(file) else {
        tracing::info!("file not found for deletion: {file}");
        return CollectOutcome::Retained {
            reason: RetainReason::NotFound,
        };
    };

    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::info!("deleted file: {}", path.display());
            CollectOutcome::Deleted { category }
        }
        Err(e) => {
            tracing::error!("could not delete '{}': {e}", path.display());
            CollectOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}
