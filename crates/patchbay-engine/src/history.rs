use std::collections::BTreeSet;
use std::fs;

use patchbay_core::{Patch, PatchType, RollbackRecord};
use tracing::warn;

use crate::apply::load_rollback_record;
use crate::error::PatchingError;
use crate::image::InstalledImage;
use crate::layout::PATCH_METADATA_FILE;

/// One applied patch in the history chain, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub patch_id: String,
    pub patch_type: Option<PatchType>,
    /// False when the rollback record is missing or unreadable; the patch
    /// is still applied but cannot be undone, and nothing older than it
    /// can be reached.
    pub rollback_usable: bool,
}

#[derive(Debug)]
pub(crate) struct ChainEntry {
    pub id: String,
    pub record: Option<RollbackRecord>,
}

/// Walk the applied-patch chain from the most recent patch backwards along
/// each rollback record's previous pointer. A missing or unreadable record
/// ends the walk; that entry is still part of the chain.
pub(crate) fn walk_chain(image: &InstalledImage) -> Result<Vec<ChainEntry>, PatchingError> {
    let identity_state = image.load_target_state(&image.identity_target())?;
    let mut chain = Vec::new();
    let mut seen = BTreeSet::new();
    let mut next = identity_state.last_applied().map(ToString::to_string);
    while let Some(id) = next {
        if !seen.insert(id.clone()) {
            warn!(patch_id = %id, "history chain loops, stopping walk");
            break;
        }
        match load_rollback_record(image.layout(), &id) {
            Ok(record) => {
                next = record.previous_patch_id.clone();
                chain.push(ChainEntry {
                    id,
                    record: Some(record),
                });
            }
            Err(err) => {
                warn!(patch_id = %id, %err, "rollback record unreadable, history truncated");
                chain.push(ChainEntry { id, record: None });
                break;
            }
        }
    }
    Ok(chain)
}

/// The applied-patch history, newest first.
pub fn patch_history(image: &InstalledImage) -> Result<Vec<HistoryEntry>, PatchingError> {
    let chain = walk_chain(image)?;
    let mut entries = Vec::with_capacity(chain.len());
    for entry in chain {
        let patch_type = match &entry.record {
            Some(record) => Some(record.patch_type),
            None => read_history_patch_type(image, &entry.id),
        };
        entries.push(HistoryEntry {
            patch_id: entry.id,
            rollback_usable: entry.record.is_some(),
            patch_type,
        });
    }
    Ok(entries)
}

/// Fall back to the archived patch metadata when the rollback record is
/// gone.
fn read_history_patch_type(image: &InstalledImage, patch_id: &str) -> Option<PatchType> {
    let path = image
        .layout()
        .patch_history_dir(patch_id)
        .join(PATCH_METADATA_FILE);
    let raw = fs::read_to_string(path).ok()?;
    Patch::from_toml_str(&raw)
        .ok()
        .map(|patch| patch.patch_type)
}
