use anyhow::{Context, Result};
use patchbay_core::{ContentItem, TargetState};
use semver::Version;
use tracing::{debug, info, warn};

use crate::apply::{
    ensure_no_operation_in_progress, is_conflicting, load_rollback_record,
    record_renaming_failure, ContentPolicy,
};
use crate::error::PatchingError;
use crate::fs_utils::{copy_dir_recursive, remove_dir_if_exists, remove_file_if_exists};
use crate::image::{InstalledImage, PatchableTarget, TargetKind};
use crate::layout::{CONFIGURATION_BACKUP_DIR, MISC_BACKUP_DIR};

/// Result of a rollback: every patch undone (newest first) and the version
/// the installation ended up at.
#[derive(Debug)]
pub struct RollbackOutcome {
    pub rolled_back: Vec<String>,
    pub restored_version: Version,
}

/// Roll back to the state before `patch_id` was applied. Rolling back a
/// patch that is not the newest one undoes everything applied after it
/// first, strictly newest to oldest, so the installation never holds a
/// patch without the patches it was built on. That cascade only happens
/// when `rollback_to` is set; otherwise a non-newest patch is an error.
pub fn rollback_patch(
    image: &InstalledImage,
    patch_id: &str,
    policy: ContentPolicy,
    reset_configuration: bool,
    rollback_to: bool,
) -> Result<RollbackOutcome, PatchingError> {
    ensure_no_operation_in_progress(image.layout())?;

    let identity_target = image.identity_target();
    let identity_state = image.load_target_state(&identity_target)?;
    let applied = applied_order(&identity_state);
    let position = applied.iter().position(|id| id == patch_id).ok_or_else(|| {
        PatchingError::CannotRollback(format!("patch '{patch_id}' is not applied"))
    })?;
    if !rollback_to && position + 1 != applied.len() {
        return Err(PatchingError::CannotRollback(format!(
            "patch '{patch_id}' is not the most recently applied patch"
        )));
    }

    let mut rolled_back = Vec::new();
    let mut restored_version = image.version().clone();
    for id in applied[position..].iter().rev() {
        restored_version = rollback_one(image, id, policy, reset_configuration)?;
        rolled_back.push(id.clone());
    }

    info!(
        patch_id,
        cascade = rolled_back.len(),
        version = %restored_version,
        "rollback complete"
    );
    Ok(RollbackOutcome {
        rolled_back,
        restored_version,
    })
}

/// Roll back the most recently applied patch.
pub fn rollback_last(
    image: &InstalledImage,
    policy: ContentPolicy,
    reset_configuration: bool,
) -> Result<RollbackOutcome, PatchingError> {
    let identity_state = image.load_target_state(&image.identity_target())?;
    let last = identity_state
        .last_applied()
        .ok_or(PatchingError::NoPatchesApplied)?
        .to_string();
    rollback_patch(image, &last, policy, reset_configuration, false)
}

/// Undo a single patch that is currently the newest applied one. States are
/// re-read from disk, so cascading callers see each step's effect.
fn rollback_one(
    image: &InstalledImage,
    patch_id: &str,
    policy: ContentPolicy,
    reset_configuration: bool,
) -> Result<Version, PatchingError> {
    let layout = image.layout();
    let record = load_rollback_record(layout, patch_id)
        .map_err(|err| PatchingError::CannotRollback(format!("{err:#}")))?;
    debug!(patch_id, "rolling back patch");

    // The inverse modifications carry the hash the patch installed as their
    // existing hash, so the apply-side conflict rule applies unchanged.
    let mut conflicts = Vec::new();
    for inverse in &record.modifications {
        let ContentItem::MiscFile { path } = &inverse.item else {
            continue;
        };
        let current = crate::resolve::current_misc_hash(image, path)?;
        if is_conflicting(inverse, current.as_deref()) {
            conflicts.push(inverse.item.clone());
        }
    }
    let mut element_targets = Vec::new();
    for element in &record.elements {
        let target = element_target(element.layer.clone(), element.layer_kind);
        for inverse in &element.modifications {
            let current = crate::resolve::current_module_hash(image, &target, &inverse.item)?;
            if is_conflicting(inverse, current.as_deref()) {
                conflicts.push(inverse.item.clone());
            }
        }
        element_targets.push(target);
    }
    if conflicts.iter().any(|item| !policy.overrides(item)) {
        return Err(PatchingError::Conflicts(conflicts));
    }
    if !conflicts.is_empty() {
        warn!(patch_id, overridden = conflicts.len(), "rollback conflicts overridden by policy");
    }

    // Misc content comes back from the backups taken when the patch was
    // applied.
    let history = layout.patch_history_dir(patch_id);
    let backup_root = history.join(MISC_BACKUP_DIR);
    for inverse in &record.modifications {
        let ContentItem::MiscFile { path } = &inverse.item else {
            continue;
        };
        if inverse.new_hash.is_some() {
            let mut source = backup_root.clone();
            for segment in path.split('/') {
                source.push(segment);
            }
            crate::apply::install_misc_file(layout, path, &source)?;
        } else {
            let live = layout.misc_file_path(path);
            if let Err(err) = remove_file_if_exists(&live) {
                warn!(path = %live.display(), %err, "failed to remove misc file, deferring");
                record_renaming_failure(layout, &live)?;
            }
        }
    }

    // Dropping the overlay directory undoes every module change at once.
    for (element, target) in record.elements.iter().zip(&element_targets) {
        if let Some(overlay) = layout.overlay_dir(target, &element.element_id) {
            remove_dir_if_exists(&overlay)
                .with_context(|| format!("failed to remove overlay: {}", overlay.display()))?;
        }
        image.store_target_state(target, &element.prior_state)?;
    }
    image.store_identity_state(&record.prior_identity_state, &record.restored_version)?;

    if reset_configuration {
        restore_configuration(image, patch_id)?;
    }

    // The history entry goes with the patch; re-applying the same id
    // starts from a fresh record.
    remove_dir_if_exists(&history)
        .with_context(|| format!("failed to remove history entry: {}", history.display()))?;

    Ok(record.restored_version)
}

/// Replace the live configuration directory with the snapshot taken when
/// the patch was applied.
fn restore_configuration(image: &InstalledImage, patch_id: &str) -> Result<(), PatchingError> {
    let layout = image.layout();
    let backup = layout
        .patch_history_dir(patch_id)
        .join(CONFIGURATION_BACKUP_DIR);
    if !backup.is_dir() {
        debug!(patch_id, "no configuration snapshot to restore");
        return Ok(());
    }
    let live = layout.configuration_dir();
    remove_dir_if_exists(&live)
        .with_context(|| format!("failed to clear configuration: {}", live.display()))?;
    copy_dir_recursive(&backup, &live)?;
    info!(patch_id, "configuration restored from snapshot");
    Ok(())
}

/// Applied patch ids, oldest first.
pub(crate) fn applied_order(state: &TargetState) -> Vec<String> {
    let mut ids: Vec<String> = state.cumulative.iter().cloned().collect();
    ids.extend(state.one_offs.iter().cloned());
    ids
}

pub(crate) fn element_target(name: String, kind: patchbay_core::LayerKind) -> PatchableTarget {
    PatchableTarget {
        name,
        kind: match kind {
            patchbay_core::LayerKind::Layer => TargetKind::Layer,
            patchbay_core::LayerKind::AddOn => TargetKind::AddOn,
        },
    }
}
