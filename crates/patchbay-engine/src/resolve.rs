use std::path::PathBuf;

use anyhow::Result;
use patchbay_core::{hash_directory, hash_file, ContentItem, TargetState};

use crate::image::{InstalledImage, PatchableTarget};
use crate::layout::MODULE_REMOVED_MARKER;

/// Resolve the directory currently providing a module for one target:
/// overlays of applied patches are consulted newest-first (one-offs in
/// reverse apply order, then the cumulative), falling back to the base
/// module root. Overlays are strictly per-target; another layer's overlays
/// are never consulted.
pub fn resolve_module_dir(
    image: &InstalledImage,
    target: &PatchableTarget,
    item: &ContentItem,
) -> Result<Option<PathBuf>> {
    let state = image.load_target_state(target)?;
    resolve_module_dir_with_state(image, target, &state, item)
}

pub fn resolve_module_dir_with_state(
    image: &InstalledImage,
    target: &PatchableTarget,
    state: &TargetState,
    item: &ContentItem,
) -> Result<Option<PathBuf>> {
    let Some(rel) = item.module_relative_path() else {
        return Ok(None);
    };

    for element_id in state
        .one_offs
        .iter()
        .rev()
        .chain(state.cumulative.iter())
    {
        let Some(overlay) = image.layout().overlay_dir(target, element_id) else {
            continue;
        };
        let candidate = overlay.join(&rel);
        if candidate.is_dir() {
            // A removal marker shadows the module for all older content.
            if candidate.join(MODULE_REMOVED_MARKER).exists() {
                return Ok(None);
            }
            return Ok(Some(candidate));
        }
    }

    if let Some(module_root) = image.layout().target_module_root(target) {
        let candidate = module_root.join(&rel);
        if candidate.is_dir() {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

pub fn current_module_hash(
    image: &InstalledImage,
    target: &PatchableTarget,
    item: &ContentItem,
) -> Result<Option<String>> {
    match resolve_module_dir(image, target, item)? {
        Some(dir) => Ok(Some(hash_directory(&dir)?)),
        None => Ok(None),
    }
}

pub fn current_misc_hash(image: &InstalledImage, rel: &str) -> Result<Option<String>> {
    let path = image.layout().misc_file_path(rel);
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(hash_file(&path)?))
}
