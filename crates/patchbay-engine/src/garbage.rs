use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::error::PatchingError;
use crate::fs_utils::remove_dir_if_exists;
use crate::history::walk_chain;
use crate::image::{InstalledImage, TargetKind};
use crate::rollback::{applied_order, element_target};
use crate::layout::STAGING_SUFFIX;

/// Finds history and overlay directories no longer reachable from the
/// installation's applied state. Content is active while the history chain
/// or a target state still references it; anything else, including leftover
/// staging directories from an interrupted operation, is garbage.
#[derive(Debug)]
pub struct GarbageLocator<'a> {
    image: &'a InstalledImage,
    active: Option<ActiveSet>,
}

#[derive(Debug)]
struct ActiveSet {
    history: BTreeSet<String>,
    overlays: BTreeSet<PathBuf>,
}

/// What a garbage collection pass removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    pub removed_history: usize,
    pub removed_overlays: usize,
}

impl<'a> GarbageLocator<'a> {
    pub fn new(image: &'a InstalledImage) -> Self {
        Self {
            image,
            active: None,
        }
    }

    /// Drop the cached active set, forcing the next query to re-walk the
    /// history chain.
    pub fn reset(&mut self) {
        self.active = None;
    }

    /// History directories under the patches dir that no chain entry
    /// references.
    pub fn inactive_history(&mut self) -> Result<Vec<PathBuf>, PatchingError> {
        self.ensure_active()?;
        let Some(active) = &self.active else {
            return Ok(Vec::new());
        };
        let patches = self.image.layout().patches_dir();
        let mut inactive = Vec::new();
        if !patches.is_dir() {
            return Ok(inactive);
        }
        for entry in fs::read_dir(&patches)
            .with_context(|| format!("failed to read patches dir: {}", patches.display()))?
        {
            let entry = entry.map_err(anyhow::Error::from)?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let is_active = !name.ends_with(STAGING_SUFFIX) && active.history.contains(name);
            if !is_active {
                inactive.push(path);
            }
        }
        inactive.sort();
        Ok(inactive)
    }

    /// Overlay directories that neither the history chain nor any current
    /// target state references.
    pub fn inactive_overlays(&mut self) -> Result<Vec<PathBuf>, PatchingError> {
        self.ensure_active()?;
        let Some(active) = &self.active else {
            return Ok(Vec::new());
        };
        let mut inactive = Vec::new();
        for target in self.image.targets() {
            let Some(root) = self.image.layout().target_overlay_root(&target) else {
                continue;
            };
            if !root.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&root)
                .with_context(|| format!("failed to read overlay root: {}", root.display()))?
            {
                let entry = entry.map_err(anyhow::Error::from)?;
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let staging = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.ends_with(STAGING_SUFFIX))
                    .unwrap_or(false);
                if staging || !active.overlays.contains(&path) {
                    inactive.push(path);
                }
            }
        }
        inactive.sort();
        Ok(inactive)
    }

    /// Remove everything inactive and report what was deleted.
    pub fn delete_inactive_content(&mut self) -> Result<GcReport, PatchingError> {
        let mut report = GcReport::default();
        for path in self.inactive_history()? {
            debug!(path = %path.display(), "removing inactive history");
            remove_dir_if_exists(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            report.removed_history += 1;
        }
        for path in self.inactive_overlays()? {
            debug!(path = %path.display(), "removing inactive overlay");
            remove_dir_if_exists(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            report.removed_overlays += 1;
        }
        info!(
            history = report.removed_history,
            overlays = report.removed_overlays,
            "garbage collection finished"
        );
        Ok(report)
    }

    fn ensure_active(&mut self) -> Result<(), PatchingError> {
        if self.active.is_some() {
            return Ok(());
        }

        let mut history = BTreeSet::new();
        let mut overlays = BTreeSet::new();
        for entry in walk_chain(self.image)? {
            if let Some(record) = &entry.record {
                for element in &record.elements {
                    let target = element_target(element.layer.clone(), element.layer_kind);
                    if let Some(dir) = self
                        .image
                        .layout()
                        .overlay_dir(&target, &element.element_id)
                    {
                        overlays.insert(dir);
                    }
                }
            }
            history.insert(entry.id);
        }

        // Overlays referenced by a live target state stay, even when a
        // truncated chain no longer reaches the record that created them.
        for target in self.image.targets() {
            if target.kind == TargetKind::Identity {
                continue;
            }
            let state = self.image.load_target_state(&target)?;
            for id in applied_order(&state) {
                if let Some(dir) = self.image.layout().overlay_dir(&target, &id) {
                    overlays.insert(dir);
                }
            }
        }

        self.active = Some(ActiveSet { history, overlays });
        Ok(())
    }
}
