use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::apply::{apply_patch, ContentPolicy};
use crate::error::PatchingError;
use crate::image::InstalledImage;
use crate::rollback::rollback_patch;

pub const BUNDLE_MANIFEST_FILE: &str = "bundle.toml";

/// Manifest of a multi-patch bundle: member patches in apply order, each
/// an unpacked patch directory relative to the bundle root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub patches: Vec<BundleEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub path: String,
}

impl BundleManifest {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let manifest: Self =
            toml::from_str(raw).context("failed to parse bundle manifest")?;
        if manifest.patches.is_empty() {
            return Err(anyhow!("bundle manifest lists no patches"));
        }
        for entry in &manifest.patches {
            if entry.path.is_empty() || entry.path.starts_with('/') || entry.path.contains("..") {
                return Err(anyhow!("invalid bundle member path: '{}'", entry.path));
            }
        }
        Ok(manifest)
    }
}

/// Apply every member of a bundle in order, committing each before moving
/// on. If any member fails, members already committed are rolled back in
/// reverse so the installation ends up with none of the bundle applied.
pub fn apply_bundle(
    root: &Path,
    identity_name: &str,
    bundle_dir: &Path,
    policy: ContentPolicy,
) -> Result<Vec<String>, PatchingError> {
    let manifest_path = bundle_dir.join(BUNDLE_MANIFEST_FILE);
    let raw = fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read bundle manifest: {}", manifest_path.display()))?;
    let manifest = BundleManifest::from_toml_str(&raw)?;
    info!(members = manifest.patches.len(), "applying patch bundle");

    let mut committed: Vec<String> = Vec::new();
    for entry in &manifest.patches {
        // Reloaded per member so each apply sees the previous commits.
        let image = InstalledImage::load(root, identity_name)?;
        let member_dir = bundle_dir.join(&entry.path);
        let outcome = apply_patch(&image, &member_dir, policy)
            .and_then(|staged| {
                let id = staged.patch_id().to_string();
                staged.commit()?;
                Ok(id)
            });
        match outcome {
            Ok(id) => {
                info!(patch_id = %id, "bundle member committed");
                committed.push(id);
            }
            Err(err) => {
                error!(member = %entry.path, %err, "bundle member failed, rolling back");
                unwind_bundle(root, identity_name, &committed)?;
                return Err(err);
            }
        }
    }
    Ok(committed)
}

/// Roll back already-committed bundle members, newest first. The members
/// were just applied, so conflicts only arise from interference and are
/// overridden to guarantee the unwind completes.
fn unwind_bundle(
    root: &Path,
    identity_name: &str,
    committed: &[String],
) -> Result<(), PatchingError> {
    for id in committed.iter().rev() {
        let image = InstalledImage::load(root, identity_name)?;
        match rollback_patch(&image, id, ContentPolicy::OverrideAll, false, false) {
            Ok(_) => warn!(patch_id = %id, "bundle member rolled back"),
            Err(err) => {
                return Err(PatchingError::Other(anyhow!(
                    "bundle unwind failed at patch '{id}': {err}"
                )));
            }
        }
    }
    Ok(())
}
