use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::image::{PatchableTarget, TargetKind};

/// File holding the patch metadata inside a bundle and a history directory.
pub const PATCH_METADATA_FILE: &str = "patch.toml";
/// Durable rollback record inside a history directory.
pub const ROLLBACK_RECORD_FILE: &str = "rollback.toml";
/// Backup tree of pre-patch misc file content inside a history directory.
pub const MISC_BACKUP_DIR: &str = "misc";
/// Staged misc content to install at commit; removed once committed.
pub const NEW_CONTENT_DIR: &str = "content";
/// Backup of the configuration directory taken at apply time.
pub const CONFIGURATION_BACKUP_DIR: &str = "configuration";
/// Marker file inside an overlay module directory shadowing a removed module.
pub const MODULE_REMOVED_MARKER: &str = "module.removed";
/// Suffix of in-progress staging directories under the patches root.
pub const STAGING_SUFFIX: &str = ".staging";

/// Pure path derivation over an installation root. No I/O except
/// `ensure_base_dirs`; every patchable target's module root, overlay root
/// and state file location is a deterministic function of the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    root: PathBuf,
}

impl ImageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.root.join("modules")
    }

    pub fn layers_conf_path(&self) -> PathBuf {
        self.modules_dir().join("layers.conf")
    }

    pub fn layers_root(&self) -> PathBuf {
        self.modules_dir().join("system").join("layers")
    }

    pub fn add_ons_root(&self) -> PathBuf {
        self.modules_dir().join("system").join("add-ons")
    }

    /// Base (unpatched) module root of a layer or add-on. The identity has
    /// no module root; its content is misc files under the image root.
    pub fn target_module_root(&self, target: &PatchableTarget) -> Option<PathBuf> {
        match target.kind {
            TargetKind::Identity => None,
            TargetKind::Layer => Some(self.layers_root().join(&target.name)),
            TargetKind::AddOn => Some(self.add_ons_root().join(&target.name)),
        }
    }

    pub fn target_overlay_root(&self, target: &PatchableTarget) -> Option<PathBuf> {
        self.target_module_root(target)
            .map(|root| root.join(".overlays"))
    }

    pub fn overlay_dir(&self, target: &PatchableTarget, element_id: &str) -> Option<PathBuf> {
        self.target_overlay_root(target)
            .map(|root| root.join(element_id))
    }

    pub fn overlay_staging_dir(&self, target: &PatchableTarget, element_id: &str) -> Option<PathBuf> {
        self.target_overlay_root(target)
            .map(|root| root.join(format!("{element_id}{STAGING_SUFFIX}")))
    }

    pub fn installation_dir(&self) -> PathBuf {
        self.root.join(".installation")
    }

    pub fn patches_dir(&self) -> PathBuf {
        self.installation_dir().join("patches")
    }

    pub fn patch_history_dir(&self, patch_id: &str) -> PathBuf {
        self.patches_dir().join(patch_id)
    }

    pub fn history_staging_dir(&self, patch_id: &str) -> PathBuf {
        self.patches_dir().join(format!("{patch_id}{STAGING_SUFFIX}"))
    }

    pub fn identity_state_path(&self) -> PathBuf {
        self.installation_dir().join("identity.conf")
    }

    pub fn target_state_path(&self, target: &PatchableTarget) -> PathBuf {
        match target.kind {
            TargetKind::Identity => self.identity_state_path(),
            TargetKind::Layer => self
                .installation_dir()
                .join("layers")
                .join(format!("{}.conf", target.name)),
            TargetKind::AddOn => self
                .installation_dir()
                .join("add-ons")
                .join(format!("{}.conf", target.name)),
        }
    }

    pub fn cleanup_renaming_files_path(&self) -> PathBuf {
        self.installation_dir().join("cleanup-renaming-files")
    }

    pub fn configuration_dir(&self) -> PathBuf {
        self.root.join("configuration")
    }

    /// Live location of an identity misc file, addressed by its validated
    /// forward-slash relative path.
    pub fn misc_file_path(&self, rel: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in rel.split('/') {
            path.push(segment);
        }
        path
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.modules_dir(),
            self.layers_root(),
            self.add_ons_root(),
            self.installation_dir(),
            self.patches_dir(),
            self.installation_dir().join("layers"),
            self.installation_dir().join("add-ons"),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
