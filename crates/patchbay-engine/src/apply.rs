use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use patchbay_core::{
    hash_directory, hash_file, ContentItem, ContentModification, LayerKind, ModificationKind,
    Patch, PatchType, RollbackElement, RollbackRecord, TargetState,
};
use semver::Version;
use tracing::{debug, info, warn};

use crate::error::PatchingError;
use crate::fs_utils::{copy_dir_recursive, remove_dir_if_exists, remove_file_if_exists};
use crate::image::{InstalledImage, PatchableTarget, TargetKind};
use crate::layout::{
    ImageLayout, CONFIGURATION_BACKUP_DIR, MISC_BACKUP_DIR, MODULE_REMOVED_MARKER,
    NEW_CONTENT_DIR, PATCH_METADATA_FILE, ROLLBACK_RECORD_FILE, STAGING_SUFFIX,
};
use crate::resolve::{current_misc_hash, current_module_hash};

/// How content conflicts are handled: abort on any (strict), clobber
/// module-content divergence only, or clobber everything. The escape
/// hatches exist for operators who know local modifications should lose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentPolicy {
    #[default]
    Strict,
    IgnoreModuleChanges,
    OverrideAll,
}

impl ContentPolicy {
    pub fn overrides(&self, item: &ContentItem) -> bool {
        match self {
            Self::Strict => false,
            Self::IgnoreModuleChanges => item.is_module(),
            Self::OverrideAll => true,
        }
    }
}

#[derive(Debug)]
enum MiscCommitOp {
    Install { rel: String, source: PathBuf },
    Remove { rel: String },
}

#[derive(Debug)]
enum MiscOutcome {
    Install { source: PathBuf, hash: String },
    Delete,
}

/// Cleans up staging directories unless the apply was committed.
#[derive(Debug)]
struct StagingGuard {
    paths: Vec<PathBuf>,
    disarmed: bool,
}

impl StagingGuard {
    fn new() -> Self {
        Self {
            paths: Vec::new(),
            disarmed: false,
        }
    }

    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.disarmed {
            return;
        }
        for path in &self.paths {
            if let Err(err) = remove_dir_if_exists(path) {
                warn!(path = %path.display(), %err, "failed to remove staged patch content");
            }
        }
    }
}

/// A fully staged patch application, waiting for the second phase. Nothing
/// is visible to the installation until `commit`; dropping or aborting
/// removes the staged content and leaves the image untouched.
#[derive(Debug)]
pub struct PatchingResult {
    layout: ImageLayout,
    patch_id: String,
    new_version: Version,
    staged_history: PathBuf,
    final_history: PathBuf,
    overlays: Vec<(PathBuf, PathBuf)>,
    misc_ops: Vec<MiscCommitOp>,
    state_writes: Vec<(PathBuf, TargetState, Option<Version>)>,
    guard: StagingGuard,
}

impl PatchingResult {
    pub fn patch_id(&self) -> &str {
        &self.patch_id
    }

    pub fn new_version(&self) -> &Version {
        &self.new_version
    }

    /// Finalize the staged apply: rename the history entry into place,
    /// swap misc files, rename the overlay staging dirs, persist the new target
    /// states. A misc file whose swap fails is recorded in the
    /// cleanup-renaming-files ref list for deferred retry instead of
    /// failing the whole commit.
    pub fn commit(mut self) -> Result<(), PatchingError> {
        // The history entry lands first: it carries the only backups of the
        // misc files the swaps below overwrite, and must survive a commit
        // that fails partway.
        remove_dir_if_exists(&self.final_history).with_context(|| {
            format!("failed to clear history dir: {}", self.final_history.display())
        })?;
        fs::rename(&self.staged_history, &self.final_history).with_context(|| {
            format!(
                "failed to commit history {} -> {}",
                self.staged_history.display(),
                self.final_history.display()
            )
        })?;

        for op in &self.misc_ops {
            match op {
                MiscCommitOp::Install { rel, source } => {
                    // Staged sources moved along with the history rename.
                    let source = match source.strip_prefix(&self.staged_history) {
                        Ok(rel_source) => self.final_history.join(rel_source),
                        Err(_) => source.clone(),
                    };
                    install_misc_file(&self.layout, rel, &source)?;
                }
                MiscCommitOp::Remove { rel } => {
                    let path = self.layout.misc_file_path(rel);
                    if let Err(err) = remove_file_if_exists(&path) {
                        warn!(path = %path.display(), %err, "failed to remove misc file, deferring");
                        record_renaming_failure(&self.layout, &path)?;
                    }
                }
            }
        }

        for (staging, final_dir) in &self.overlays {
            remove_dir_if_exists(final_dir)
                .with_context(|| format!("failed to clear overlay: {}", final_dir.display()))?;
            fs::rename(staging, final_dir).with_context(|| {
                format!(
                    "failed to commit overlay {} -> {}",
                    staging.display(),
                    final_dir.display()
                )
            })?;
        }

        // Staged misc content was only commit input; the history entry
        // keeps metadata and backups.
        remove_dir_if_exists(&self.final_history.join(NEW_CONTENT_DIR)).with_context(|| {
            format!(
                "failed to remove staged content under {}",
                self.final_history.display()
            )
        })?;

        for (path, state, version) in &self.state_writes {
            crate::image::write_state_file(path, state, version.as_ref())?;
        }

        self.guard.disarm();
        info!(patch_id = %self.patch_id, version = %self.new_version, "patch committed");
        Ok(())
    }

    /// Discard the staged apply. The installation is left exactly as it
    /// was before `apply_patch`.
    pub fn abort(self) {
        debug!(patch_id = %self.patch_id, "staged patch aborted");
        // Guard drop removes the staging directories.
    }
}

/// Validate, conflict-check and stage a patch from an unpacked bundle
/// directory. Returns the staged result; no live state is touched until
/// `PatchingResult::commit`.
pub fn apply_patch(
    image: &InstalledImage,
    bundle_dir: &Path,
    policy: ContentPolicy,
) -> Result<PatchingResult, PatchingError> {
    ensure_no_operation_in_progress(image.layout())?;

    let metadata_path = bundle_dir.join(PATCH_METADATA_FILE);
    let raw = fs::read_to_string(&metadata_path)
        .with_context(|| format!("failed to read patch metadata: {}", metadata_path.display()))?;
    let patch = Patch::from_toml_str(&raw)?;
    debug!(patch_id = %patch.patch_id, patch_type = patch.patch_type.as_str(), "applying patch");

    // Applicability checks come before anything touches the filesystem.
    if patch.identity_name != image.identity_name() {
        return Err(anyhow!(
            "patch targets identity '{}', installation is '{}'",
            patch.identity_name,
            image.identity_name()
        )
        .into());
    }
    if patch.applies_to_version != *image.version() {
        return Err(PatchingError::VersionMismatch {
            applies_to: patch.applies_to_version.to_string(),
            current: image.version().to_string(),
        });
    }

    let identity_target = image.identity_target();
    let identity_state = image.load_target_state(&identity_target)?;
    if identity_state.is_applied(&patch.patch_id) {
        return Err(PatchingError::AlreadyApplied(patch.patch_id.clone()));
    }
    for required in &patch.requires {
        if !identity_state.is_applied(required) {
            return Err(PatchingError::MissingRequirement(required.clone()));
        }
    }
    for incompatible in &patch.incompatible_with {
        if identity_state.is_applied(incompatible) {
            return Err(PatchingError::Incompatible(incompatible.clone()));
        }
    }

    let mut element_targets = Vec::new();
    for element in &patch.elements {
        let kind = match element.layer_kind {
            LayerKind::Layer => TargetKind::Layer,
            LayerKind::AddOn => TargetKind::AddOn,
        };
        if !image.has_target(&element.layer, kind) {
            return Err(PatchingError::NoSuchTarget {
                kind: kind.as_str(),
                name: element.layer.clone(),
            });
        }
        let target = PatchableTarget {
            name: element.layer.clone(),
            kind,
        };
        let state = image.load_target_state(&target)?;
        if state.is_applied(&element.id) {
            return Err(PatchingError::AlreadyApplied(element.id.clone()));
        }
        element_targets.push((target, state));
    }

    // Conflict scan: the complete set is collected before deciding, so the
    // caller always sees every divergent item at once.
    let mut conflicts = Vec::new();
    let mut misc_current = BTreeMap::new();
    for modification in &patch.modifications {
        let ContentItem::MiscFile { path } = &modification.item else {
            continue;
        };
        let current = current_misc_hash(image, path)?;
        if is_conflicting(modification, current.as_deref()) {
            conflicts.push(modification.item.clone());
        }
        misc_current.insert(path.clone(), current);
    }
    let mut module_current = Vec::new();
    for (element, (target, _)) in patch.elements.iter().zip(&element_targets) {
        let mut hashes = Vec::new();
        for modification in &element.modifications {
            let current = current_module_hash(image, target, &modification.item)?;
            if is_conflicting(modification, current.as_deref()) {
                conflicts.push(modification.item.clone());
            }
            hashes.push(current);
        }
        module_current.push(hashes);
    }

    // Plan the final misc state: for a cumulative patch the surviving
    // content of every superseded patch is undone first (oldest restore
    // wins), then the patch's own modifications take precedence. Each
    // restore is conflict-checked like the patch's own modifications: the
    // newest record naming a path describes what is live now, and a
    // divergence means a local edit the restore would destroy.
    let mut final_misc: BTreeMap<String, MiscOutcome> = BTreeMap::new();
    if patch.patch_type == PatchType::Cumulative {
        for superseded in superseded_patch_ids(&identity_state) {
            debug!(patch_id = %superseded, "undoing superseded patch content");
            let record = load_rollback_record(image.layout(), &superseded).with_context(|| {
                format!("cannot invalidate patch '{superseded}' for cumulative apply")
            })?;
            let backup_root = image
                .layout()
                .patch_history_dir(&superseded)
                .join(MISC_BACKUP_DIR);
            for inverse in &record.modifications {
                let ContentItem::MiscFile { path } = &inverse.item else {
                    continue;
                };
                if !misc_current.contains_key(path) && !final_misc.contains_key(path) {
                    let current = current_misc_hash(image, path)?;
                    if is_conflicting(inverse, current.as_deref()) {
                        conflicts.push(inverse.item.clone());
                    }
                }
                let outcome = match inverse.kind {
                    ModificationKind::Add | ModificationKind::Update => MiscOutcome::Install {
                        source: join_rel(&backup_root, path),
                        hash: inverse.new_hash.clone().ok_or_else(|| {
                            anyhow!("rollback record of '{superseded}' is missing a content hash")
                        })?,
                    },
                    ModificationKind::Remove => MiscOutcome::Delete,
                };
                final_misc.insert(path.clone(), outcome);
            }
        }
    }
    if conflicts.iter().any(|item| !policy.overrides(item)) {
        return Err(PatchingError::Conflicts(conflicts));
    }
    if !conflicts.is_empty() {
        warn!(
            patch_id = %patch.patch_id,
            overridden = conflicts.len(),
            "content conflicts overridden by policy"
        );
    }

    // Targets the cumulative carries no element for still lose their
    // one-offs; their prior states go into the rollback record alongside
    // the real elements so rollback restores them.
    let mut cleared_targets: Vec<(PatchableTarget, TargetState)> = Vec::new();
    if patch.patch_type == PatchType::Cumulative {
        for target in image.targets() {
            if target.kind == TargetKind::Identity
                || element_targets.iter().any(|(existing, _)| existing == &target)
            {
                continue;
            }
            let state = image.load_target_state(&target)?;
            if !state.one_offs.is_empty() {
                cleared_targets.push((target, state));
            }
        }
    }

    let layout = image.layout().clone();
    let staged_history = layout.history_staging_dir(&patch.patch_id);
    let final_history = layout.patch_history_dir(&patch.patch_id);

    let mut guard = StagingGuard::new();
    guard.track(staged_history.clone());

    let staged = stage_patch(
        image,
        bundle_dir,
        &patch,
        &identity_state,
        &element_targets,
        &cleared_targets,
        &module_current,
        &misc_current,
        final_misc,
        &staged_history,
        &mut guard,
    );
    let (overlays, misc_ops) = match staged {
        Ok(parts) => parts,
        Err(err) => return Err(err.into()),
    };

    // New target states take effect at commit.
    let new_version = patch.effective_version().clone();
    let mut state_writes = Vec::new();
    let new_identity_state = advance_state(&identity_state, &patch.patch_id, patch.patch_type);
    state_writes.push((
        layout.identity_state_path(),
        new_identity_state,
        Some(new_version.clone()),
    ));
    for (element, (target, state)) in patch.elements.iter().zip(&element_targets) {
        state_writes.push((
            layout.target_state_path(target),
            advance_state(state, &element.id, patch.patch_type),
            None,
        ));
    }
    for (target, state) in &cleared_targets {
        state_writes.push((
            layout.target_state_path(target),
            TargetState {
                cumulative: state.cumulative.clone(),
                one_offs: Vec::new(),
            },
            None,
        ));
    }

    info!(patch_id = %patch.patch_id, "patch staged");
    Ok(PatchingResult {
        layout,
        patch_id: patch.patch_id,
        new_version,
        staged_history,
        final_history,
        overlays,
        misc_ops,
        state_writes,
        guard,
    })
}

#[allow(clippy::too_many_arguments)]
fn stage_patch(
    image: &InstalledImage,
    bundle_dir: &Path,
    patch: &Patch,
    identity_state: &TargetState,
    element_targets: &[(PatchableTarget, TargetState)],
    cleared_targets: &[(PatchableTarget, TargetState)],
    module_current: &[Vec<Option<String>>],
    misc_current: &BTreeMap<String, Option<String>>,
    mut final_misc: BTreeMap<String, MiscOutcome>,
    staged_history: &Path,
    guard: &mut StagingGuard,
) -> Result<(Vec<(PathBuf, PathBuf)>, Vec<MiscCommitOp>)> {
    let layout = image.layout();
    fs::create_dir_all(staged_history)
        .with_context(|| format!("failed to create {}", staged_history.display()))?;
    fs::write(staged_history.join(PATCH_METADATA_FILE), patch.to_toml_string()?)
        .with_context(|| format!("failed to write staged metadata under {}", staged_history.display()))?;

    let configuration = layout.configuration_dir();
    if configuration.is_dir() {
        copy_dir_recursive(&configuration, &staged_history.join(CONFIGURATION_BACKUP_DIR))?;
    }

    // Own misc content is staged and digest-verified before anything else.
    let content_root = staged_history.join(NEW_CONTENT_DIR);
    for modification in &patch.modifications {
        let ContentItem::MiscFile { path } = &modification.item else {
            continue;
        };
        match modification.kind {
            ModificationKind::Add | ModificationKind::Update => {
                let source = join_rel(&bundle_dir.join(MISC_BACKUP_DIR), path);
                let staged = join_rel(&content_root, path);
                if let Some(parent) = staged.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                fs::copy(&source, &staged).with_context(|| {
                    format!("failed to stage misc content: {}", source.display())
                })?;
                let expected = modification
                    .new_hash
                    .as_deref()
                    .unwrap_or_default();
                let actual = hash_file(&staged)?;
                if actual != expected {
                    return Err(anyhow!(
                        "bundle content for {} does not match its declared digest",
                        modification.item.describe()
                    ));
                }
                final_misc.insert(
                    path.clone(),
                    MiscOutcome::Install {
                        source: staged,
                        hash: actual,
                    },
                );
            }
            ModificationKind::Remove => {
                final_misc.insert(path.clone(), MiscOutcome::Delete);
            }
        }
    }

    // Back up every live misc file the commit will change or remove, and
    // derive the inverse modifications that restore the pre-apply state.
    let backup_root = staged_history.join(MISC_BACKUP_DIR);
    let mut misc_ops = Vec::new();
    let mut inverse_misc = Vec::new();
    for (rel, outcome) in &final_misc {
        let pre_hash = match misc_current.get(rel) {
            Some(current) => current.clone(),
            None => current_misc_hash(image, rel)?,
        };
        let live = layout.misc_file_path(rel);
        if live.is_file() {
            let backup = join_rel(&backup_root, rel);
            if let Some(parent) = backup.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::copy(&live, &backup)
                .with_context(|| format!("failed to back up misc file: {}", live.display()))?;
        }

        let post_hash = match outcome {
            MiscOutcome::Install { hash, .. } => Some(hash.clone()),
            MiscOutcome::Delete => None,
        };
        if let Some(inverse) = inverse_for(&ContentItem::misc_file(rel.clone()), pre_hash, post_hash)
        {
            inverse_misc.push(inverse);
        }
        misc_ops.push(match outcome {
            MiscOutcome::Install { source, .. } => MiscCommitOp::Install {
                rel: rel.clone(),
                source: source.clone(),
            },
            MiscOutcome::Delete => MiscCommitOp::Remove { rel: rel.clone() },
        });
    }

    // Module content goes into per-element overlay staging directories;
    // the live module roots are never written.
    let mut overlays = Vec::new();
    let mut rollback_elements = Vec::new();
    for ((element, (target, state)), hashes) in patch
        .elements
        .iter()
        .zip(element_targets)
        .zip(module_current)
    {
        let staging = layout
            .overlay_staging_dir(target, &element.id)
            .ok_or_else(|| anyhow!("target '{}' has no overlay root", target.name))?;
        let final_dir = layout
            .overlay_dir(target, &element.id)
            .ok_or_else(|| anyhow!("target '{}' has no overlay root", target.name))?;
        guard.track(staging.clone());
        fs::create_dir_all(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;

        let mut inverse_modules = Vec::new();
        for (modification, current) in element.modifications.iter().zip(hashes) {
            let rel = modification
                .item
                .module_relative_path()
                .ok_or_else(|| anyhow!("element modification is not a module"))?;
            match modification.kind {
                ModificationKind::Add | ModificationKind::Update => {
                    let source = bundle_dir.join(&element.id).join("modules").join(&rel);
                    let staged = staging.join(&rel);
                    copy_dir_recursive(&source, &staged).with_context(|| {
                        format!("failed to stage module content: {}", source.display())
                    })?;
                    let expected = modification.new_hash.as_deref().unwrap_or_default();
                    let actual = hash_directory(&staged)?;
                    if actual != expected {
                        return Err(anyhow!(
                            "bundle content for {} does not match its declared digest",
                            modification.item.describe()
                        ));
                    }
                }
                ModificationKind::Remove => {
                    let marker_dir = staging.join(&rel);
                    fs::create_dir_all(&marker_dir)
                        .with_context(|| format!("failed to create {}", marker_dir.display()))?;
                    fs::write(marker_dir.join(MODULE_REMOVED_MARKER), b"")
                        .with_context(|| "failed to write module removal marker".to_string())?;
                }
            }

            if let Some(inverse) = inverse_for(
                &modification.item,
                current.clone(),
                modification.new_hash.clone(),
            ) {
                inverse_modules.push(inverse);
            }
        }

        overlays.push((staging, final_dir));
        rollback_elements.push(RollbackElement {
            element_id: element.id.clone(),
            layer: element.layer.clone(),
            layer_kind: element.layer_kind,
            modifications: inverse_modules,
            prior_state: state.clone(),
        });
    }

    for (target, state) in cleared_targets {
        rollback_elements.push(RollbackElement {
            element_id: format!("{}-{}", target.name, patch.patch_id),
            layer: target.name.clone(),
            layer_kind: match target.kind {
                TargetKind::AddOn => LayerKind::AddOn,
                _ => LayerKind::Layer,
            },
            modifications: Vec::new(),
            prior_state: state.clone(),
        });
    }

    let record = RollbackRecord {
        patch_id: patch.patch_id.clone(),
        patch_type: patch.patch_type,
        identity_name: patch.identity_name.clone(),
        previous_patch_id: identity_state.last_applied().map(ToString::to_string),
        restored_version: image.version().clone(),
        modifications: inverse_misc,
        elements: rollback_elements,
        prior_identity_state: identity_state.clone(),
    };
    fs::write(
        staged_history.join(ROLLBACK_RECORD_FILE),
        record.to_toml_string()?,
    )
    .with_context(|| {
        format!("failed to write rollback record under {}", staged_history.display())
    })?;

    Ok((overlays, misc_ops))
}

/// The modification that takes the target from its post-apply state back to
/// the observed pre-apply state. None when both states are absent.
fn inverse_for(
    item: &ContentItem,
    pre_hash: Option<String>,
    post_hash: Option<String>,
) -> Option<ContentModification> {
    match (pre_hash, post_hash) {
        (Some(pre), Some(post)) => Some(ContentModification::update(item.clone(), post, pre)),
        (Some(pre), None) => Some(ContentModification::add(item.clone(), pre)),
        (None, Some(post)) => Some(ContentModification::remove(item.clone(), post)),
        (None, None) => None,
    }
}

pub(crate) fn is_conflicting(modification: &ContentModification, current: Option<&str>) -> bool {
    match modification.kind {
        ModificationKind::Add => current.is_some(),
        ModificationKind::Update | ModificationKind::Remove => {
            current != modification.existing_hash.as_deref()
        }
    }
}

/// Patches a cumulative apply supersedes, newest first.
fn superseded_patch_ids(identity_state: &TargetState) -> Vec<String> {
    let mut ids: Vec<String> = identity_state.one_offs.iter().rev().cloned().collect();
    ids.extend(identity_state.cumulative.iter().cloned());
    ids
}

fn advance_state(state: &TargetState, id: &str, patch_type: PatchType) -> TargetState {
    match patch_type {
        PatchType::Cumulative => TargetState {
            cumulative: Some(id.to_string()),
            one_offs: Vec::new(),
        },
        PatchType::OneOff => {
            let mut next = state.clone();
            next.one_offs.push(id.to_string());
            next
        }
    }
}

pub(crate) fn load_rollback_record(layout: &ImageLayout, patch_id: &str) -> Result<RollbackRecord> {
    let path = layout.patch_history_dir(patch_id).join(ROLLBACK_RECORD_FILE);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read rollback record: {}", path.display()))?;
    RollbackRecord::from_toml_str(&raw)
}

/// One patching operation at a time per installation: leftover staging
/// directories mean another apply or an interrupted one is in flight.
pub(crate) fn ensure_no_operation_in_progress(
    layout: &ImageLayout,
) -> Result<(), PatchingError> {
    let patches = layout.patches_dir();
    if !patches.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(&patches)
        .with_context(|| format!("failed to read patches dir: {}", patches.display()))?
    {
        let entry = entry.map_err(anyhow::Error::from)?;
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(STAGING_SUFFIX) {
                return Err(PatchingError::OperationInProgress);
            }
        }
    }
    Ok(())
}

pub(crate) fn install_misc_file(layout: &ImageLayout, rel: &str, source: &Path) -> Result<(), PatchingError> {
    let destination = layout.misc_file_path(rel);
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    // Swap via an adjacent temp file so the destination is replaced by a
    // rename, never left half-written. The suffix is appended so the real
    // extension stays part of the name.
    let file_name = destination
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("invalid misc path: {}", destination.display()))?;
    let tmp = destination.with_file_name(format!("{file_name}.patchtmp"));
    fs::copy(source, &tmp)
        .with_context(|| format!("failed to write misc content: {}", tmp.display()))?;
    if let Err(err) = fs::rename(&tmp, &destination) {
        warn!(path = %destination.display(), %err, "misc file swap failed, deferring");
        record_renaming_failure(layout, &destination)?;
        record_renaming_failure(layout, &tmp)?;
    }
    Ok(())
}

pub(crate) fn record_renaming_failure(layout: &ImageLayout, path: &Path) -> Result<(), PatchingError> {
    let ref_list = layout.cleanup_renaming_files_path();
    if let Some(parent) = ref_list.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&ref_list)
        .with_context(|| format!("failed to open renaming ref list: {}", ref_list.display()))?;
    writeln!(file, "{}", path.display())
        .with_context(|| format!("failed to append renaming ref list: {}", ref_list.display()))?;
    Ok(())
}

fn join_rel(root: &Path, rel: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in rel.split('/') {
        path.push(segment);
    }
    path
}
