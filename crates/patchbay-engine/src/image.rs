use std::fs;
use std::io;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use patchbay_core::TargetState;
use semver::Version;

use crate::layout::ImageLayout;

pub const BASE_LAYER: &str = "base";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Identity,
    Layer,
    AddOn,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Layer => "layer",
            Self::AddOn => "add-on",
        }
    }
}

/// A named, independently patchable component of the installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchableTarget {
    pub name: String,
    pub kind: TargetKind,
}

impl PatchableTarget {
    pub fn identity(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TargetKind::Identity,
        }
    }

    pub fn layer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TargetKind::Layer,
        }
    }

    pub fn add_on(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TargetKind::AddOn,
        }
    }
}

/// A product installation rooted at one directory: the identity plus its
/// layers and add-ons. Loaded fresh from disk at the start of every
/// patching operation; holds no state that outlives one operation.
#[derive(Debug, Clone)]
pub struct InstalledImage {
    layout: ImageLayout,
    identity_name: String,
    version: Version,
    layers: Vec<String>,
    add_ons: Vec<String>,
}

impl InstalledImage {
    pub fn load(root: impl AsRef<Path>, identity_name: &str) -> Result<Self> {
        let layout = ImageLayout::new(root.as_ref());

        let layers = read_layers_conf(&layout)?;
        let add_ons = read_add_ons(&layout)?;

        let identity_path = layout.identity_state_path();
        let (_, version) = read_state_file(&identity_path)?
            .ok_or_else(|| anyhow!("missing identity state: {}", identity_path.display()))?;
        let version = version.ok_or_else(|| {
            anyhow!("identity state has no version: {}", identity_path.display())
        })?;

        Ok(Self {
            layout,
            identity_name: identity_name.to_string(),
            version,
            layers,
            add_ons,
        })
    }

    /// Seed a fresh, unpatched installation: base directories, the layer
    /// configuration and the identity state at the given version. Layers
    /// are listed in precedence order; `base` is appended if absent.
    pub fn init(
        root: impl AsRef<Path>,
        identity_name: &str,
        version: &Version,
        layers: &[&str],
    ) -> Result<Self> {
        let layout = ImageLayout::new(root.as_ref());
        layout.ensure_base_dirs()?;

        let mut all_layers: Vec<String> = layers.iter().map(ToString::to_string).collect();
        if !all_layers.iter().any(|layer| layer == BASE_LAYER) {
            all_layers.push(BASE_LAYER.to_string());
        }

        let conf = layout.layers_conf_path();
        fs::write(&conf, format!("layers={}\n", all_layers.join(",")))
            .with_context(|| format!("failed to write layer configuration: {}", conf.display()))?;
        for layer in &all_layers {
            let dir = layout.layers_root().join(layer);
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create layer root: {}", dir.display()))?;
        }

        write_state_file(
            &layout.identity_state_path(),
            &TargetState::default(),
            Some(version),
        )?;
        Self::load(root, identity_name)
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn identity_name(&self) -> &str {
        &self.identity_name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    pub fn add_ons(&self) -> &[String] {
        &self.add_ons
    }

    pub fn identity_target(&self) -> PatchableTarget {
        PatchableTarget::identity(&self.identity_name)
    }

    pub fn has_target(&self, name: &str, kind: TargetKind) -> bool {
        match kind {
            TargetKind::Identity => name == self.identity_name,
            TargetKind::Layer => self.layers.iter().any(|layer| layer == name),
            TargetKind::AddOn => self.add_ons.iter().any(|add_on| add_on == name),
        }
    }

    /// Every patchable target of this image: the identity, then layers in
    /// precedence order, then add-ons.
    pub fn targets(&self) -> Vec<PatchableTarget> {
        let mut targets = vec![self.identity_target()];
        targets.extend(self.layers.iter().map(PatchableTarget::layer));
        targets.extend(self.add_ons.iter().map(PatchableTarget::add_on));
        targets
    }

    pub fn load_target_state(&self, target: &PatchableTarget) -> Result<TargetState> {
        let path = self.layout.target_state_path(target);
        Ok(read_state_file(&path)?
            .map(|(state, _)| state)
            .unwrap_or_default())
    }

    pub fn store_target_state(&self, target: &PatchableTarget, state: &TargetState) -> Result<()> {
        match target.kind {
            TargetKind::Identity => {
                write_state_file(&self.layout.target_state_path(target), state, Some(&self.version))
            }
            _ => write_state_file(&self.layout.target_state_path(target), state, None),
        }
    }

    pub fn store_identity_state(&self, state: &TargetState, version: &Version) -> Result<()> {
        write_state_file(&self.layout.identity_state_path(), state, Some(version))
    }
}

fn read_layers_conf(layout: &ImageLayout) -> Result<Vec<String>> {
    let path = layout.layers_conf_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(vec![BASE_LAYER.to_string()]);
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read layer configuration: {}", path.display()));
        }
    };

    let mut layers = Vec::new();
    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() != "layers" {
            continue;
        }
        for layer in value.split(',').map(str::trim).filter(|layer| !layer.is_empty()) {
            layers.push(layer.to_string());
        }
    }

    // The base layer always exists, whether declared or not.
    if !layers.iter().any(|layer| layer == BASE_LAYER) {
        layers.push(BASE_LAYER.to_string());
    }
    Ok(layers)
}

fn read_add_ons(layout: &ImageLayout) -> Result<Vec<String>> {
    let root = layout.add_ons_root();
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut add_ons = Vec::new();
    for entry in fs::read_dir(&root)
        .with_context(|| format!("failed to read add-ons root: {}", root.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            add_ons.push(name.to_string());
        }
    }
    add_ons.sort();
    Ok(add_ons)
}

fn read_state_file(path: &Path) -> Result<Option<(TargetState, Option<Version>)>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read target state: {}", path.display()));
        }
    };

    let mut state = TargetState::default();
    let mut version = None;
    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "version" => {
                version = Some(value.parse().with_context(|| {
                    format!("invalid version in target state: {}", path.display())
                })?)
            }
            "cumulative" => state.cumulative = Some(value.to_string()),
            "one_off" => state.one_offs.push(value.to_string()),
            _ => {}
        }
    }
    Ok(Some((state, version)))
}

pub(crate) fn write_state_file(path: &Path, state: &TargetState, version: Option<&Version>) -> Result<()> {
    let mut payload = String::new();
    if let Some(version) = version {
        payload.push_str(&format!("version={version}\n"));
    }
    if let Some(cumulative) = &state.cumulative {
        payload.push_str(&format!("cumulative={cumulative}\n"));
    }
    for one_off in &state.one_offs {
        payload.push_str(&format!("one_off={one_off}\n"));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, payload.as_bytes())
        .with_context(|| format!("failed to write target state: {}", path.display()))?;
    Ok(())
}
