use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::item::ContentModification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchType {
    OneOff,
    Cumulative,
}

impl PatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneOff => "one-off",
            Self::Cumulative => "cumulative",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "one-off" => Ok(Self::OneOff),
            "cumulative" => Ok(Self::Cumulative),
            _ => Err(anyhow!("invalid patch type: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerKind {
    Layer,
    AddOn,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Layer => "layer",
            Self::AddOn => "add-on",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "layer" => Ok(Self::Layer),
            "add-on" => Ok(Self::AddOn),
            _ => Err(anyhow!("invalid layer kind: {value}")),
        }
    }
}

fn default_layer_kind() -> LayerKind {
    LayerKind::Layer
}

/// The slice of a patch affecting one layer or add-on. The element id names
/// the overlay directory the element's module content is committed under,
/// conventionally `<layer>-<patchId>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchElement {
    pub id: String,
    pub layer: String,
    #[serde(default = "default_layer_kind")]
    pub layer_kind: LayerKind,
    #[serde(default)]
    pub modifications: Vec<ContentModification>,
}

/// Declarative patch metadata, persisted as `patch.toml` both inside a patch
/// bundle and in the history directory of an applied patch.
///
/// Identity-level `modifications` carry misc files only; module content
/// always belongs to an element, since modules live in per-layer overlays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub patch_id: String,
    pub patch_type: PatchType,
    pub identity_name: String,
    pub applies_to_version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resulting_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incompatible_with: Vec<String>,
    #[serde(default)]
    pub modifications: Vec<ContentModification>,
    #[serde(default)]
    pub elements: Vec<PatchElement>,
}

impl Patch {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let patch: Self = toml::from_str(input).context("failed to parse patch metadata")?;
        patch.validate()?;
        Ok(patch)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        self.validate()?;
        toml::to_string_pretty(self).context("failed to serialize patch metadata")
    }

    /// The identity version this patch leaves behind: the declared resulting
    /// version for a cumulative patch, the unchanged applies-to version for
    /// a one-off.
    pub fn effective_version(&self) -> &Version {
        self.resulting_version
            .as_ref()
            .unwrap_or(&self.applies_to_version)
    }

    pub fn element(&self, layer: &str, layer_kind: LayerKind) -> Option<&PatchElement> {
        self.elements
            .iter()
            .find(|element| element.layer == layer && element.layer_kind == layer_kind)
    }

    fn validate(&self) -> Result<()> {
        if self.patch_id.is_empty() {
            return Err(anyhow!("patch id must not be empty"));
        }
        if self.identity_name.is_empty() {
            return Err(anyhow!("identity name must not be empty"));
        }
        match self.patch_type {
            PatchType::Cumulative if self.resulting_version.is_none() => {
                return Err(anyhow!(
                    "cumulative patch '{}' must declare a resulting version",
                    self.patch_id
                ));
            }
            PatchType::OneOff if self.resulting_version.is_some() => {
                return Err(anyhow!(
                    "one-off patch '{}' must not declare a resulting version",
                    self.patch_id
                ));
            }
            _ => {}
        }

        if self.requires.contains(&self.patch_id) {
            return Err(anyhow!("patch '{}' requires itself", self.patch_id));
        }
        if self.incompatible_with.contains(&self.patch_id) {
            return Err(anyhow!(
                "patch '{}' is incompatible with itself",
                self.patch_id
            ));
        }

        for modification in &self.modifications {
            modification.validate()?;
            if modification.item.is_module() {
                return Err(anyhow!(
                    "identity modification must target a misc file, got {}",
                    modification.item.describe()
                ));
            }
        }

        let mut seen_ids = HashSet::new();
        let mut seen_layers = HashSet::new();
        for element in &self.elements {
            if element.id.is_empty() {
                return Err(anyhow!(
                    "patch '{}' has an element without an id",
                    self.patch_id
                ));
            }
            if !seen_ids.insert(element.id.clone()) {
                return Err(anyhow!("duplicate patch element id '{}'", element.id));
            }
            if !seen_layers.insert((element.layer.clone(), element.layer_kind)) {
                return Err(anyhow!(
                    "duplicate patch element for {} '{}'",
                    element.layer_kind.as_str(),
                    element.layer
                ));
            }
            for modification in &element.modifications {
                modification.validate()?;
                if !modification.item.is_module() {
                    return Err(anyhow!(
                        "element '{}' modification must target a module, got {}",
                        element.id,
                        modification.item.describe()
                    ));
                }
            }
        }
        Ok(())
    }
}
